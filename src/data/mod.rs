use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Instant, SystemTime};

/// Point-in-time activity state of one agent session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum WorktreeStatus {
    /// Agent is mid-turn (prompt received, tool running, or file still being written)
    Active,
    /// Model is generating but nothing has been flushed yet
    Thinking,
    /// Agent dispatched a tool call and needs approval
    Waiting,
    /// Agent finished its turn and is idle at the prompt
    Done,
    #[default]
    Unknown,
}

impl WorktreeStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Thinking => "Thinking",
            Self::Waiting => "Waiting",
            Self::Done => "Done",
            Self::Unknown => "Unknown",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Active => "Agent actively working",
            Self::Thinking => "Model is thinking",
            Self::Waiting => "Needs your approval (!)",
            Self::Done => "Agent finished its turn",
            Self::Unknown => "No session information",
        }
    }

    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::Active,
            Self::Thinking,
            Self::Waiting,
            Self::Done,
            Self::Unknown,
        ]
        .into_iter()
    }
}

impl fmt::Display for WorktreeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of classifying one working directory.
///
/// `found == false` means no trustworthy session existed on disk. That is
/// "no information", never the same thing as [`WorktreeStatus::Done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub status: WorktreeStatus,
    pub found: bool,
}

impl Detection {
    pub fn found(status: WorktreeStatus) -> Self {
        Self {
            status,
            found: true,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: WorktreeStatus::Unknown,
            found: false,
        }
    }
}

/// On-disk session conventions this crate understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentFormat {
    Claude,
    Codex,
    Gemini,
    OpenCode,
    Cursor,
    Pi,
    Amp,
}

impl AgentFormat {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Claude => "Claude Code",
            Self::Codex => "Codex",
            Self::Gemini => "Gemini CLI",
            Self::OpenCode => "OpenCode",
            Self::Cursor => "Cursor",
            Self::Pi => "Pi",
            Self::Amp => "Amp",
        }
    }

    /// Identifier used on the command line and in config files
    pub fn id(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::OpenCode => "opencode",
            Self::Cursor => "cursor",
            Self::Pi => "pi",
            Self::Amp => "amp",
        }
    }

    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::Claude,
            Self::Codex,
            Self::Gemini,
            Self::OpenCode,
            Self::Cursor,
            Self::Pi,
            Self::Amp,
        ]
        .into_iter()
    }
}

impl fmt::Display for AgentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for AgentFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        match wanted.as_str() {
            "claude" | "claude-code" => Ok(Self::Claude),
            "open-code" => Ok(Self::OpenCode),
            other => Self::all()
                .find(|f| f.id() == other)
                .ok_or_else(|| anyhow::anyhow!("unknown agent format: {}", s)),
        }
    }
}

/// Kind of change reported by a watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    SessionCreated,
    MessageAdded,
    SessionUpdated,
}

/// "Something changed for this session"; callers re-query a classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub session_id: String,
}

impl Event {
    pub fn new(event_type: EventType, session_id: impl Into<String>) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
        }
    }
}

/// Metadata a tiered watcher keeps for one tracked session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
    pub size: u64,
    /// When the session last became (or was re-requested as) hot
    pub last_hot: Option<Instant>,
}

impl SessionInfo {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            modified: None,
            size: 0,
            last_hot: None,
        }
    }
}

/// Derived tier membership of a tracked session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Covered by live OS change notification
    Hot,
    /// Covered only by periodic re-stat polling
    Cold,
}

/// Counters reported by a watcher (or summed by the manager)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatcherStats {
    pub hot: usize,
    pub cold: usize,
    pub watched_dirs: usize,
}

impl std::ops::AddAssign for WatcherStats {
    fn add_assign(&mut self, other: Self) {
        self.hot += other.hot;
        self.cold += other.cold;
        self.watched_dirs += other.watched_dirs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_format_ids() {
        for format in AgentFormat::all() {
            assert_eq!(format.id().parse::<AgentFormat>().unwrap(), format);
        }
        assert_eq!(
            "Claude-Code".parse::<AgentFormat>().unwrap(),
            AgentFormat::Claude
        );
        assert!("vim".parse::<AgentFormat>().is_err());
    }

    #[test]
    fn not_found_is_not_done() {
        let missing = Detection::not_found();
        assert!(!missing.found);
        assert_ne!(missing, Detection::found(WorktreeStatus::Done));
    }

    #[test]
    fn stats_add_up() {
        let mut total = WatcherStats::default();
        total += WatcherStats {
            hot: 1,
            cold: 4,
            watched_dirs: 2,
        };
        total += WatcherStats {
            hot: 2,
            cold: 0,
            watched_dirs: 1,
        };
        assert_eq!(
            total,
            WatcherStats {
                hot: 3,
                cold: 4,
                watched_dirs: 3
            }
        );
    }

    #[test]
    fn unknown_is_the_default_status() {
        assert_eq!(WorktreeStatus::default(), WorktreeStatus::Unknown);
        assert_eq!(Detection::not_found().status, WorktreeStatus::default());
        let labels: std::collections::HashSet<_> = WorktreeStatus::all().map(|s| s.label()).collect();
        assert_eq!(labels.len(), 5);
    }
}
