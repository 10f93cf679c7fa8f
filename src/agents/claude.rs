//! Claude Code sessions
//!
//! Layout:
//! ```text
//! ~/.claude/projects/<encoded-worktree>/
//! ├── <session-uuid>.jsonl            <- main transcript, one JSON entry per line
//! └── <session-uuid>/subagents/
//!     └── agent-<id>.jsonl            <- nested sub-agent transcripts
//! ```
//!
//! The transcript alone distinguishes most states:
//!
//! | Last user/assistant entry            | Status                          |
//! |--------------------------------------|---------------------------------|
//! | `user`                               | Active (fresh) / Thinking       |
//! | `assistant`, whitespace-only content | Thinking (stream just opened)   |
//! | `assistant` with a `tool_use` block  | Waiting                         |
//! | `assistant`, text only               | Done                            |
//!
//! While a sub-agent runs, the parent transcript goes quiet; a live sub-agent
//! overrides a stale parent's Waiting/Done.

use super::fsutil::{is_fresh, most_recent_file, read_tail_lines, recent_files};
use super::{DetectContext, SessionClassifier};
use crate::data::{AgentFormat, Detection, WorktreeStatus};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub struct ClaudeClassifier;

/// Encode a worktree path the way Claude Code names its project directory.
///
/// Anything other than ASCII letters, digits and `-` becomes `-`:
/// `/Users/foo/my_project` -> `-Users-foo-my-project`.
pub fn project_dir_name(worktree: &Path) -> String {
    worktree
        .to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

pub fn project_dir(home: &Path, worktree: &Path) -> PathBuf {
    home.join(".claude")
        .join("projects")
        .join(project_dir_name(worktree))
}

/// Directory holding the sub-agent transcripts of one session file
pub fn subagents_dir(session_file: &Path) -> Option<PathBuf> {
    let parent = session_file.parent()?;
    let uuid = session_file.file_stem()?;
    Some(parent.join(uuid).join("subagents"))
}

/// Classification of the last user/assistant entry of a transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastEntry {
    User,
    /// Assistant entry written when the stream opens, before any content
    Placeholder,
    ToolUse,
    Text,
}

impl LastEntry {
    /// Status implied by the content alone, ignoring mtime
    fn content_status(self) -> WorktreeStatus {
        match self {
            Self::User => WorktreeStatus::Active,
            Self::Placeholder => WorktreeStatus::Thinking,
            Self::ToolUse => WorktreeStatus::Waiting,
            Self::Text => WorktreeStatus::Done,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptEntry {
    #[serde(rename = "type", default)]
    entry_type: String,
    #[serde(default)]
    message: Option<TranscriptMessage>,
}

#[derive(Debug, Deserialize)]
struct TranscriptMessage {
    #[serde(default)]
    content: Value,
}

impl TranscriptMessage {
    fn is_placeholder(&self) -> bool {
        match &self.content {
            Value::String(text) => text.trim().is_empty(),
            Value::Array(blocks) => blocks.iter().all(|block| {
                block.get("type").and_then(Value::as_str) == Some("text")
                    && block
                        .get("text")
                        .and_then(Value::as_str)
                        .map_or(true, |t| t.trim().is_empty())
            }),
            _ => false,
        }
    }

    fn has_tool_use(&self) -> bool {
        match &self.content {
            Value::Array(blocks) => blocks
                .iter()
                .any(|block| block.get("type").and_then(Value::as_str) == Some("tool_use")),
            _ => false,
        }
    }
}

/// Scan a transcript tail backwards for the last user/assistant entry.
///
/// `None` when the tail holds no such entry (abandoned file, snapshot-only
/// file) or cannot be read.
pub fn last_entry(path: &Path, tail_bytes: u64) -> Option<LastEntry> {
    let lines = read_tail_lines(path, tail_bytes).ok()?;

    lines.iter().rev().find_map(|line| {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let entry: TranscriptEntry = serde_json::from_str(line).ok()?;
        match entry.entry_type.as_str() {
            "user" => Some(LastEntry::User),
            "assistant" => Some(match entry.message {
                Some(ref message) if message.is_placeholder() => LastEntry::Placeholder,
                Some(ref message) if message.has_tool_use() => LastEntry::ToolUse,
                _ => LastEntry::Text,
            }),
            _ => None,
        }
    })
}

/// Status contributed by the most recent sub-agent under `dir`, if it is
/// still alive.
///
/// Only Active or Thinking are ever returned: a sub-agent whose last entry is
/// a completed assistant turn has nothing to add to the parent.
pub fn subagent_status(ctx: &DetectContext<'_>, dir: &Path) -> Option<WorktreeStatus> {
    let newest = most_recent_file(dir, |name| name.ends_with(".jsonl"))?;

    if !is_fresh(newest.modified, ctx.now, ctx.thresholds.subagent_max_staleness) {
        tracing::debug!(
            "claude sub-agent abandoned: {}",
            newest.path.display()
        );
        return None;
    }

    if is_fresh(newest.modified, ctx.now, ctx.thresholds.claude_activity) {
        return Some(WorktreeStatus::Active);
    }

    match last_entry(&newest.path, ctx.thresholds.tail_bytes)? {
        LastEntry::User => Some(WorktreeStatus::Active),
        LastEntry::Placeholder => Some(WorktreeStatus::Thinking),
        LastEntry::ToolUse | LastEntry::Text => None,
    }
}

impl SessionClassifier for ClaudeClassifier {
    fn format(&self) -> AgentFormat {
        AgentFormat::Claude
    }

    fn detect(&self, ctx: &DetectContext<'_>, worktree: &Path) -> Detection {
        let project_dir = project_dir(ctx.home, worktree);

        // Top-level agent-*.jsonl files are sidechains, not sessions
        let candidates = recent_files(&project_dir, |name| {
            name.ends_with(".jsonl") && !name.starts_with("agent-")
        });
        let Some(newest) = candidates.first() else {
            tracing::debug!("claude session: no session file in {}", project_dir.display());
            return Detection::not_found();
        };

        if is_fresh(newest.modified, ctx.now, ctx.thresholds.claude_activity) {
            tracing::debug!("claude session: active (fresh mtime) {}", newest.path.display());
            return Detection::found(WorktreeStatus::Active);
        }

        for candidate in &candidates {
            let Some(entry) = last_entry(&candidate.path, ctx.thresholds.tail_bytes) else {
                tracing::debug!("claude session: skipping abandoned {}", candidate.path.display());
                continue;
            };

            let fresh = is_fresh(candidate.modified, ctx.now, ctx.thresholds.claude_activity);

            let status = match entry {
                LastEntry::User if fresh => WorktreeStatus::Active,
                // Prompt submitted, model has not flushed anything yet
                LastEntry::User => WorktreeStatus::Thinking,
                LastEntry::Placeholder => WorktreeStatus::Thinking,
                LastEntry::ToolUse | LastEntry::Text if fresh => WorktreeStatus::Active,
                LastEntry::ToolUse | LastEntry::Text => {
                    let sub = subagents_dir(&candidate.path)
                        .and_then(|dir| subagent_status(ctx, &dir));
                    match sub {
                        Some(sub) => {
                            tracing::debug!("claude session: sub-agent override ({sub})");
                            sub
                        }
                        None => entry.content_status(),
                    }
                }
            };
            return Detection::found(status);
        }

        tracing::debug!(
            "claude session: no valid session among {} candidates",
            candidates.len()
        );
        Detection::not_found()
    }
}
