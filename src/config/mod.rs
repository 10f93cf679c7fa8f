use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Empirical thresholds
// =============================================================================

/// Freshness window for the Claude format. Progress entries are written every
/// 1-3s while a tool runs, so 5s covers tool execution.
pub const CLAUDE_ACTIVITY_THRESHOLD: Duration = Duration::from_secs(5);

/// Freshness window for single-file formats without sub-agents. Has to cover
/// both tool execution and model thinking gaps.
pub const SESSION_ACTIVITY_THRESHOLD: Duration = Duration::from_secs(30);

/// A sub-agent file untouched for longer than this is finished.
pub const SUBAGENT_MAX_STALENESS: Duration = Duration::from_secs(2 * 60);

/// How much of a session file's tail is parsed on the slow path.
pub const SESSION_STATUS_TAIL_BYTES: u64 = 2 * 1024 * 1024;

pub const MAX_HOT_SESSIONS: usize = 3;
pub const COLD_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const HOT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEMOTION_INTERVAL: Duration = Duration::from_secs(60);
pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(100);
pub const WATCHER_EVENT_BUFFER: usize = 32;
pub const MANAGER_EVENT_BUFFER: usize = 64;

pub const SESSION_PATH_CACHE_TTL: Duration = Duration::from_secs(5);
pub const CWD_CACHE_MAX_ENTRIES: usize = 2048;

// =============================================================================
// Runtime settings
// =============================================================================

/// Classifier timing knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub claude_activity: Duration,
    pub session_activity: Duration,
    pub subagent_max_staleness: Duration,
    pub tail_bytes: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            claude_activity: CLAUDE_ACTIVITY_THRESHOLD,
            session_activity: SESSION_ACTIVITY_THRESHOLD,
            subagent_max_staleness: SUBAGENT_MAX_STALENESS,
            tail_bytes: SESSION_STATUS_TAIL_BYTES,
        }
    }
}

/// Tiered watcher timing and capacity knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherSettings {
    pub max_hot_sessions: usize,
    pub cold_poll_interval: Duration,
    pub hot_inactivity_timeout: Duration,
    pub demotion_interval: Duration,
    pub debounce_delay: Duration,
    pub event_buffer: usize,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            max_hot_sessions: MAX_HOT_SESSIONS,
            cold_poll_interval: COLD_POLL_INTERVAL,
            hot_inactivity_timeout: HOT_INACTIVITY_TIMEOUT,
            demotion_interval: DEMOTION_INTERVAL,
            debounce_delay: DEBOUNCE_DELAY,
            event_buffer: WATCHER_EVENT_BUFFER,
        }
    }
}

/// Locator cache knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub session_path_ttl: Duration,
    pub cwd_max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            session_path_ttl: SESSION_PATH_CACHE_TTL,
            cwd_max_entries: CWD_CACHE_MAX_ENTRIES,
        }
    }
}

// =============================================================================
// Config file
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_claude_activity_ms")]
    pub claude_activity_ms: u64,
    #[serde(default = "default_session_activity_ms")]
    pub session_activity_ms: u64,
    #[serde(default = "default_subagent_staleness_secs")]
    pub subagent_staleness_secs: u64,
    #[serde(default = "default_tail_bytes")]
    pub tail_bytes: u64,
}

fn default_claude_activity_ms() -> u64 {
    CLAUDE_ACTIVITY_THRESHOLD.as_millis() as u64
}

fn default_session_activity_ms() -> u64 {
    SESSION_ACTIVITY_THRESHOLD.as_millis() as u64
}

fn default_subagent_staleness_secs() -> u64 {
    SUBAGENT_MAX_STALENESS.as_secs()
}

fn default_tail_bytes() -> u64 {
    SESSION_STATUS_TAIL_BYTES
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            claude_activity_ms: default_claude_activity_ms(),
            session_activity_ms: default_session_activity_ms(),
            subagent_staleness_secs: default_subagent_staleness_secs(),
            tail_bytes: default_tail_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_max_hot_sessions")]
    pub max_hot_sessions: usize,
    #[serde(default = "default_cold_poll_secs")]
    pub cold_poll_secs: u64,
    #[serde(default = "default_hot_inactivity_secs")]
    pub hot_inactivity_secs: u64,
    #[serde(default = "default_demotion_secs")]
    pub demotion_secs: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_max_hot_sessions() -> usize {
    MAX_HOT_SESSIONS
}

fn default_cold_poll_secs() -> u64 {
    COLD_POLL_INTERVAL.as_secs()
}

fn default_hot_inactivity_secs() -> u64 {
    HOT_INACTIVITY_TIMEOUT.as_secs()
}

fn default_demotion_secs() -> u64 {
    DEMOTION_INTERVAL.as_secs()
}

fn default_debounce_ms() -> u64 {
    DEBOUNCE_DELAY.as_millis() as u64
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            max_hot_sessions: default_max_hot_sessions(),
            cold_poll_secs: default_cold_poll_secs(),
            hot_inactivity_secs: default_hot_inactivity_secs(),
            demotion_secs: default_demotion_secs(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_session_path_ttl_secs")]
    pub session_path_ttl_secs: u64,
    #[serde(default = "default_cwd_max_entries")]
    pub cwd_max_entries: usize,
}

fn default_session_path_ttl_secs() -> u64 {
    SESSION_PATH_CACHE_TTL.as_secs()
}

fn default_cwd_max_entries() -> usize {
    CWD_CACHE_MAX_ENTRIES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            session_path_ttl_secs: default_session_path_ttl_secs(),
            cwd_max_entries: default_cwd_max_entries(),
        }
    }
}

impl Config {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            claude_activity: Duration::from_millis(self.detection.claude_activity_ms),
            session_activity: Duration::from_millis(self.detection.session_activity_ms),
            subagent_max_staleness: Duration::from_secs(self.detection.subagent_staleness_secs),
            tail_bytes: self.detection.tail_bytes,
        }
    }

    pub fn watcher_settings(&self) -> WatcherSettings {
        WatcherSettings {
            // A zero-capacity hot tier would never watch anything
            max_hot_sessions: self.watcher.max_hot_sessions.max(1),
            cold_poll_interval: Duration::from_secs(self.watcher.cold_poll_secs.max(1)),
            hot_inactivity_timeout: Duration::from_secs(self.watcher.hot_inactivity_secs),
            demotion_interval: Duration::from_secs(self.watcher.demotion_secs.max(1)),
            debounce_delay: Duration::from_millis(self.watcher.debounce_ms),
            ..WatcherSettings::default()
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            session_path_ttl: Duration::from_secs(self.cache.session_path_ttl_secs),
            cwd_max_entries: self.cache.cwd_max_entries.max(1),
        }
    }
}

pub fn config_dir() -> Result<PathBuf> {
    let dir = directories::ProjectDirs::from("", "", "sessionwatch")
        .context("Could not determine config directory")?
        .config_dir()
        .to_path_buf();
    Ok(dir)
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load configuration.
///
/// An explicit path must exist. Without one, the platform config file is used
/// when present and built-in defaults otherwise.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                anyhow::bail!("Config file not found at {}", p.display());
            }
            p.to_path_buf()
        }
        None => match default_config_path() {
            Ok(p) if p.exists() => p,
            _ => return Ok(Config::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", path.display()))?;

    Ok(config)
}
