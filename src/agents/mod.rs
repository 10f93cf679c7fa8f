//! Per-format session status classifiers
//!
//! Each supported agent leaves a different trail on disk. Every format gets
//! one [`SessionClassifier`] that maps a working directory to a
//! [`Detection`]; [`StatusDetector`] owns the shared context (home directory,
//! thresholds, locator caches) and dispatches by [`AgentFormat`].
//!
//! # Shared shape
//!
//! ```text
//! worktree ──locate──▶ candidate files (newest first)
//!                           │
//!            newest mtime fresh? ──yes──▶ Active
//!                           │ no
//!               parse tail, last role ──▶ Active / Thinking / Waiting / Done
//!                           │ no role
//!                   next candidate … ──▶ not found
//! ```

pub mod amp;
pub mod claude;
pub mod codex;
pub mod cursor;
pub mod fsutil;
pub mod gemini;
pub mod opencode;
pub mod pi;

use crate::cache::LocatorCaches;
use crate::config::Thresholds;
use crate::data::{AgentFormat, Detection};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

pub use amp::AmpClassifier;
pub use claude::ClaudeClassifier;
pub use codex::CodexClassifier;
pub use cursor::CursorClassifier;
pub use gemini::GeminiClassifier;
pub use opencode::OpenCodeClassifier;
pub use pi::PiClassifier;

/// Everything a classifier may consult for one detection
#[derive(Debug, Clone, Copy)]
pub struct DetectContext<'a> {
    pub home: &'a Path,
    pub thresholds: &'a Thresholds,
    pub caches: &'a LocatorCaches,
    /// Reference instant for every freshness comparison in this detection
    pub now: SystemTime,
}

/// One on-disk session convention.
///
/// `worktree` is always absolute and lexically clean. Implementations never
/// fail: unreadable or malformed input means [`Detection::not_found`].
pub trait SessionClassifier: Send + Sync {
    fn format(&self) -> AgentFormat;

    fn detect(&self, ctx: &DetectContext<'_>, worktree: &Path) -> Detection;
}

/// Strategy table keyed by format
pub fn classifier_for(format: AgentFormat) -> &'static dyn SessionClassifier {
    match format {
        AgentFormat::Claude => &ClaudeClassifier,
        AgentFormat::Codex => &CodexClassifier,
        AgentFormat::Gemini => &GeminiClassifier,
        AgentFormat::OpenCode => &OpenCodeClassifier,
        AgentFormat::Cursor => &CursorClassifier,
        AgentFormat::Pi => &PiClassifier,
        AgentFormat::Amp => &AmpClassifier,
    }
}

/// Entry point for status detection.
///
/// Cheap to call on every tick or change notification; it does synchronous
/// file I/O bounded by the tail size in [`Thresholds`].
#[derive(Debug, Clone)]
pub struct StatusDetector {
    home: PathBuf,
    thresholds: Thresholds,
    caches: Arc<LocatorCaches>,
}

impl StatusDetector {
    pub fn new(home: impl Into<PathBuf>, thresholds: Thresholds, caches: Arc<LocatorCaches>) -> Self {
        Self {
            home: home.into(),
            thresholds,
            caches,
        }
    }

    /// Detector rooted at the current user's home directory
    pub fn for_current_user(thresholds: Thresholds, caches: Arc<LocatorCaches>) -> Result<Self> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(Self::new(home, thresholds, caches))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn caches(&self) -> &Arc<LocatorCaches> {
        &self.caches
    }

    pub fn detect_status(&self, format: AgentFormat, worktree: &Path) -> Detection {
        self.detect_status_at(format, worktree, SystemTime::now())
    }

    /// Same as [`Self::detect_status`] with an explicit reference time
    pub fn detect_status_at(&self, format: AgentFormat, worktree: &Path, now: SystemTime) -> Detection {
        let Some(worktree) = absolute_worktree(worktree) else {
            tracing::debug!("{}: cannot resolve {}", format, worktree.display());
            return Detection::not_found();
        };

        let ctx = DetectContext {
            home: &self.home,
            thresholds: &self.thresholds,
            caches: &self.caches,
            now,
        };
        let detection = classifier_for(format).detect(&ctx, &worktree);
        tracing::debug!(
            format = %format,
            worktree = %worktree.display(),
            status = %detection.status,
            found = detection.found,
            "session status detected"
        );
        detection
    }
}

fn absolute_worktree(path: &Path) -> Option<PathBuf> {
    let absolute = std::path::absolute(path).ok()?;
    Some(fsutil::clean_path(&absolute))
}
