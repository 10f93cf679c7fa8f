//! Amp threads
//!
//! `~/.local/share/amp/threads/T-<uuid>.json`, one JSON document per thread.
//! Nothing in the file name ties a thread to a worktree; the thread's
//! `env.initial.trees[].uri` (`file://` URIs) does, so candidates are opened
//! newest first until one matches.

use super::fsutil::{cwd_matches, is_fresh, recent_files};
use super::{DetectContext, SessionClassifier};
use crate::data::{AgentFormat, Detection, WorktreeStatus};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub struct AmpClassifier;

pub fn threads_dir(home: &Path) -> PathBuf {
    home.join(".local").join("share").join("amp").join("threads")
}

#[derive(Debug, Deserialize)]
struct Thread {
    #[serde(default)]
    env: Option<ThreadEnv>,
    #[serde(default)]
    messages: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadEnv {
    #[serde(default)]
    initial: Option<ThreadInitial>,
}

#[derive(Debug, Deserialize)]
struct ThreadInitial {
    #[serde(default)]
    trees: Vec<ThreadTree>,
}

#[derive(Debug, Deserialize)]
struct ThreadTree {
    #[serde(default)]
    uri: String,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    #[serde(default)]
    role: String,
}

/// Filesystem path of a `file://` tree URI
fn tree_path(uri: &str) -> PathBuf {
    let raw = uri.strip_prefix("file://").unwrap_or(uri);
    let decoded = urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    PathBuf::from(decoded)
}

/// Status of a thread file if it belongs to `worktree`.
///
/// A matching thread without any user/assistant message is still a session:
/// it reports `(Unknown, found)`.
fn thread_status(path: &Path, worktree: &Path) -> Option<Detection> {
    let content = std::fs::read_to_string(path).ok()?;
    let thread: Thread = serde_json::from_str(&content).ok()?;

    let trees = thread.env?.initial?.trees;
    if !trees
        .iter()
        .any(|tree| cwd_matches(&tree_path(&tree.uri), worktree))
    {
        return None;
    }

    let status = thread
        .messages
        .iter()
        .rev()
        .find_map(|m| match m.role.as_str() {
            "user" => Some(WorktreeStatus::Active),
            // No approval marker in thread files; assistant-last reads as Waiting
            "assistant" => Some(WorktreeStatus::Waiting),
            _ => None,
        })
        .unwrap_or(WorktreeStatus::Unknown);

    Some(Detection::found(status))
}

impl SessionClassifier for AmpClassifier {
    fn format(&self) -> AgentFormat {
        AgentFormat::Amp
    }

    fn detect(&self, ctx: &DetectContext<'_>, worktree: &Path) -> Detection {
        let candidates = recent_files(&threads_dir(ctx.home), |name| {
            name.starts_with("T-") && name.ends_with(".json")
        });

        for candidate in &candidates {
            let Some(detection) = thread_status(&candidate.path, worktree) else {
                continue;
            };
            if is_fresh(candidate.modified, ctx.now, ctx.thresholds.session_activity) {
                tracing::debug!("amp session: active (mtime) {}", candidate.path.display());
                return Detection::found(WorktreeStatus::Active);
            }
            return detection;
        }

        Detection::not_found()
    }
}
