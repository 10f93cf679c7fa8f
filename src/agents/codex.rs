//! Codex CLI sessions
//!
//! Rollouts live in a date tree, `~/.codex/sessions/YYYY/MM/DD/rollout-*.jsonl`,
//! with nothing in the path tying them to a worktree. The first
//! `session_meta` record carries the `cwd`, so locating a session means
//! walking the tree and reading headers. Both steps are cached: the header
//! per (mtime, size), the resolved rollout per worktree for a short TTL.

use super::fsutil::{cwd_matches, is_fresh, read_tail_lines};
use super::{DetectContext, SessionClassifier};
use crate::cache::{CachedPath, FileStamp};
use crate::data::{AgentFormat, Detection, WorktreeStatus};
use serde::Deserialize;
use std::fs::{File, Metadata};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

pub struct CodexClassifier;

pub fn sessions_dir(home: &Path) -> PathBuf {
    home.join(".codex").join("sessions")
}

#[derive(Debug, Deserialize)]
struct RolloutRecord {
    #[serde(rename = "type", default)]
    record_type: String,
    #[serde(default)]
    payload: RolloutPayload,
}

#[derive(Debug, Default, Deserialize)]
struct RolloutPayload {
    #[serde(rename = "type", default)]
    payload_type: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    cwd: String,
}

/// `cwd` recorded in the rollout's `session_meta` header, if any.
///
/// Reading stops at the first `session_meta` carrying a cwd, wherever it sits
/// in the file. An empty string is cached for files without one so they are not re-read
/// until they change.
fn session_cwd(ctx: &DetectContext<'_>, path: &Path, metadata: &Metadata) -> Option<String> {
    let stamp = FileStamp::of(metadata);
    if let Some(cwd) = ctx.caches.session_cwds.get(path, stamp) {
        return Some(cwd).filter(|c| !c.is_empty());
    }

    let file = File::open(path).ok()?;
    let cwd = BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .filter_map(|line| serde_json::from_str::<RolloutRecord>(&line).ok())
        .find(|record| record.record_type == "session_meta" && !record.payload.cwd.is_empty())
        .map(|record| record.payload.cwd)
        .unwrap_or_default();

    ctx.caches.session_cwds.insert(path, stamp, cwd.clone());
    Some(cwd).filter(|c| !c.is_empty())
}

/// Newest rollout whose header cwd is the worktree or below it
pub fn find_session_for_path(ctx: &DetectContext<'_>, worktree: &Path) -> Option<PathBuf> {
    let sessions_dir = sessions_dir(ctx.home);

    match ctx.caches.session_paths.get(&sessions_dir, worktree) {
        CachedPath::Hit(path) => return Some(path),
        CachedPath::Absent => return None,
        CachedPath::Miss => {}
    }

    let mut best: Option<(PathBuf, SystemTime)> = None;

    for entry in WalkDir::new(&sessions_dir).into_iter().flatten() {
        if !entry.file_type().is_file() || !entry.file_name().to_string_lossy().ends_with(".jsonl") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let Some(cwd) = session_cwd(ctx, entry.path(), &metadata) else {
            continue;
        };
        if !cwd_matches(Path::new(&cwd), worktree) {
            continue;
        }
        if best.as_ref().map_or(true, |(_, t)| modified > *t) {
            best = Some((entry.into_path(), modified));
        }
    }

    let found = best.map(|(path, _)| path);
    ctx.caches
        .session_paths
        .insert(&sessions_dir, worktree, found.clone());
    found
}

/// Status from the last `response_item` message in the rollout tail.
///
/// Codex records carry no pending-approval marker, so an assistant-last
/// rollout reports Waiting.
pub fn last_message_status(path: &Path, tail_bytes: u64) -> Detection {
    let Ok(lines) = read_tail_lines(path, tail_bytes) else {
        return Detection::not_found();
    };

    lines
        .iter()
        .rev()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            serde_json::from_str::<RolloutRecord>(line).ok()
        })
        .filter(|r| r.record_type == "response_item" && r.payload.payload_type == "message")
        .find_map(|r| match r.payload.role.as_str() {
            "assistant" => Some(Detection::found(WorktreeStatus::Waiting)),
            "user" => Some(Detection::found(WorktreeStatus::Active)),
            _ => None,
        })
        .unwrap_or_else(Detection::not_found)
}

impl SessionClassifier for CodexClassifier {
    fn format(&self) -> AgentFormat {
        AgentFormat::Codex
    }

    fn detect(&self, ctx: &DetectContext<'_>, worktree: &Path) -> Detection {
        let Some(session_file) = find_session_for_path(ctx, worktree) else {
            tracing::debug!("codex session: none for {}", worktree.display());
            return Detection::not_found();
        };

        let fresh = super::fsutil::modified_time(&session_file)
            .is_some_and(|m| is_fresh(m, ctx.now, ctx.thresholds.session_activity));
        if fresh {
            return Detection::found(WorktreeStatus::Active);
        }

        last_message_status(&session_file, ctx.thresholds.tail_bytes)
    }
}
