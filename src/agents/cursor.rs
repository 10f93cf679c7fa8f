//! Cursor CLI sessions
//!
//! `~/.cursor/chats/<md5(worktree)>/<sessionId>/store.db` (SQLite, plus a
//! `store.db-wal` while writing). Reading the database belongs to the
//! transcript adapter, so this classifier only answers from mtimes: a
//! recently written store is Active, anything else is "no information".

use super::fsutil::{is_fresh, modified_time};
use super::{DetectContext, SessionClassifier};
use crate::data::{AgentFormat, Detection, WorktreeStatus};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const STORE_FILES: [&str; 2] = ["store.db", "store.db-wal"];

pub struct CursorClassifier;

/// Lowercase hex MD5 of the absolute worktree path
pub fn workspace_hash(worktree: &Path) -> String {
    format!("{:x}", md5::compute(worktree.to_string_lossy().as_bytes()))
}

pub fn workspace_dir(home: &Path, worktree: &Path) -> PathBuf {
    home.join(".cursor")
        .join("chats")
        .join(workspace_hash(worktree))
}

/// Newest store write across every session directory of the workspace
pub fn latest_store_write(workspace: &Path) -> Option<SystemTime> {
    let entries = fs::read_dir(workspace).ok()?;

    entries
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .flat_map(|e| {
            let session_dir = e.path();
            STORE_FILES
                .iter()
                .filter_map(move |name| modified_time(&session_dir.join(name)))
        })
        .max()
}

impl SessionClassifier for CursorClassifier {
    fn format(&self) -> AgentFormat {
        AgentFormat::Cursor
    }

    fn detect(&self, ctx: &DetectContext<'_>, worktree: &Path) -> Detection {
        let workspace = workspace_dir(ctx.home, worktree);
        match latest_store_write(&workspace) {
            Some(modified) if is_fresh(modified, ctx.now, ctx.thresholds.session_activity) => {
                Detection::found(WorktreeStatus::Active)
            }
            _ => Detection::not_found(),
        }
    }
}
