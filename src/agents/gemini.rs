//! Gemini CLI sessions
//!
//! `~/.gemini/tmp/<sha256(worktree)>/chats/session-*.json`, each a whole JSON
//! document with a `messages` array whose entries are typed `user`, `gemini`
//! or `info`.

use super::fsutil::{is_fresh, recent_files};
use super::{DetectContext, SessionClassifier};
use crate::data::{AgentFormat, Detection, WorktreeStatus};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub struct GeminiClassifier;

/// Lowercase hex SHA-256 of the absolute worktree path
pub fn project_hash(worktree: &Path) -> String {
    let digest = Sha256::digest(worktree.to_string_lossy().as_bytes());
    format!("{:x}", digest)
}

pub fn chats_dir(home: &Path, worktree: &Path) -> PathBuf {
    home.join(".gemini")
        .join("tmp")
        .join(project_hash(worktree))
        .join("chats")
}

#[derive(Debug, Deserialize)]
struct ChatFile {
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(rename = "type", default)]
    message_type: String,
}

fn last_message_status(path: &Path) -> Option<WorktreeStatus> {
    let content = std::fs::read_to_string(path).ok()?;
    let chat: ChatFile = serde_json::from_str(&content).ok()?;

    chat.messages
        .iter()
        .rev()
        .find_map(|m| match m.message_type.as_str() {
            // No tool-call marker at this level; assistant-last reads as Waiting
            "gemini" => Some(WorktreeStatus::Waiting),
            "user" => Some(WorktreeStatus::Active),
            _ => None,
        })
}

impl SessionClassifier for GeminiClassifier {
    fn format(&self) -> AgentFormat {
        AgentFormat::Gemini
    }

    fn detect(&self, ctx: &DetectContext<'_>, worktree: &Path) -> Detection {
        let chats_dir = chats_dir(ctx.home, worktree);
        let candidates = recent_files(&chats_dir, |name| {
            name.starts_with("session-") && name.ends_with(".json")
        });

        let Some(newest) = candidates.first() else {
            return Detection::not_found();
        };
        if is_fresh(newest.modified, ctx.now, ctx.thresholds.session_activity) {
            return Detection::found(WorktreeStatus::Active);
        }

        candidates
            .iter()
            .find_map(|c| last_message_status(&c.path))
            .map(Detection::found)
            .unwrap_or_else(Detection::not_found)
    }
}
