//! Pi agent sessions
//!
//! `~/.pi/agent/sessions/--<encoded>--/*.jsonl`, where `/home/user/project`
//! encodes as `home-user-project`. Conversation lines look like
//! `{"type":"message","message":{"role":"user",...}}`.

use super::fsutil::{is_fresh, read_tail_lines, recent_files};
use super::{DetectContext, SessionClassifier};
use crate::data::{AgentFormat, Detection, WorktreeStatus};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub struct PiClassifier;

/// `/home/user/project` -> `--home-user-project--`
pub fn project_dir_name(worktree: &Path) -> String {
    let path = worktree.to_string_lossy();
    let encoded = path.strip_prefix('/').unwrap_or(&path).replace('/', "-");
    format!("--{}--", encoded)
}

pub fn project_dir(home: &Path, worktree: &Path) -> PathBuf {
    home.join(".pi")
        .join("agent")
        .join("sessions")
        .join(project_dir_name(worktree))
}

#[derive(Debug, Deserialize)]
struct PiEntry {
    #[serde(rename = "type", default)]
    entry_type: String,
    #[serde(default)]
    message: Option<PiMessage>,
}

#[derive(Debug, Deserialize)]
struct PiMessage {
    #[serde(default)]
    role: String,
}

fn last_message_status(path: &Path, tail_bytes: u64) -> Option<WorktreeStatus> {
    let lines = read_tail_lines(path, tail_bytes).ok()?;

    lines.iter().rev().find_map(|line| {
        let entry: PiEntry = serde_json::from_str(line.trim()).ok()?;
        if entry.entry_type != "message" {
            return None;
        }
        match entry.message?.role.as_str() {
            "user" => Some(WorktreeStatus::Active),
            "assistant" => Some(WorktreeStatus::Waiting),
            _ => None,
        }
    })
}

impl SessionClassifier for PiClassifier {
    fn format(&self) -> AgentFormat {
        AgentFormat::Pi
    }

    fn detect(&self, ctx: &DetectContext<'_>, worktree: &Path) -> Detection {
        let candidates = recent_files(&project_dir(ctx.home, worktree), |name| {
            name.ends_with(".jsonl")
        });

        let Some(newest) = candidates.first() else {
            return Detection::not_found();
        };
        if is_fresh(newest.modified, ctx.now, ctx.thresholds.session_activity) {
            return Detection::found(WorktreeStatus::Active);
        }

        candidates
            .iter()
            .find_map(|c| last_message_status(&c.path, ctx.thresholds.tail_bytes))
            .map(Detection::found)
            .unwrap_or_else(Detection::not_found)
    }
}
