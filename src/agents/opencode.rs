//! OpenCode sessions
//!
//! ```text
//! <storage>/
//! ├── project/<projectId>.json            {"id": ..., "worktree": "/abs/path"}
//! ├── session/<projectId>/<sessionId>.json
//! └── message/<sessionId>/<messageId>.json {"role": "user" | "assistant", ...}
//! ```
//!
//! `<storage>` is platform dependent; see [`storage_dir`].

use super::fsutil::{cwd_matches, is_fresh, most_recent_file};
use super::{DetectContext, SessionClassifier};
use crate::data::{AgentFormat, Detection, WorktreeStatus};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub struct OpenCodeClassifier;

fn storage_candidates(home: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if cfg!(target_os = "macos") {
        candidates.push(
            home.join("Library")
                .join("Application Support")
                .join("opencode")
                .join("storage"),
        );
    } else if cfg!(target_os = "windows") {
        if let Some(local) = std::env::var_os("LOCALAPPDATA") {
            candidates.push(PathBuf::from(local).join("opencode").join("Data").join("storage"));
        }
    } else {
        let data_home = std::env::var_os("XDG_DATA_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".local").join("share"));
        candidates.push(data_home.join("opencode").join("storage"));
    }

    let default_path = home.join(".local").join("share").join("opencode").join("storage");
    if candidates.last() != Some(&default_path) {
        candidates.push(default_path);
    }
    candidates
}

/// First existing storage directory among the platform candidates, falling
/// back to the preferred one
pub fn storage_dir(home: &Path) -> PathBuf {
    let candidates = storage_candidates(home);
    candidates
        .iter()
        .find(|p| p.is_dir())
        .or_else(|| candidates.first())
        .cloned()
        .unwrap_or_else(|| home.join(".local").join("share").join("opencode").join("storage"))
}

#[derive(Debug, Deserialize)]
struct ProjectFile {
    #[serde(default)]
    id: String,
    #[serde(default)]
    worktree: String,
}

#[derive(Debug, Deserialize)]
struct MessageFile {
    #[serde(default)]
    role: String,
}

fn is_json(name: &str) -> bool {
    name.ends_with(".json")
}

/// Project id whose recorded worktree contains `worktree`
pub fn find_project(storage: &Path, worktree: &Path) -> Option<String> {
    let entries = fs::read_dir(storage.join("project")).ok()?;

    entries.flatten().find_map(|entry| {
        let path = entry.path();
        if !path.is_file() || !is_json(&entry.file_name().to_string_lossy()) {
            return None;
        }
        let content = fs::read_to_string(&path).ok()?;
        let project: ProjectFile = serde_json::from_str(&content).ok()?;
        if project.id.is_empty() || !cwd_matches(Path::new(&project.worktree), worktree) {
            return None;
        }
        Some(project.id)
    })
}

/// Most recently modified session id of a project
pub fn find_session(storage: &Path, project_id: &str) -> Option<String> {
    let newest = most_recent_file(&storage.join("session").join(project_id), is_json)?;
    newest
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
}

impl SessionClassifier for OpenCodeClassifier {
    fn format(&self) -> AgentFormat {
        AgentFormat::OpenCode
    }

    fn detect(&self, ctx: &DetectContext<'_>, worktree: &Path) -> Detection {
        let storage = storage_dir(ctx.home);

        let Some(project_id) = find_project(&storage, worktree) else {
            return Detection::not_found();
        };
        let Some(session_id) = find_session(&storage, &project_id) else {
            return Detection::not_found();
        };
        let Some(last) = most_recent_file(&storage.join("message").join(&session_id), is_json)
        else {
            return Detection::not_found();
        };

        if is_fresh(last.modified, ctx.now, ctx.thresholds.session_activity) {
            return Detection::found(WorktreeStatus::Active);
        }

        let Some(message) = fs::read_to_string(&last.path)
            .ok()
            .and_then(|c| serde_json::from_str::<MessageFile>(&c).ok())
        else {
            return Detection::not_found();
        };

        match message.role.as_str() {
            // Message files carry no approval state; assistant-last reads as Waiting
            "assistant" => Detection::found(WorktreeStatus::Waiting),
            "user" => Detection::found(WorktreeStatus::Active),
            _ => Detection::not_found(),
        }
    }
}
