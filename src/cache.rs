//! Locator caches shared by the status classifiers.
//!
//! Both caches are plain objects owned by whoever builds the
//! [`crate::agents::StatusDetector`]; nothing here is a global. Each guards
//! its map with its own mutex, and a poisoned lock degrades to a cache miss.
//!
//! - [`SessionPathCache`]: (sessions dir, worktree) -> resolved session file or
//!   "nothing there", valid for a short TTL and re-checked for existence.
//! - [`MetadataCache`]: file path -> value derived from the file, valid only
//!   while the file's (mtime, size) is unchanged, LRU-bounded.

use crate::config::CacheSettings;
use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

// =============================================================================
// TTL path cache
// =============================================================================

#[derive(Debug, Clone)]
struct PathEntry {
    session_path: Option<PathBuf>,
    expires_at: Instant,
}

/// Short-lived memo of "which session file belongs to this worktree".
#[derive(Debug)]
pub struct SessionPathCache {
    ttl: Duration,
    entries: Mutex<HashMap<(PathBuf, PathBuf), PathEntry>>,
}

/// Outcome of a [`SessionPathCache`] lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedPath {
    /// A previous search found this file and it still exists
    Hit(PathBuf),
    /// A previous search found nothing, and that answer is still fresh
    Absent,
    Miss,
}

impl SessionPathCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, sessions_dir: &Path, worktree: &Path) -> CachedPath {
        let key = (sessions_dir.to_path_buf(), worktree.to_path_buf());

        let entry = match self.entries.lock() {
            Ok(guard) => guard.get(&key).cloned(),
            Err(e) => {
                tracing::warn!("Session path cache lock poisoned: {e}");
                return CachedPath::Miss;
            }
        };
        let Some(entry) = entry else {
            return CachedPath::Miss;
        };

        if Instant::now() >= entry.expires_at {
            self.remove(&key);
            return CachedPath::Miss;
        }

        match entry.session_path {
            None => CachedPath::Absent,
            Some(path) if path.exists() => CachedPath::Hit(path),
            Some(_) => {
                // File vanished since it was cached
                self.remove(&key);
                CachedPath::Miss
            }
        }
    }

    pub fn insert(&self, sessions_dir: &Path, worktree: &Path, session_path: Option<PathBuf>) {
        let key = (sessions_dir.to_path_buf(), worktree.to_path_buf());
        let entry = PathEntry {
            session_path,
            expires_at: Instant::now() + self.ttl,
        };
        match self.entries.lock() {
            Ok(mut guard) => {
                guard.insert(key, entry);
            }
            Err(e) => tracing::warn!("Session path cache lock poisoned: {e}"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|g| g.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, key: &(PathBuf, PathBuf)) {
        if let Ok(mut guard) = self.entries.lock() {
            guard.remove(key);
        }
    }
}

// =============================================================================
// (mtime, size)-validated LRU cache
// =============================================================================

#[derive(Debug, Clone)]
struct MetadataEntry<V> {
    value: V,
    modified: Option<SystemTime>,
    size: u64,
    last_access: Instant,
}

/// Identity of a file's contents as far as the cache is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub modified: Option<SystemTime>,
    pub size: u64,
}

impl FileStamp {
    pub fn of(metadata: &Metadata) -> Self {
        Self {
            modified: metadata.modified().ok(),
            size: metadata.len(),
        }
    }
}

/// Values derived from file contents, keyed by path.
///
/// A lookup only hits when both mtime and size equal what was stored; any
/// difference evicts the entry and reports a miss.
#[derive(Debug)]
pub struct MetadataCache<V> {
    max_entries: usize,
    entries: Mutex<HashMap<PathBuf, MetadataEntry<V>>>,
}

impl<V: Clone> MetadataCache<V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, path: &Path, stamp: FileStamp) -> Option<V> {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!("Metadata cache lock poisoned: {e}");
                return None;
            }
        };

        let matches = guard
            .get(path)
            .map(|entry| entry.modified == stamp.modified && entry.size == stamp.size)?;

        if !matches {
            guard.remove(path);
            return None;
        }

        let entry = guard.get_mut(path)?;
        entry.last_access = Instant::now();
        Some(entry.value.clone())
    }

    pub fn insert(&self, path: &Path, stamp: FileStamp, value: V) {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!("Metadata cache lock poisoned: {e}");
                return;
            }
        };

        guard.insert(
            path.to_path_buf(),
            MetadataEntry {
                value,
                modified: stamp.modified,
                size: stamp.size,
                last_access: Instant::now(),
            },
        );
        Self::prune_locked(&mut guard, self.max_entries);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|g| g.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune_locked(entries: &mut HashMap<PathBuf, MetadataEntry<V>>, max_entries: usize) {
        if entries.len() <= max_entries {
            return;
        }

        let mut by_age: Vec<(PathBuf, Instant)> = entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.last_access))
            .collect();
        by_age.sort_by_key(|(_, last_access)| *last_access);

        let excess = entries.len() - max_entries;
        for (path, _) in by_age.into_iter().take(excess) {
            entries.remove(&path);
        }
    }
}

// =============================================================================
// Bundle
// =============================================================================

/// The process-wide caches, built once by the composition root and shared by
/// reference with every detector.
#[derive(Debug)]
pub struct LocatorCaches {
    /// Codex: (sessions dir, worktree) -> newest matching rollout file
    pub session_paths: SessionPathCache,
    /// Codex: rollout file -> `session_meta.cwd`
    pub session_cwds: MetadataCache<String>,
}

impl LocatorCaches {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            session_paths: SessionPathCache::new(settings.session_path_ttl),
            session_cwds: MetadataCache::new(settings.cwd_max_entries),
        }
    }
}

impl Default for LocatorCaches {
    fn default() -> Self {
        Self::new(CacheSettings::default())
    }
}
