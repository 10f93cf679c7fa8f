//! Hot/cold session watcher
//!
//! Uses the notify crate for the hot tier and a re-stat poller for the cold
//! tier. Three background tasks run for the watcher's lifetime:
//!
//! - notification consumer: debounces OS events per path and emits one
//!   [`Event`] per settled path
//! - poller: re-stats cold sessions every `cold_poll_interval`
//! - demoter: drops idle sessions from the hot tier every `demotion_interval`
//!
//! The state lock is only held across map/list mutation. Stats and
//! `notify` watch calls happen outside it.

use crate::config::WatcherSettings;
use crate::data::{Event, EventType, SessionInfo, Tier, WatcherStats};
use anyhow::{Context, Result};
use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type IdExtractor = Arc<dyn Fn(&Path) -> String + Send + Sync>;

/// What a [`TieredWatcher`] watches and how it names sessions
#[derive(Clone)]
pub struct TieredWatcherConfig {
    /// Directory put under notification at start (if it exists) and scanned
    /// by [`TieredWatcher::register_from_root`]
    pub root_dir: Option<PathBuf>,
    /// Only paths with this extension produce events (`".jsonl"`; empty = all)
    pub extension: String,
    /// How deep [`TieredWatcher::register_from_root`] descends below the root
    pub scan_depth: usize,
    pub extract_id: IdExtractor,
    pub settings: WatcherSettings,
}

impl TieredWatcherConfig {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            root_dir: None,
            extension: extension.into(),
            scan_depth: 1,
            extract_id: Arc::new(file_stem_id),
            settings: WatcherSettings::default(),
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(root.into());
        self
    }

    pub fn with_scan_depth(mut self, depth: usize) -> Self {
        self.scan_depth = depth;
        self
    }

    pub fn with_id_extractor<F>(mut self, extract: F) -> Self
    where
        F: Fn(&Path) -> String + Send + Sync + 'static,
    {
        self.extract_id = Arc::new(extract);
        self
    }

    pub fn with_settings(mut self, settings: WatcherSettings) -> Self {
        self.settings = settings;
        self
    }

    fn matches_extension(&self, path: &Path) -> bool {
        let wanted = self.extension.trim_start_matches('.');
        if wanted.is_empty() {
            return true;
        }
        path.extension().is_some_and(|ext| ext == wanted)
    }
}

impl std::fmt::Debug for TieredWatcherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredWatcherConfig")
            .field("root_dir", &self.root_dir)
            .field("extension", &self.extension)
            .field("scan_depth", &self.scan_depth)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Default session id: file name without extension
pub fn file_stem_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Every file under `root` (up to `scan_depth` levels) with the configured
/// extension, with its current metadata. Unreadable entries are skipped.
pub fn scan_sessions(root: &Path, config: &TieredWatcherConfig) -> Vec<SessionInfo> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .max_depth(config.scan_depth.max(1))
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && config.matches_extension(e.path()))
        .map(|e| {
            let path = e.path().to_path_buf();
            let mut info = SessionInfo::new((config.extract_id)(&path), path);
            if let Ok(meta) = e.metadata() {
                info.modified = meta.modified().ok();
                info.size = meta.len();
            }
            info
        })
        .collect()
}

#[derive(Default)]
struct State {
    sessions: HashMap<String, SessionInfo>,
    /// Hot session ids in promotion order
    hot_ids: Vec<String>,
    watch_dirs: HashSet<PathBuf>,
    /// `None` once closed
    events: Option<mpsc::Sender<Event>>,
}

impl State {
    /// Queue `event` without blocking. Called with the state lock held so a
    /// concurrent close either precedes the send or follows it.
    fn emit(&self, event: Event) {
        let Some(sender) = self.events.as_ref() else {
            return;
        };
        if let Err(e) = sender.try_send(event) {
            tracing::debug!("dropped watcher event: {}", e);
        }
    }

    fn is_hot(&self, id: &str) -> bool {
        self.hot_ids.iter().any(|h| h == id)
    }

    /// Mark `id` hot. Returns the directory to put under notification if it
    /// is not watched yet.
    fn promote(&mut self, id: &str, max_hot: usize) -> Option<PathBuf> {
        let info = self.sessions.get_mut(id)?;
        info.last_hot = Some(Instant::now());
        let dir = info.path.parent().map(Path::to_path_buf);

        if !self.is_hot(id) {
            self.hot_ids.push(id.to_string());
            while self.hot_ids.len() > max_hot.max(1) {
                if !self.evict_oldest(id) {
                    break;
                }
            }
        }

        dir.filter(|d| !self.watch_dirs.contains(d))
    }

    /// Drop the hot session that became hot longest ago, never `keep`.
    /// Ties go to the earliest promoted.
    fn evict_oldest(&mut self, keep: &str) -> bool {
        let mut oldest: Option<(usize, Option<Instant>)> = None;
        for (idx, id) in self.hot_ids.iter().enumerate() {
            if id == keep {
                continue;
            }
            let last_hot = self.sessions.get(id).and_then(|s| s.last_hot);
            match oldest {
                Some((_, best)) if last_hot >= best => {}
                _ => oldest = Some((idx, last_hot)),
            }
        }

        match oldest {
            Some((idx, _)) => {
                let evicted = self.hot_ids.remove(idx);
                tracing::debug!("evicted {} to cold tier", evicted);
                true
            }
            None => false,
        }
    }

    fn stats(&self) -> WatcherStats {
        WatcherStats {
            hot: self.hot_ids.len(),
            cold: self.sessions.len().saturating_sub(self.hot_ids.len()),
            watched_dirs: self.watch_dirs.len(),
        }
    }
}

struct Shared {
    config: TieredWatcherConfig,
    state: Mutex<State>,
    notifier: Mutex<Option<RecommendedWatcher>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn relock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("tiered watcher {what} lock poisoned; continuing");
        poisoned.into_inner()
    })
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        relock(&self.state, "state")
    }

    fn watch_dir(&self, dir: &Path) {
        let result = match relock(&self.notifier, "notifier").as_mut() {
            Some(notifier) => notifier.watch(dir, RecursiveMode::NonRecursive),
            None => return,
        };

        match result {
            Ok(()) => {
                self.state().watch_dirs.insert(dir.to_path_buf());
            }
            Err(e) => tracing::debug!("cannot watch {}: {}", dir.display(), e),
        }
    }


    fn promote_to_hot(&self, id: &str) {
        let dir = {
            let mut state = self.state();
            if state.events.is_none() {
                return;
            }
            state.promote(id, self.config.settings.max_hot_sessions)
        };
        if let Some(dir) = dir {
            self.watch_dir(&dir);
        }
    }

    fn register_sessions(&self, sessions: Vec<SessionInfo>) {
        let sessions: Vec<SessionInfo> = sessions
            .into_iter()
            .map(|mut s| {
                if s.modified.is_none() {
                    if let Ok(meta) = fs::metadata(&s.path) {
                        s.modified = meta.modified().ok();
                        s.size = meta.len();
                    }
                }
                s.last_hot = None;
                s
            })
            .collect();

        let max_hot = self.config.settings.max_hot_sessions;
        let dirs: Vec<PathBuf> = {
            let mut state = self.state();
            if state.events.is_none() {
                return;
            }
            for session in sessions {
                state.sessions.entry(session.id.clone()).or_insert(session);
            }

            let mut ranked: Vec<(Option<SystemTime>, String)> = state
                .sessions
                .values()
                .map(|s| (s.modified, s.id.clone()))
                .collect();
            ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

            let mut dirs = Vec::new();
            for (_, id) in ranked.into_iter().take(max_hot) {
                if let Some(dir) = state.promote(&id, max_hot) {
                    if !dirs.contains(&dir) {
                        dirs.push(dir);
                    }
                }
            }
            dirs
        };

        for dir in dirs {
            self.watch_dir(&dir);
        }
    }

    /// Re-stat cold sessions; returns how many changed
    fn poll_cold_sessions(&self) -> usize {
        let to_check: Vec<(String, PathBuf, Option<SystemTime>, u64)> = {
            let state = self.state();
            if state.events.is_none() {
                return 0;
            }
            state
                .sessions
                .values()
                .filter(|s| !state.is_hot(&s.id))
                .map(|s| (s.id.clone(), s.path.clone(), s.modified, s.size))
                .collect()
        };

        let mut changed = 0;
        for (id, path, prev_modified, prev_size) in to_check {
            let Ok(meta) = fs::metadata(&path) else {
                continue;
            };
            let modified = meta.modified().ok();
            let advanced = match (modified, prev_modified) {
                (Some(now), Some(prev)) => now > prev,
                (Some(_), None) => true,
                _ => false,
            };
            if !advanced && meta.len() == prev_size {
                continue;
            }

            let mut state = self.state();
            if state.events.is_none() {
                break;
            }
            if let Some(info) = state.sessions.get_mut(&id) {
                info.modified = modified;
                info.size = meta.len();
            }
            state.emit(Event::new(EventType::SessionUpdated, id));
            changed += 1;
        }
        changed
    }

    /// Move hot sessions idle past the inactivity timeout back to cold
    fn demote_inactive(&self) -> usize {
        let timeout = self.config.settings.hot_inactivity_timeout;
        let now = Instant::now();

        let mut state = self.state();
        let State {
            sessions, hot_ids, ..
        } = &mut *state;
        let before = hot_ids.len();
        hot_ids.retain(|id| {
            sessions
                .get(id)
                .and_then(|s| s.last_hot)
                .is_some_and(|t| now.saturating_duration_since(t) < timeout)
        });
        let demoted = before - hot_ids.len();
        if demoted > 0 {
            tracing::debug!("demoted {} idle hot session(s)", demoted);
        }
        demoted
    }

    /// A debounced path settled: refresh known metadata, emit one event.
    /// A path gone by now emits nothing.
    fn settle(&self, path: &Path, event_type: EventType) {
        let Ok(meta) = fs::metadata(path) else {
            tracing::debug!("{} vanished before settling", path.display());
            return;
        };
        let id = (self.config.extract_id)(path);

        let mut state = self.state();
        if let Some(info) = state.sessions.get_mut(&id) {
            info.modified = meta.modified().ok();
            info.size = meta.len();
        }
        state.emit(Event::new(event_type, id));
    }
}

/// What a raw notification does to a path's pending entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingChange {
    Arm(EventType),
    Cancel,
}

/// `None` for kinds that never reach the debounce map
fn pending_change_for(kind: &EventKind) -> Option<PendingChange> {
    match kind {
        EventKind::Create(_) => Some(PendingChange::Arm(EventType::SessionCreated)),
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            Some(PendingChange::Arm(EventType::MessageAdded))
        }
        EventKind::Remove(_) => Some(PendingChange::Cancel),
        EventKind::Access(_) => None,
        _ => Some(PendingChange::Arm(EventType::SessionUpdated)),
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Debounce raw notifications per path and settle them
async fn consume_notifications(
    shared: Weak<Shared>,
    mut raw: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    debounce: Duration,
) {
    let mut pending: HashMap<PathBuf, (tokio::time::Instant, EventType)> = HashMap::new();

    loop {
        let next_deadline = pending.values().map(|(deadline, _)| *deadline).min();

        tokio::select! {
            received = raw.recv() => {
                let Some(result) = received else {
                    break;
                };
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::debug!("notify error: {}", e);
                        continue;
                    }
                };
                let Some(change) = pending_change_for(&event.kind) else {
                    continue;
                };
                let Some(shared) = shared.upgrade() else {
                    break;
                };

                let deadline = tokio::time::Instant::now() + debounce;
                for path in event.paths {
                    if !shared.config.matches_extension(&path) {
                        continue;
                    }
                    match change {
                        // The burst ends with the file gone: nothing to report.
                        PendingChange::Cancel => {
                            pending.remove(&path);
                        }
                        PendingChange::Arm(event_type) => {
                            pending
                                .entry(path)
                                .and_modify(|(d, t)| {
                                    *d = deadline;
                                    if *t != EventType::SessionCreated {
                                        *t = event_type;
                                    }
                                })
                                .or_insert((deadline, event_type));
                        }
                    }
                }
            }
            _ = sleep_until(next_deadline) => {
                let now = tokio::time::Instant::now();
                let due: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, (deadline, _))| *deadline <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                for path in due {
                    if let Some((_, event_type)) = pending.remove(&path) {
                        shared.settle(&path, event_type);
                    }
                }
            }
        }
    }
}

fn timer(period: Duration) -> tokio::time::Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}

async fn poll_loop(shared: Weak<Shared>, period: Duration) {
    let mut ticker = timer(period);
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let changed = tokio::task::spawn_blocking(move || shared.poll_cold_sessions()).await;
        if let Ok(n) = changed {
            if n > 0 {
                tracing::debug!("cold poll: {} session(s) changed", n);
            }
        }
    }
}

async fn demotion_loop(shared: Weak<Shared>, period: Duration) {
    let mut ticker = timer(period);
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.demote_inactive();
    }
}

/// Watcher that keeps a few sessions on live notification and polls the rest
pub struct TieredWatcher {
    shared: Arc<Shared>,
}

impl TieredWatcher {
    /// Start a watcher and its background tasks.
    ///
    /// Must be called from within a tokio runtime. The returned receiver
    /// yields `None` once the watcher is closed.
    pub fn new(config: TieredWatcherConfig) -> Result<(Self, mpsc::Receiver<Event>)> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("tiered watcher must be started inside a tokio runtime")?;

        let settings = config.settings;
        let (events_tx, events_rx) = mpsc::channel(settings.event_buffer.max(1));
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        let notifier = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )
        .context("failed to create file watcher")?;

        let root_dir = config.root_dir.clone();
        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(State {
                events: Some(events_tx),
                ..State::default()
            }),
            notifier: Mutex::new(Some(notifier)),
            tasks: Mutex::new(Vec::new()),
        });

        if let Some(root) = root_dir.filter(|r| r.is_dir()) {
            shared.watch_dir(&root);
        }

        let weak = Arc::downgrade(&shared);
        let tasks = vec![
            runtime.spawn(consume_notifications(
                weak.clone(),
                raw_rx,
                settings.debounce_delay,
            )),
            runtime.spawn(poll_loop(weak.clone(), settings.cold_poll_interval)),
            runtime.spawn(demotion_loop(weak, settings.demotion_interval)),
        ];
        *relock(&shared.tasks, "tasks") = tasks;

        tracing::info!(
            "tiered watcher started (root: {})",
            shared
                .config
                .root_dir
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        );

        Ok((Self { shared }, events_rx))
    }

    pub fn config(&self) -> &TieredWatcherConfig {
        &self.shared.config
    }

    /// Track a session in the cold tier; no-op if the id is already known
    pub fn register_session(&self, id: impl Into<String>, path: impl Into<PathBuf>) {
        let mut info = SessionInfo::new(id, path);
        if let Ok(meta) = fs::metadata(&info.path) {
            info.modified = meta.modified().ok();
            info.size = meta.len();
        }

        let mut state = self.shared.state();
        if state.events.is_none() {
            return;
        }
        state.sessions.entry(info.id.clone()).or_insert(info);
    }

    /// Track a batch of sessions, then promote the most recently modified
    /// ones (up to `max_hot_sessions`) across everything known
    pub fn register_sessions(&self, sessions: Vec<SessionInfo>) {
        self.shared.register_sessions(sessions);
    }

    /// Scan the root directory and register every matching file.
    /// Returns the number of files found.
    pub fn register_from_root(&self) -> usize {
        let Some(root) = self.shared.config.root_dir.as_deref() else {
            return 0;
        };
        let sessions = scan_sessions(root, &self.shared.config);
        let found = sessions.len();
        self.register_sessions(sessions);
        found
    }

    /// Move a known session to the hot tier (refreshing its hot timestamp if
    /// already hot). Unknown ids are ignored.
    pub fn promote_to_hot(&self, id: &str) {
        self.shared.promote_to_hot(id);
    }

    /// Hot session ids in promotion order
    pub fn hot_sessions(&self) -> Vec<String> {
        self.shared.state().hot_ids.clone()
    }

    pub fn tier(&self, id: &str) -> Option<Tier> {
        let state = self.shared.state();
        state.sessions.get(id)?;
        Some(if state.is_hot(id) { Tier::Hot } else { Tier::Cold })
    }

    pub fn session(&self, id: &str) -> Option<SessionInfo> {
        self.shared.state().sessions.get(id).cloned()
    }

    pub fn stats(&self) -> WatcherStats {
        self.shared.state().stats()
    }

    /// One poller pass; returns how many cold sessions changed
    pub fn poll_cold_sessions(&self) -> usize {
        self.shared.poll_cold_sessions()
    }

    /// One demoter pass; returns how many sessions went cold
    pub fn demote_inactive(&self) -> usize {
        self.shared.demote_inactive()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().events.is_none()
    }

    /// Stop the background tasks, release the OS watcher and close the event
    /// queue. Safe to call more than once.
    ///
    /// A poll pass already running on the blocking pool cannot be aborted; it
    /// finishes its stats but sends nothing once this returns.
    pub fn close(&self) -> Result<()> {
        let sender = self.shared.state().events.take();
        if sender.is_none() {
            return Ok(());
        }

        for task in relock(&self.shared.tasks, "tasks").drain(..) {
            task.abort();
        }
        relock(&self.shared.notifier, "notifier").take();
        drop(sender);

        tracing::info!("tiered watcher closed");
        Ok(())
    }
}

impl Drop for TieredWatcher {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
