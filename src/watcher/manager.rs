//! Fan-in of several tiered watchers
//!
//! Each adapter (agent format) owns one [`TieredWatcher`]. The manager merges
//! their event queues into one bounded queue, broadcasts promotions, sums
//! statistics and shuts everything down in order.

use super::tiered::TieredWatcher;
use crate::config::MANAGER_EVENT_BUFFER;
use crate::data::{Event, WatcherStats};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

#[derive(Default)]
struct ManagerState {
    watchers: HashMap<String, Arc<TieredWatcher>>,
    forwarders: Vec<JoinHandle<()>>,
    closed: bool,
    events: Option<mpsc::Sender<Event>>,
}

struct ManagerShared {
    state: Mutex<ManagerState>,
}

impl ManagerShared {
    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("watcher manager lock poisoned; continuing");
            poisoned.into_inner()
        })
    }
}

async fn forward(
    shared: Weak<ManagerShared>,
    adapter_id: String,
    mut events: mpsc::Receiver<Event>,
) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let sender = {
            let state = shared.state();
            if state.closed {
                break;
            }
            state.events.clone()
        };
        let Some(sender) = sender else {
            break;
        };

        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::debug!("{}: dropped event for {}", adapter_id, event.session_id);
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }
}

/// Owns named tiered watchers and merges their events
pub struct WatcherManager {
    shared: Arc<ManagerShared>,
}

impl WatcherManager {
    pub fn new() -> (Self, mpsc::Receiver<Event>) {
        Self::with_capacity(MANAGER_EVENT_BUFFER)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shared = Arc::new(ManagerShared {
            state: Mutex::new(ManagerState {
                events: Some(tx),
                ..ManagerState::default()
            }),
        });
        (Self { shared }, rx)
    }

    /// Take ownership of a watcher and forward its events.
    ///
    /// A watcher added after [`close`](Self::close) is closed immediately. An
    /// existing watcher under the same adapter id is replaced and closed.
    pub fn add_watcher(
        &self,
        adapter_id: impl Into<String>,
        watcher: TieredWatcher,
        events: mpsc::Receiver<Event>,
    ) -> Result<()> {
        let adapter_id = adapter_id.into();
        let runtime = tokio::runtime::Handle::try_current()
            .context("watcher manager must be used inside a tokio runtime")?;

        let watcher = Arc::new(watcher);
        let replaced = {
            let mut state = self.shared.state();
            if state.closed {
                drop(state);
                return watcher
                    .close()
                    .with_context(|| format!("closing late watcher {adapter_id}"));
            }

            let forwarder = runtime.spawn(forward(
                Arc::downgrade(&self.shared),
                adapter_id.clone(),
                events,
            ));
            state.forwarders.push(forwarder);
            state.watchers.insert(adapter_id.clone(), watcher)
        };

        if let Some(old) = replaced {
            tracing::warn!("replacing watcher for adapter {}", adapter_id);
            old.close()?;
        }
        Ok(())
    }

    pub fn watcher(&self, adapter_id: &str) -> Option<Arc<TieredWatcher>> {
        self.shared.state().watchers.get(adapter_id).cloned()
    }

    /// Adapter ids in sorted order
    pub fn adapter_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.state().watchers.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn watchers(&self) -> Vec<Arc<TieredWatcher>> {
        self.shared.state().watchers.values().cloned().collect()
    }

    /// Ask every watcher to promote `session_id`; only the one tracking it
    /// reacts
    pub fn promote_session(&self, session_id: &str) {
        for watcher in self.watchers() {
            watcher.promote_to_hot(session_id);
        }
    }

    /// Register a session with the watcher of `adapter_id` (no-op for an
    /// unknown adapter)
    pub fn register_session(
        &self,
        adapter_id: &str,
        session_id: impl Into<String>,
        path: impl Into<PathBuf>,
    ) {
        match self.watcher(adapter_id) {
            Some(watcher) => watcher.register_session(session_id, path),
            None => tracing::debug!("no watcher for adapter {}", adapter_id),
        }
    }

    /// Sum of every watcher's statistics
    pub fn stats(&self) -> WatcherStats {
        let mut total = WatcherStats::default();
        for watcher in self.watchers() {
            total += watcher.stats();
        }
        total
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().closed
    }

    /// Stop accepting work, close every watcher, close the merged queue.
    /// Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        let (watchers, forwarders, sender) = {
            let mut state = self.shared.state();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            (
                std::mem::take(&mut state.watchers),
                std::mem::take(&mut state.forwarders),
                state.events.take(),
            )
        };

        let mut first_error = None;
        for (adapter_id, watcher) in watchers {
            if let Err(e) = watcher.close() {
                tracing::warn!("closing watcher {}: {:#}", adapter_id, e);
                first_error.get_or_insert(e);
            }
        }
        for forwarder in forwarders {
            forwarder.abort();
        }
        drop(sender);

        tracing::info!("watcher manager closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for WatcherManager {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
