//! Tiered session file watching
//!
//! Agents can leave thousands of session files behind. Watching every one of
//! them with OS notifications exhausts file descriptors, so sessions are split
//! into two tiers:
//!
//! ```text
//!            register                 promote / auto-promote
//!   (new) ───────────────▶  COLD  ─────────────────────────▶  HOT
//!                            ▲   polled every 30s              │ dir under notify
//!                            │                                 │
//!                            └──── evicted past capacity ──────┘
//!                                  or idle > 5 min (demoter)
//! ```
//!
//! A [`TieredWatcher`] covers one session directory tree; a [`WatcherManager`]
//! fans several of them into one event queue.

pub mod manager;
pub mod tiered;

pub use manager::WatcherManager;
pub use tiered::{scan_sessions, TieredWatcher, TieredWatcherConfig};
