//! sessionwatch - disk-only companion monitor for AI coding-agent sessions
//!
//! This library crate exposes the classifiers, caches and watchers so the
//! binary and integration tests share one implementation.

pub mod agents;
pub mod cache;
pub mod config;
pub mod data;
pub mod watcher;
