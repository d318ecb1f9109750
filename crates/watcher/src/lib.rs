//! Recursive file system watching
//!
//! This crate turns raw platform notifications into a small, reliable event
//! vocabulary:
//! - `created` / `modified` / `deleted` for files
//! - `directory_created` / `directory_deleted` for directories
//! - `ready` once the initial scan is done, `error` for non-fatal faults
//!
//! Duplicate and stale notifications are filtered against a path tracker,
//! deleting a directory reports every tracked descendant first, and lost
//! events (queue overflow) are recovered by rescanning.

pub mod classify;
pub mod config;
pub mod error;
pub mod event;
pub mod ignore;
pub mod platform;
pub mod reconcile;
pub mod scan;
pub mod session;
pub mod subscribe;
pub mod tracker;

pub use config::WatcherConfig;
pub use error::{ErrorCategory, WatchError};
pub use event::{ChangeEvent, ChangeKind, EntryKind, WatchEvent};
pub use ignore::IgnoreConfig;
pub use platform::BackendKind;
pub use session::{SessionState, WatchSession};
pub use subscribe::SubscriptionId;
pub use tracker::PathTracker;
