//! Public event types delivered to subscribers

use crate::error::WatchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of a tracked filesystem node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    /// Classify from filesystem metadata (symlinks count as files)
    pub fn from_file_type(file_type: std::fs::FileType) -> Self {
        if file_type.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }

    pub fn is_dir(self) -> bool {
        self == EntryKind::Directory
    }

    /// Change kind reported when an entry of this kind appears
    pub fn created(self) -> ChangeKind {
        match self {
            EntryKind::File => ChangeKind::Created,
            EntryKind::Directory => ChangeKind::DirectoryCreated,
        }
    }

    /// Change kind reported when an entry of this kind disappears
    pub fn deleted(self) -> ChangeKind {
        match self {
            EntryKind::File => ChangeKind::Deleted,
            EntryKind::Directory => ChangeKind::DirectoryDeleted,
        }
    }
}

/// Type of a normalized change
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// File created
    Created,
    /// File contents or metadata modified
    Modified,
    /// File deleted
    Deleted,
    /// Directory created
    DirectoryCreated,
    /// Directory deleted
    DirectoryDeleted,
}

impl ChangeKind {
    /// All change kinds, in declaration order
    pub const ALL: [ChangeKind; 5] = [
        ChangeKind::Created,
        ChangeKind::Modified,
        ChangeKind::Deleted,
        ChangeKind::DirectoryCreated,
        ChangeKind::DirectoryDeleted,
    ];

    /// Short human label
    pub fn label(self) -> &'static str {
        match self {
            ChangeKind::Created => "added",
            ChangeKind::Modified => "changed",
            ChangeKind::Deleted => "removed",
            ChangeKind::DirectoryCreated => "directory added",
            ChangeKind::DirectoryDeleted => "directory removed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A normalized filesystem change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Type of change
    pub kind: ChangeKind,
    /// Absolute path that changed
    pub path: PathBuf,
    /// When the change was classified
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Create an event stamped with the current time
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Everything a session can deliver to a subscriber
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// Initial scan finished; fires once per session
    Ready,
    /// A normalized change
    Change(ChangeEvent),
    /// A fault that did not stop the session (or a startup failure)
    Error(WatchError),
}

impl WatchEvent {
    /// The change carried by this event, if any
    pub fn as_change(&self) -> Option<&ChangeEvent> {
        match self {
            WatchEvent::Change(change) => Some(change),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, WatchEvent::Ready)
    }
}

impl From<ChangeEvent> for WatchEvent {
    fn from(change: ChangeEvent) -> Self {
        WatchEvent::Change(change)
    }
}

impl From<WatchError> for WatchEvent {
    fn from(err: WatchError) -> Self {
        WatchEvent::Error(err)
    }
}
