//! In-memory mirror of what the session believes exists under its roots

use crate::event::EntryKind;
use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Last-seen metadata used to tell a real modification from a touch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryMeta {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

impl EntryMeta {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        }
    }
}

/// One known filesystem node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEntry {
    pub kind: EntryKind,
    pub meta: EntryMeta,
}

/// Set of known entries under the watch roots
///
/// Entries live in a `BTreeMap` keyed by path. `Path` orders component-wise,
/// so a directory and all of its descendants form one contiguous range that
/// starts at the directory itself.
#[derive(Debug, Default)]
pub struct PathTracker {
    roots: Vec<PathBuf>,
    entries: BTreeMap<PathBuf, TrackedEntry>,
}

impl PathTracker {
    /// Create an empty tracker for the given roots
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            entries: BTreeMap::new(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Innermost root containing `path`
    pub fn root_for(&self, path: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(|root| root.as_path())
    }

    /// Whether `path` is a root or lies under one
    pub fn contains(&self, path: &Path) -> bool {
        self.root_for(path).is_some()
    }

    /// Register an entry
    ///
    /// Returns false when nothing changed: the path is outside every root or
    /// is already tracked with the same kind. A kind change replaces the old
    /// entry along with any descendants it had as a directory.
    pub fn record_entry(&mut self, path: &Path, kind: EntryKind, meta: EntryMeta) -> bool {
        if !self.contains(path) {
            return false;
        }

        match self.entries.get(path).map(|e| e.kind) {
            Some(existing) if existing == kind => false,
            Some(_) => {
                self.forget_entry(path);
                self.entries
                    .insert(path.to_path_buf(), TrackedEntry { kind, meta });
                true
            }
            None => {
                self.entries
                    .insert(path.to_path_buf(), TrackedEntry { kind, meta });
                true
            }
        }
    }

    /// Remove an entry and every tracked descendant
    ///
    /// Returns the removed paths deepest first, `path` itself last. Forgetting
    /// an untracked path returns nothing.
    pub fn forget_entry(&mut self, path: &Path) -> Vec<(PathBuf, EntryKind)> {
        let Some(root_entry) = self.entries.get(path) else {
            return Vec::new();
        };

        let doomed: Vec<PathBuf> = if root_entry.kind.is_dir() {
            self.paths_under(path).cloned().collect()
        } else {
            vec![path.to_path_buf()]
        };

        // Pre-order reversed is post-order: children before their parent
        doomed
            .into_iter()
            .rev()
            .filter_map(|p| {
                let entry = self.entries.remove(&p)?;
                Some((p, entry.kind))
            })
            .collect()
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &Path) -> Option<&TrackedEntry> {
        self.entries.get(path)
    }

    /// Store fresh metadata; returns true if it differs from what was known
    pub fn update_meta(&mut self, path: &Path, meta: EntryMeta) -> bool {
        match self.entries.get_mut(path) {
            Some(entry) if entry.meta != meta => {
                entry.meta = meta;
                true
            }
            _ => false,
        }
    }

    /// `path` (if tracked) and all tracked descendants, in pre-order
    pub fn paths_under<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a PathBuf> + 'a {
        self.entries
            .range::<Path, _>((std::ops::Bound::Included(path), std::ops::Bound::Unbounded))
            .map(|(p, _)| p)
            .take_while(move |p| p.starts_with(path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
