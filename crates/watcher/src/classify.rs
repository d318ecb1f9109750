//! Raw notification classification
//!
//! Turns backend hints into normalized change events by consulting and
//! updating the path tracker. Every decision is made against the tracker
//! state left by the previous notification, so events for one path come out
//! in the order the backend delivered them.

use crate::event::{ChangeEvent, ChangeKind, EntryKind, WatchEvent};
use crate::ignore::IgnoreRules;
use crate::platform::RawEvent;
use crate::reconcile::reconcile;
use crate::scan::{probe, scan_tree, ScannedEntry};
use crate::tracker::{EntryMeta, PathTracker};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, trace};

/// Event classification state machine
pub struct Classifier {
    tracker: PathTracker,
    ignore: Arc<IgnoreRules>,
}

impl Classifier {
    pub fn new(roots: Vec<PathBuf>, ignore: Arc<IgnoreRules>) -> Self {
        Self {
            tracker: PathTracker::new(roots),
            ignore,
        }
    }

    pub fn tracker(&self) -> &PathTracker {
        &self.tracker
    }

    /// Record the initial scan
    ///
    /// Returns a creation event for every new entry except the roots.
    pub fn seed(&mut self, entries: Vec<ScannedEntry>) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        for entry in entries {
            if self.tracker.record_entry(&entry.path, entry.kind, entry.meta)
                && !self.is_root(&entry.path)
            {
                events.push(ChangeEvent::new(entry.kind.created(), entry.path));
            }
        }
        debug!("Seeded tracker with {} entries", self.tracker.len());
        events
    }

    /// Classify one raw notification
    pub fn apply(&mut self, raw: RawEvent) -> Vec<WatchEvent> {
        trace!("Raw event: {:?}", raw);
        match raw {
            RawEvent::Created { path, kind } => {
                if let Some(hint) = kind {
                    trace!("Backend reports {} as {:?}", path.display(), hint);
                }
                self.on_created(&path)
            }
            RawEvent::Modified { path } => self.on_modified(&path),
            RawEvent::Removed { path } => self.on_removed(&path),
            RawEvent::Unknown { path } => {
                if probe(&path).is_some() {
                    self.on_created(&path)
                } else {
                    self.on_removed(&path)
                }
            }
            RawEvent::Rescan { path } => self.rescan(path.as_deref()),
        }
    }

    fn on_created(&mut self, path: &Path) -> Vec<WatchEvent> {
        // The disk is authoritative: the entry may already be gone again
        let Some((kind, meta)) = probe(path) else {
            trace!("Stale creation suppressed: {}", path.display());
            return Vec::new();
        };

        if !self.admits(path, kind.is_dir()) {
            return Vec::new();
        }

        let mut events = Vec::new();
        match self.tracker.get(path).map(|e| e.kind) {
            Some(known) if known == kind => return self.check_modified(path, kind, meta),
            Some(_) => {
                // Replaced by a node of another kind
                events.extend(self.forget(path));
            }
            None => {}
        }

        events.extend(self.record_ancestors(path));
        self.tracker.record_entry(path, kind, meta);
        if !self.is_root(path) {
            events.push(ChangeEvent::new(kind.created(), path).into());
        }

        if kind.is_dir() {
            events.extend(self.adopt_subtree(path));
        }
        events
    }

    fn on_modified(&mut self, path: &Path) -> Vec<WatchEvent> {
        let Some(known) = self.tracker.get(path).map(|e| e.kind) else {
            trace!("Stale modification suppressed: {}", path.display());
            return Vec::new();
        };

        match probe(path) {
            // A removal notification is on its way
            None => Vec::new(),
            Some((kind, meta)) if kind == known => self.check_modified(path, kind, meta),
            Some(_) => self.on_created(path),
        }
    }

    fn on_removed(&mut self, path: &Path) -> Vec<WatchEvent> {
        if probe(path).is_some() {
            // Recreated before we got here; treat like any other appearance
            trace!("Removal of existing path treated as change: {}", path.display());
            return self.on_created(path);
        }

        let events = self.forget(path);
        if events.is_empty() {
            trace!("Duplicate or untracked removal: {}", path.display());
        }
        events
    }

    /// Compare fresh metadata against the tracker; files only
    fn check_modified(&mut self, path: &Path, kind: EntryKind, meta: EntryMeta) -> Vec<WatchEvent> {
        let changed = self.tracker.update_meta(path, meta);
        if changed && !kind.is_dir() {
            vec![ChangeEvent::new(ChangeKind::Modified, path).into()]
        } else {
            trace!("Unchanged metadata, no event: {}", path.display());
            Vec::new()
        }
    }

    fn forget(&mut self, path: &Path) -> Vec<WatchEvent> {
        self.tracker
            .forget_entry(path)
            .into_iter()
            .map(|(removed, kind)| ChangeEvent::new(kind.deleted(), removed).into())
            .collect()
    }

    /// Record untracked directories between the root and `path`, outermost first
    fn record_ancestors(&mut self, path: &Path) -> Vec<WatchEvent> {
        let Some(root) = self.tracker.root_for(path).map(Path::to_path_buf) else {
            return Vec::new();
        };

        let mut missing: Vec<PathBuf> = path
            .ancestors()
            .skip(1)
            .take_while(|a| a.starts_with(&root))
            .filter(|a| !self.tracker.is_tracked(a))
            .map(Path::to_path_buf)
            .collect();
        missing.reverse();

        let mut events = Vec::new();
        for dir in missing {
            if let Some((EntryKind::Directory, meta)) = probe(&dir) {
                self.tracker.record_entry(&dir, EntryKind::Directory, meta);
                if dir != root {
                    events.push(ChangeEvent::new(ChangeKind::DirectoryCreated, dir).into());
                }
            }
        }
        events
    }

    /// Report contents of a directory that appeared with children already inside
    fn adopt_subtree(&mut self, dir: &Path) -> Vec<WatchEvent> {
        let never = AtomicBool::new(false);
        let Some(outcome) = scan_tree(dir, &self.ignore, &never) else {
            return Vec::new();
        };

        // Errors only matter if the directory is still there
        let mut events: Vec<WatchEvent> = if probe(dir).is_some() {
            outcome.errors.into_iter().map(WatchEvent::Error).collect()
        } else {
            Vec::new()
        };
        for entry in outcome.entries.into_iter().skip(1) {
            if self.tracker.record_entry(&entry.path, entry.kind, entry.meta) {
                events.push(ChangeEvent::new(entry.kind.created(), entry.path).into());
            }
        }
        events
    }

    /// Reconcile after the backend reported lost events
    fn rescan(&mut self, path: Option<&Path>) -> Vec<WatchEvent> {
        let scopes: Vec<PathBuf> = match path.and_then(|p| self.tracker.root_for(p)) {
            Some(root) => vec![root.to_path_buf()],
            None => self.tracker.roots().to_vec(),
        };

        let never = AtomicBool::new(false);
        let mut events = Vec::new();
        for scope in scopes {
            debug!("Rescanning {}", scope.display());
            let Some(outcome) = scan_tree(&scope, &self.ignore, &never) else {
                continue;
            };
            events.extend(outcome.errors.into_iter().map(WatchEvent::Error));
            events.extend(
                reconcile(&mut self.tracker, &scope, &outcome.entries)
                    .into_iter()
                    .map(WatchEvent::Change),
            );
        }
        events
    }

    /// Inside a root and not ignored
    fn admits(&self, path: &Path, is_dir: bool) -> bool {
        if !self.tracker.contains(path) {
            trace!("Outside watch roots: {}", path.display());
            return false;
        }
        if self.ignore.should_ignore(path, is_dir) {
            trace!("Ignored: {}", path.display());
            return false;
        }
        true
    }

    fn is_root(&self, path: &Path) -> bool {
        self.tracker.roots().iter().any(|r| r == path)
    }
}
