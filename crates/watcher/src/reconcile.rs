//! Reconciliation of the tracker against a fresh scan
//!
//! Backends drop events when their queues overflow (inotify IN_Q_OVERFLOW,
//! FSEvents "must scan subdirs"). When that happens the affected tree is
//! rescanned and the difference is reported as ordinary change events.

use crate::event::{ChangeEvent, ChangeKind};
use crate::scan::ScannedEntry;
use crate::tracker::PathTracker;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bring the tracker in line with `scanned` for everything under `scope`
///
/// Emits deletions for vanished entries (deepest first), then creations and
/// modifications in scan order. Roots are never announced as created.
pub fn reconcile(
    tracker: &mut PathTracker,
    scope: &Path,
    scanned: &[ScannedEntry],
) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    let on_disk: HashMap<&Path, &ScannedEntry> =
        scanned.iter().map(|e| (e.path.as_path(), e)).collect();

    // 1. Entries that vanished or changed kind
    let vanished: Vec<PathBuf> = tracker
        .paths_under(scope)
        .filter(|p| match (on_disk.get(p.as_path()), tracker.get(p)) {
            (Some(found), Some(known)) => found.kind != known.kind,
            _ => true,
        })
        .cloned()
        .collect();

    for path in vanished {
        // Already gone if an ancestor was forgotten first
        for (removed, kind) in tracker.forget_entry(&path) {
            events.push(ChangeEvent::new(kind.deleted(), removed));
        }
    }

    // 2. New and modified entries
    for entry in scanned {
        let known = tracker.get(&entry.path).map(|k| (k.kind, k.meta));
        match known {
            None => {
                let is_root = tracker.roots().iter().any(|r| r == &entry.path);
                if tracker.record_entry(&entry.path, entry.kind, entry.meta) && !is_root {
                    events.push(ChangeEvent::new(entry.kind.created(), entry.path.clone()));
                }
            }
            Some((kind, meta)) if !kind.is_dir() && meta != entry.meta => {
                tracker.update_meta(&entry.path, entry.meta);
                events.push(ChangeEvent::new(ChangeKind::Modified, entry.path.clone()));
            }
            Some(_) => {
                tracker.update_meta(&entry.path, entry.meta);
            }
        }
    }

    if events.is_empty() {
        debug!("Reconciliation of {}: no missed changes", scope.display());
    } else {
        info!(
            "Reconciliation of {} found {} missed changes",
            scope.display(),
            events.len()
        );
    }

    events
}
