//! Recursive enumeration of watch roots
//!
//! Used for the initial scan, for directories that appear while watching,
//! and for rescans after the backend reports lost events.

use crate::error::WatchError;
use crate::event::EntryKind;
use crate::ignore::IgnoreRules;
use crate::tracker::EntryMeta;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// One entry found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub meta: EntryMeta,
}

/// Result of walking one tree
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Entries in pre-order (a directory before its contents), `root` first
    pub entries: Vec<ScannedEntry>,
    /// Unreadable entries; the walk continues past them
    pub errors: Vec<WatchError>,
}

/// Walk `root` without following symlinks, pruning ignored subtrees
///
/// Returns `None` as soon as `cancel` is set.
pub fn scan_tree(root: &Path, ignore: &IgnoreRules, cancel: &AtomicBool) -> Option<ScanOutcome> {
    let mut outcome = ScanOutcome::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !ignore.should_ignore(e.path(), e.file_type().is_dir()));

    for entry in walker {
        if cancel.load(Ordering::Relaxed) {
            debug!("Scan of {} cancelled", root.display());
            return None;
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                trace!("Scan error under {}: {}", root.display(), e);
                outcome.errors.push(e.into());
                continue;
            }
        };

        // Symlink metadata, since links are not followed
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                outcome.errors.push(e.into());
                continue;
            }
        };

        outcome.entries.push(ScannedEntry {
            path: entry.path().to_path_buf(),
            kind: EntryKind::from_file_type(entry.file_type()),
            meta: EntryMeta::from_metadata(&metadata),
        });
    }

    debug!(
        "Scanned {}: {} entries, {} errors",
        root.display(),
        outcome.entries.len(),
        outcome.errors.len()
    );
    Some(outcome)
}

/// Stat a single path without following symlinks
pub fn probe(path: &Path) -> Option<(EntryKind, EntryMeta)> {
    let metadata = std::fs::symlink_metadata(path).ok()?;
    Some((
        EntryKind::from_file_type(metadata.file_type()),
        EntryMeta::from_metadata(&metadata),
    ))
}
