//! Notification backends
//!
//! Wraps the platform watcher chosen by `notify` (inotify, FSEvents,
//! ReadDirectoryChangesW, kqueue) or its polling fallback, and translates
//! raw `notify` events into the small set of hints the classifier needs.

use crate::config::{WatcherConfig, DEFAULT_POLL_INTERVAL_MS};
use crate::error::WatchError;
use crate::event::EntryKind;
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Channel carrying raw backend output to the session task
pub type RawSender = mpsc::UnboundedSender<notify::Result<Event>>;
pub type RawReceiver = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// Which notification mechanism is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// OS change notifications
    Native,
    /// Periodic stat-based scanning
    Polling(Duration),
}

/// Classifier input derived from one raw notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// Something appeared; kind is known only on some platforms
    Created {
        path: PathBuf,
        kind: Option<EntryKind>,
    },
    /// Contents or metadata changed
    Modified { path: PathBuf },
    /// Something went away
    Removed { path: PathBuf },
    /// Backend could not say what happened; probe the disk
    Unknown { path: PathBuf },
    /// Events were lost; rescan `path` (or every root)
    Rescan { path: Option<PathBuf> },
}

/// The session's single OS-level watch handle
pub struct Backend {
    watcher: Box<dyn Watcher + Send>,
    kind: BackendKind,
    watched: Vec<PathBuf>,
}

impl Backend {
    /// Create the backend selected by `config`
    ///
    /// Falls back to polling when the native mechanism cannot be initialized.
    pub fn new(config: &WatcherConfig, tx: RawSender) -> notify::Result<Self> {
        if let Some(interval) = config.poll_interval() {
            return Self::polling(interval, tx);
        }

        let native_tx = tx.clone();
        let native = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = native_tx.send(res);
            },
            Config::default(),
        );

        match native {
            Ok(watcher) => {
                debug!("Using native file watcher");
                Ok(Self {
                    watcher: Box::new(watcher),
                    kind: BackendKind::Native,
                    watched: Vec::new(),
                })
            }
            Err(e) => {
                warn!("Native file watcher unavailable ({}), falling back to polling", e);
                Self::polling(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS), tx)
            }
        }
    }

    fn polling(interval: Duration, tx: RawSender) -> notify::Result<Self> {
        let watcher = PollWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            Config::default().with_poll_interval(interval),
        )?;

        debug!("Using polling file watcher (interval: {:?})", interval);
        Ok(Self {
            watcher: Box::new(watcher),
            kind: BackendKind::Polling(interval),
            watched: Vec::new(),
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Start observing `root` recursively
    pub fn watch(&mut self, root: &Path) -> Result<(), WatchError> {
        if std::fs::symlink_metadata(root).is_err() {
            return Err(WatchError::BackendUnavailable {
                root: root.to_path_buf(),
                reason: "path does not exist".to_string(),
            });
        }

        self.watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| backend_error(root, e))?;

        info!("Watching {}", root.display());
        self.watched.push(root.to_path_buf());
        Ok(())
    }

    /// Roots successfully registered
    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    /// Release every OS watch
    pub fn close(mut self) {
        for root in std::mem::take(&mut self.watched) {
            if let Err(e) = self.watcher.unwatch(&root) {
                // Root already gone; the handle is released on drop anyway
                debug!("Unwatch {} failed: {}", root.display(), e);
            }
        }
        debug!("File watcher closed");
    }
}

/// Map a backend failure for `root` into the public taxonomy
pub fn backend_error(root: &Path, err: notify::Error) -> WatchError {
    let reason = match err.kind {
        notify::ErrorKind::MaxFilesWatch => {
            "operating system watch limit reached".to_string()
        }
        notify::ErrorKind::PathNotFound => "path does not exist".to_string(),
        _ => err.to_string(),
    };
    WatchError::BackendUnavailable {
        root: root.to_path_buf(),
        reason,
    }
}

/// Map a runtime backend failure into an error event
pub fn runtime_error(err: notify::Error) -> WatchError {
    let path = err.paths.first().cloned();
    match err.kind {
        notify::ErrorKind::MaxFilesWatch => WatchError::BackendUnavailable {
            root: path.unwrap_or_default(),
            reason: "operating system watch limit reached".to_string(),
        },
        _ => WatchError::transient(path, err),
    }
}

/// Translate one `notify` event into classifier hints
pub fn translate(event: &Event) -> Vec<RawEvent> {
    if event.need_rescan() {
        return vec![RawEvent::Rescan {
            path: event.paths.first().cloned(),
        }];
    }

    let each = |f: fn(PathBuf) -> RawEvent| -> Vec<RawEvent> {
        event.paths.iter().cloned().map(f).collect()
    };

    match event.kind {
        EventKind::Create(create) => {
            let kind = match create {
                CreateKind::File => Some(EntryKind::File),
                CreateKind::Folder => Some(EntryKind::Directory),
                _ => None,
            };
            event
                .paths
                .iter()
                .map(|path| RawEvent::Created {
                    path: path.clone(),
                    kind,
                })
                .collect()
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => each(|path| RawEvent::Removed { path }),
            RenameMode::To => each(|path| RawEvent::Created { path, kind: None }),
            RenameMode::Both if event.paths.len() >= 2 => vec![
                RawEvent::Removed {
                    path: event.paths[0].clone(),
                },
                RawEvent::Created {
                    path: event.paths[1].clone(),
                    kind: None,
                },
            ],
            _ => each(|path| RawEvent::Unknown { path }),
        },
        EventKind::Modify(_) => each(|path| RawEvent::Modified { path }),
        EventKind::Remove(_) => each(|path| RawEvent::Removed { path }),
        EventKind::Any => each(|path| RawEvent::Unknown { path }),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}
