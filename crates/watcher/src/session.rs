//! Watch session lifecycle
//!
//! A session owns one notification backend and two tasks:
//!
//! - the session task, which runs the initial scan, owns the path tracker and
//!   classifies raw notifications one at a time
//! - the dispatcher task, which delivers classified events to subscribers
//!
//! ```text
//! notify thread ──raw──▶ session task ──WatchEvent──▶ dispatcher ──▶ callbacks
//! ```

use crate::classify::Classifier;
use crate::config::WatcherConfig;
use crate::error::WatchError;
use crate::event::{ChangeEvent, ChangeKind, WatchEvent};
use crate::ignore::IgnoreRules;
use crate::platform::{runtime_error, translate, Backend, RawReceiver};
use crate::scan::{scan_tree, ScanOutcome};
use crate::subscribe::{dispatch, Emitter, SubscriptionId, Subscribers};
use parking_lot::Mutex;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`WatchSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, not started
    Idle,
    /// Backend registered, initial scan in progress
    Starting,
    /// Forwarding events
    Ready,
    /// `stop()` in progress
    Stopping,
    /// Terminal
    Stopped,
}

struct Running {
    cancel: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    session_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
}

struct Lifecycle {
    state: SessionState,
    running: Option<Running>,
}

struct Inner {
    roots: Vec<PathBuf>,
    config: WatcherConfig,
    ignore: Arc<IgnoreRules>,
    subscribers: Arc<Subscribers>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    /// Flips to `true` once the session is stopped and its tasks are joined
    stopped: watch::Sender<bool>,
}

impl Inner {
    fn finish(&self) {
        self.subscribers.clear();
        self.lifecycle.lock().state = SessionState::Stopped;
        self.stopped.send_replace(true);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Last handle gone: let the tasks wind down on their own
        if let Some(running) = self.lifecycle.lock().running.take() {
            debug!("Watch session dropped while running, signalling shutdown");
            running.cancel.store(true, Ordering::Release);
            let _ = running.shutdown.send(true);
        }
    }
}

/// Recursive watcher over one or more roots
///
/// Cloning yields another handle to the same session.
///
/// ```no_run
/// # async fn demo() -> Result<(), watcher::WatchError> {
/// use watcher::{WatchSession, WatcherConfig};
///
/// let session = WatchSession::new(["./src"], WatcherConfig::default())?;
/// session.on_created(|event| println!("added {}", event.path.display()));
/// session.start().await?;
/// // ...
/// session.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WatchSession {
    inner: Arc<Inner>,
}

impl WatchSession {
    /// Create an idle session
    ///
    /// Roots are made absolute and deduplicated; they need not exist yet.
    pub fn new<I, P>(roots: I, config: WatcherConfig) -> Result<Self, WatchError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        config.validate()?;

        let mut resolved: Vec<PathBuf> = Vec::new();
        for root in roots {
            let root = resolve_root(root.as_ref())?;
            if !resolved.contains(&root) {
                resolved.push(root);
            }
        }

        if resolved.is_empty() {
            return Err(WatchError::NoRoots);
        }

        let ignore = Arc::new(IgnoreRules::load(&resolved, &config.ignore)?);
        debug!(
            "Session over {} root(s), {} with ignore rules",
            resolved.len(),
            ignore.active_sources()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                roots: resolved,
                config,
                ignore,
                subscribers: Arc::new(Subscribers::default()),
                lifecycle: Arc::new(Mutex::new(Lifecycle {
                    state: SessionState::Idle,
                    running: None,
                })),
                stopped: watch::channel(false).0,
            }),
        })
    }

    /// Resolved watch roots
    pub fn roots(&self) -> &[PathBuf] {
        &self.inner.roots
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.inner.lifecycle.lock().state
    }

    /// True while starting or ready
    pub fn is_watching(&self) -> bool {
        matches!(self.state(), SessionState::Starting | SessionState::Ready)
    }

    /// Register with the backend, scan, and wait for readiness
    ///
    /// Only misuse is reported as `Err`. Everything else arrives as an error
    /// event; if no root could be watched the session ends up stopped.
    pub async fn start(&self) -> Result<&Self, WatchError> {
        let startup = {
            let mut lifecycle = self.inner.lifecycle.lock();
            match lifecycle.state {
                SessionState::Idle => {}
                SessionState::Starting | SessionState::Ready => {
                    return Err(WatchError::AlreadyStarted)
                }
                SessionState::Stopping | SessionState::Stopped => {
                    return Err(WatchError::AlreadyStopped)
                }
            }
            lifecycle.state = SessionState::Starting;
            self.launch(&mut lifecycle)
        };

        match startup {
            Startup::Launched(ready) => {
                // Dropped sender means the session was stopped mid-scan
                let _ = ready.await;
            }
            Startup::Failed(dispatch_task) => {
                if let Err(e) = dispatch_task.await {
                    error!("Event dispatcher failed: {}", e);
                }
                self.inner.finish();
            }
        }

        Ok(self)
    }

    /// Set up backend and tasks; called with the lifecycle lock held
    fn launch(&self, lifecycle: &mut Lifecycle) -> Startup {
        let inner = &self.inner;
        let cancel = Arc::new(AtomicBool::new(false));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let emitter = Emitter::new(event_tx, cancel.clone());
        let dispatch_task = tokio::spawn(dispatch(event_rx, inner.subscribers.clone()));

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut backend = match Backend::new(&inner.config, raw_tx) {
            Ok(backend) => Some(backend),
            Err(e) => {
                let reason = e.to_string();
                warn!("File watcher could not be created: {}", reason);
                for root in &inner.roots {
                    emitter.emit(WatchError::BackendUnavailable {
                        root: root.clone(),
                        reason: reason.clone(),
                    });
                }
                None
            }
        };

        let mut watched = Vec::new();
        if let Some(backend) = backend.as_mut() {
            for root in &inner.roots {
                match backend.watch(root) {
                    Ok(()) => watched.push(root.clone()),
                    Err(e) => {
                        warn!("{}", e);
                        emitter.emit(e);
                    }
                }
            }
        }

        let backend = match backend {
            Some(backend) if !watched.is_empty() => backend,
            other => {
                error!("No watch root could be observed");
                emitter.emit(WatchError::NoRootsAvailable);
                if let Some(backend) = other {
                    backend.close();
                }
                // Stopped once the dispatcher has drained
                lifecycle.state = SessionState::Stopping;
                return Startup::Failed(dispatch_task);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = SessionTask {
            backend,
            classifier: Classifier::new(watched, inner.ignore.clone()),
            ignore: inner.ignore.clone(),
            raw_rx,
            emitter,
            cancel: cancel.clone(),
            shutdown: shutdown_rx,
            lifecycle: inner.lifecycle.clone(),
            ignore_initial: inner.config.ignore_initial,
            ready: ready_tx,
        };
        let session_task = tokio::spawn(task.run());

        lifecycle.running = Some(Running {
            cancel,
            shutdown: shutdown_tx,
            session_task,
            dispatch_task,
        });
        Startup::Launched(ready_rx)
    }

    /// Release the backend and end the session
    ///
    /// Events already classified are still delivered; nothing fires after this
    /// returns. A call made while another stop is in flight waits for it to
    /// finish; a call on a stopped session returns immediately.
    pub async fn stop(&self) {
        let running = {
            let mut lifecycle = self.inner.lifecycle.lock();
            match lifecycle.state {
                SessionState::Stopped => return,
                SessionState::Stopping => Err(self.inner.stopped.subscribe()),
                SessionState::Idle | SessionState::Starting | SessionState::Ready => {
                    lifecycle.state = SessionState::Stopping;
                    Ok(lifecycle.running.take())
                }
            }
        };
        let running = match running {
            Ok(running) => running,
            Err(mut stopped) => {
                // Sender lives in `Inner`, which `self` keeps alive
                let _ = stopped.wait_for(|done| *done).await;
                return;
            }
        };

        if let Some(running) = running {
            running.cancel.store(true, Ordering::Release);
            let _ = running.shutdown.send(true);

            if let Err(e) = running.session_task.await {
                error!("Watch session task failed: {}", e);
            }
            if let Err(e) = running.dispatch_task.await {
                error!("Event dispatcher failed: {}", e);
            }
        }

        self.inner.finish();
        info!("Watch session stopped");
    }

    /// Subscribe to one change kind
    pub fn on_change<F>(&self, kind: ChangeKind, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.inner.subscribers.on_change(kind, callback)
    }

    pub fn on_created<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.on_change(ChangeKind::Created, callback)
    }

    pub fn on_modified<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.on_change(ChangeKind::Modified, callback)
    }

    pub fn on_deleted<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.on_change(ChangeKind::Deleted, callback)
    }

    pub fn on_directory_created<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.on_change(ChangeKind::DirectoryCreated, callback)
    }

    pub fn on_directory_deleted<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.on_change(ChangeKind::DirectoryDeleted, callback)
    }

    /// Fires once, after the initial scan
    pub fn on_ready<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.subscribers.on_ready(callback)
    }

    pub fn on_error<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&WatchError) + Send + Sync + 'static,
    {
        self.inner.subscribers.on_error(callback)
    }

    /// Receive every event on a channel
    ///
    /// The receiver yields `None` once the session has stopped.
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<WatchEvent>) {
        self.inner.subscribers.channel()
    }

    /// Returns false if `id` was not (or no longer) subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.remove(id)
    }
}

enum Startup {
    Launched(oneshot::Receiver<()>),
    Failed(JoinHandle<()>),
}

/// State owned by the session task
struct SessionTask {
    backend: Backend,
    classifier: Classifier,
    ignore: Arc<IgnoreRules>,
    raw_rx: RawReceiver,
    emitter: Emitter,
    cancel: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    ignore_initial: bool,
    ready: oneshot::Sender<()>,
}

impl SessionTask {
    async fn run(self) {
        let SessionTask {
            backend,
            mut classifier,
            ignore,
            mut raw_rx,
            emitter,
            cancel,
            mut shutdown,
            lifecycle,
            ignore_initial,
            ready,
        } = self;

        info!("Initial scan of {} root(s)", classifier.tracker().roots().len());
        let roots = classifier.tracker().roots().to_vec();
        let scan_cancel = cancel.clone();
        let scan = tokio::task::spawn_blocking(move || {
            let mut merged = ScanOutcome::default();
            for root in &roots {
                let outcome = scan_tree(root, &ignore, &scan_cancel)?;
                merged.entries.extend(outcome.entries);
                merged.errors.extend(outcome.errors);
            }
            Some(merged)
        });

        let outcome = match scan.await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                debug!("Initial scan aborted by stop");
                backend.close();
                return;
            }
            Err(e) => {
                error!("Initial scan failed: {}", e);
                emitter.emit(WatchError::transient(None, e));
                ScanOutcome::default()
            }
        };

        for err in outcome.errors {
            warn!("{}", err);
            emitter.emit(err);
        }

        let initial = classifier.seed(outcome.entries);
        if !ignore_initial {
            for event in initial {
                emitter.emit(event);
            }
        }

        {
            let mut lifecycle = lifecycle.lock();
            if lifecycle.state != SessionState::Starting {
                drop(lifecycle);
                backend.close();
                return;
            }
            lifecycle.state = SessionState::Ready;
        }
        info!(
            "Ready: tracking {} entries ({:?} backend)",
            classifier.tracker().len(),
            backend.kind()
        );
        emitter.emit(WatchEvent::Ready);
        let _ = ready.send(());

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                raw = raw_rx.recv() => match raw {
                    Some(Ok(event)) => {
                        for hint in translate(&event) {
                            for classified in classifier.apply(hint) {
                                if let WatchEvent::Change(change) = &classified {
                                    debug!("{}: {}", change.kind, change.path.display());
                                }
                                emitter.emit(classified);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let err = runtime_error(e);
                        warn!("Watcher error: {}", err);
                        emitter.emit(err);
                    }
                    None => break,
                },
            }
        }

        backend.close();
        debug!("Session task finished");
    }
}

/// Make `path` absolute, resolve `.`/`..` lexically, canonicalize if it exists
fn resolve_root(path: &Path) -> Result<PathBuf, WatchError> {
    if path.as_os_str().is_empty() {
        return Err(WatchError::UnresolvableRoot {
            path: path.to_path_buf(),
            reason: "empty path".to_string(),
        });
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir().map_err(|e| WatchError::UnresolvableRoot {
            path: path.to_path_buf(),
            reason: format!("cannot determine current directory: {}", e),
        })?;
        cwd.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    Ok(std::fs::canonicalize(&normalized).unwrap_or(normalized))
}
