//! Typed subscriptions and event dispatch
//!
//! The session task never calls subscriber code directly. Classified events
//! are queued to a dispatcher task, which snapshots the matching handlers
//! and invokes them one by one, so a slow or panicking callback cannot
//! stall classification or take the session down.

use crate::error::WatchError;
use crate::event::{ChangeEvent, ChangeKind, WatchEvent};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, trace};

type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
type ReadyCallback = Arc<dyn Fn() + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&WatchError) + Send + Sync>;

/// Handle returned by every registration, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
enum Handler {
    Change(ChangeKind, ChangeCallback),
    Ready(ReadyCallback),
    Error(ErrorCallback),
    Channel(mpsc::UnboundedSender<WatchEvent>),
}

impl Handler {
    fn wants(&self, event: &WatchEvent) -> bool {
        match (self, event) {
            (Handler::Change(kind, _), WatchEvent::Change(change)) => *kind == change.kind,
            (Handler::Ready(_), WatchEvent::Ready) => true,
            (Handler::Error(_), WatchEvent::Error(_)) => true,
            (Handler::Channel(_), _) => true,
            _ => false,
        }
    }
}

/// Registry of subscribers for one session
#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, Handler)>>,
}

impl Subscribers {
    fn register(&self, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, handler));
        id
    }

    pub fn on_change<F>(&self, kind: ChangeKind, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.register(Handler::Change(kind, Arc::new(callback)))
    }

    pub fn on_ready<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(Handler::Ready(Arc::new(callback)))
    }

    pub fn on_error<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&WatchError) + Send + Sync + 'static,
    {
        self.register(Handler::Error(Arc::new(callback)))
    }

    /// Channel receiving every event; closes when the session stops
    pub fn channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<WatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.register(Handler::Channel(tx)), rx)
    }

    /// Remove one subscription; returns false if it was not registered
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    /// Drop every subscription (closes channel subscribers)
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Deliver one event to every interested subscriber
    pub fn deliver(&self, event: &WatchEvent) {
        // Snapshot so callbacks may (un)subscribe without deadlocking
        let matching: Vec<(SubscriptionId, Handler)> = self
            .handlers
            .read()
            .iter()
            .filter(|(_, h)| h.wants(event))
            .cloned()
            .collect();

        let mut closed = Vec::new();
        for (id, handler) in matching {
            let outcome = catch_unwind(AssertUnwindSafe(|| match (&handler, event) {
                (Handler::Change(_, callback), WatchEvent::Change(change)) => callback(change),
                (Handler::Ready(callback), WatchEvent::Ready) => callback(),
                (Handler::Error(callback), WatchEvent::Error(err)) => callback(err),
                (Handler::Channel(tx), _) => {
                    if tx.send(event.clone()).is_err() {
                        closed.push(id);
                    }
                }
                _ => {}
            }));

            if outcome.is_err() {
                error!("Subscriber {:?} panicked while handling {:?}", id, event);
            }
        }

        for id in closed {
            trace!("Dropping closed channel subscriber {:?}", id);
            self.remove(id);
        }
    }
}

/// Sending half used by the session task
///
/// Once `cancelled` is set nothing more is queued, which is what guarantees
/// silence after `stop()` returns.
#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::UnboundedSender<WatchEvent>,
    cancelled: Arc<AtomicBool>,
}

impl Emitter {
    pub fn new(tx: mpsc::UnboundedSender<WatchEvent>, cancelled: Arc<AtomicBool>) -> Self {
        Self { tx, cancelled }
    }

    /// Queue an event; returns false once the session is shutting down
    pub fn emit(&self, event: impl Into<WatchEvent>) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(event.into()).is_ok()
    }
}

/// Dispatcher task body: runs until every emitter is dropped
pub async fn dispatch(mut rx: mpsc::UnboundedReceiver<WatchEvent>, subscribers: Arc<Subscribers>) {
    while let Some(event) = rx.recv().await {
        subscribers.deliver(&event);
    }
    trace!("Dispatcher drained");
}
