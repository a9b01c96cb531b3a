//! Update sources and their binding to a monitor engine.
//!
//! A source delivers raw values by calling subscriber callbacks on whatever
//! thread it likes. Two in-process sources are provided: `LocalSource`
//! calls subscribers on the posting thread, `ChannelSource` queues values and
//! calls subscribers from its own worker thread.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{MonitorError, MonitorResult};
use crate::monitor::{MonitorEngine, Monitored};

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback a source invokes with each new raw value.
pub type UpdateCallback<V> = Arc<dyn Fn(V) + Send + Sync>;

/// A live data source.
pub trait UpdateSource<V>: Send + Sync {
    /// Start delivering values to `callback`. Delivery stops when the
    /// returned handle is unsubscribed or dropped.
    fn subscribe(&self, callback: UpdateCallback<V>) -> MonitorResult<Subscription>;
}

/// Handle for an active subscription.
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Build a handle that runs `cancel` once, on the first unsubscribe.
    pub fn new(id: SubscriptionId, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// The subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop delivery. Idempotent.
    ///
    /// A callback already running on the source's thread may still complete.
    pub fn unsubscribe(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// Whether `unsubscribe` has run.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

type Subscribers<V> = RwLock<Vec<(SubscriptionId, UpdateCallback<V>)>>;

fn register<V: 'static>(subscribers: &Arc<Subscribers<V>>, callback: UpdateCallback<V>) -> Subscription {
    let id = SubscriptionId::new();
    subscribers.write().push((id, callback));
    let weak: Weak<Subscribers<V>> = Arc::downgrade(subscribers);
    Subscription::new(id, move || {
        if let Some(subscribers) = weak.upgrade() {
            subscribers.write().retain(|(sid, _)| *sid != id);
        }
    })
}

fn fan_out<V: Clone>(subscribers: &Subscribers<V>, value: V) -> usize {
    // Snapshot the list so callbacks run without the lock held.
    let callbacks: Vec<UpdateCallback<V>> = subscribers.read().iter().map(|(_, cb)| Arc::clone(cb)).collect();
    let Some((last, rest)) = callbacks.split_last() else {
        return 0;
    };
    for callback in rest {
        callback(value.clone());
    }
    last(value);
    callbacks.len()
}

/// Source that delivers on the posting thread.
pub struct LocalSource<V> {
    subscribers: Arc<Subscribers<V>>,
}

impl<V> LocalSource<V> {
    /// Create a source with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl<V: Clone> LocalSource<V> {
    /// Deliver a value to every subscriber. Returns how many were called.
    pub fn post(&self, value: V) -> usize {
        fan_out(&self.subscribers, value)
    }
}

impl<V> Default for LocalSource<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for LocalSource<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSource")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<V: Clone + Send + 'static> UpdateSource<V> for LocalSource<V> {
    fn subscribe(&self, callback: UpdateCallback<V>) -> MonitorResult<Subscription> {
        Ok(register(&self.subscribers, callback))
    }
}

/// Source that queues values and delivers them from a worker thread.
///
/// `post` never blocks: when the queue is full the value is dropped and
/// counted.
pub struct ChannelSource<V> {
    subscribers: Arc<Subscribers<V>>,
    tx: Mutex<Option<Sender<V>>>,
    dropped: AtomicU64,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Clone + Send + Sync + 'static> ChannelSource<V> {
    /// Spawn the worker with a queue of `capacity` values.
    pub fn new(capacity: usize) -> MonitorResult<Self> {
        let subscribers: Arc<Subscribers<V>> = Arc::new(RwLock::new(Vec::new()));
        let (tx, rx) = bounded::<V>(capacity.max(1));

        let worker_subscribers = Arc::clone(&subscribers);
        let join = thread::Builder::new()
            .name("pvmonitor-source".to_string())
            .spawn(move || worker_loop(&worker_subscribers, &rx))
            .map_err(|e| MonitorError::internal(format!("failed to spawn source worker: {e}")))?;

        Ok(Self {
            subscribers,
            tx: Mutex::new(Some(tx)),
            dropped: AtomicU64::new(0),
            join: Mutex::new(Some(join)),
        })
    }

    /// Non-blocking enqueue. Returns false if the value was dropped.
    pub fn post(&self, value: V) -> bool {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        match tx.try_send(value) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Values dropped because the queue was full or the source shut down.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the queue and wait for the worker to drain it. Idempotent.
    pub fn shutdown(&self) {
        drop(self.tx.lock().take());
        let handle = self.join.lock().take();
        if let Some(handle) = handle {
            // A subscriber callback dropping the last reference would run
            // this on the worker itself; it exits on its own then.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("source worker panicked");
            }
        }
    }
}

impl<V> fmt::Debug for ChannelSource<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSource")
            .field("subscribers", &self.subscribers.read().len())
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<V: Clone + Send + Sync + 'static> UpdateSource<V> for ChannelSource<V> {
    fn subscribe(&self, callback: UpdateCallback<V>) -> MonitorResult<Subscription> {
        if self.tx.lock().is_none() {
            return Err(MonitorError::Disconnected {
                path: "channel_source".to_string(),
            });
        }
        Ok(register(&self.subscribers, callback))
    }
}

impl<V> Drop for ChannelSource<V> {
    fn drop(&mut self) {
        drop(self.tx.get_mut().take());
        if let Some(handle) = self.join.get_mut().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("source worker panicked");
            }
        }
    }
}

fn worker_loop<V: Clone>(subscribers: &Subscribers<V>, rx: &Receiver<V>) {
    debug!("source worker started");
    while let Ok(value) = rx.recv() {
        let delivered = fan_out(subscribers, value);
        trace!(delivered, "source value delivered");
    }
    debug!("source worker stopped");
}

/// Binds an update source to a monitor engine.
///
/// `start` starts the engine and then subscribes; `stop` unsubscribes and
/// then stops the engine, so the engine never sees a subscription it did not
/// ask for.
pub struct SourceMonitor<V, S> {
    engine: Arc<MonitorEngine<V>>,
    source: Arc<S>,
    subscription: Mutex<Option<Subscription>>,
}

impl<V, S> SourceMonitor<V, S>
where
    V: Monitored,
    S: UpdateSource<V>,
{
    /// Bind `source` to `engine`. Nothing is subscribed until `start`.
    pub fn new(engine: Arc<MonitorEngine<V>>, source: Arc<S>) -> Self {
        Self {
            engine,
            source,
            subscription: Mutex::new(None),
        }
    }

    /// The bound engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<MonitorEngine<V>> {
        &self.engine
    }

    /// The bound source.
    #[must_use]
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Start the engine and subscribe it to the source. Idempotent.
    ///
    /// If the subscription fails, an engine this call started is stopped
    /// again; one that was already running is left running.
    pub fn start(&self) -> MonitorResult<()> {
        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            return Ok(());
        }
        let was_started = self.engine.is_started();
        self.engine.start()?;

        let engine = Arc::clone(&self.engine);
        let callback: UpdateCallback<V> = Arc::new(move |value: V| {
            engine.on_update(value);
        });
        match self.source.subscribe(callback) {
            Ok(handle) => {
                debug!(engine = %self.engine.id(), subscription = ?handle.id(), "source subscribed");
                *subscription = Some(handle);
                Ok(())
            }
            Err(err) => {
                // Only undo a start this call made.
                if !was_started {
                    self.engine.stop();
                }
                Err(err)
            }
        }
    }

    /// Unsubscribe from the source and stop the engine. Idempotent.
    pub fn stop(&self) {
        let handle = self.subscription.lock().take();
        if let Some(handle) = handle {
            handle.unsubscribe();
            debug!(engine = %self.engine.id(), subscription = ?handle.id(), "source unsubscribed");
        }
        self.engine.stop();
    }
}

impl<V, S> fmt::Debug for SourceMonitor<V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceMonitor")
            .field("engine", &self.engine.id())
            .field("subscribed", &self.subscription.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl<V, S> Drop for SourceMonitor<V, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.subscription.get_mut().take() {
            handle.unsubscribe();
        }
    }
}
