//! The monitor engine.
//!
//! One mutex serializes the whole update path (diff, bit merge, promotion,
//! pool transition) together with the consumer's poll/release, so pool cursors
//! only ever move under it. Nothing here waits on another thread: a producer
//! that finds no free buffer folds its changes into `current` and returns, and
//! `poll` returns `None` when nothing is pending.
//!
//! ```text
//!   on_update(raw) ─► diff(current.value, raw) ─► merge into current.changed
//!                                                     │
//!                      next staged? ──no──► coalesce (wait for a release)
//!                          │yes
//!                          ▼
//!      publish(current) ; current = next ; next = acquire_free() ─► notify
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::bitset::BitSet;
use crate::error::{MonitorError, MonitorResult, ReleaseError};

use super::config::MonitorConfig;
use super::element::{EngineId, MonitorElement};
use super::pool::{PoolState, SnapshotPool};
use super::stats::MonitorStats;
use super::traits::{ChangeListener, Monitored};

/// What a single `on_update` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOutcome {
    /// The engine was stopped; the update was dropped.
    Ignored,
    /// The value's field layout did not match the engine; the update was dropped.
    Rejected,
    /// The value was written but nothing is pending delivery.
    Unchanged,
    /// Changes are pending but no free buffer exists; they will ride along
    /// with a later delivery.
    Coalesced,
    /// A snapshot was published and the consumer notified.
    Delivered,
}

struct EngineState<V> {
    pool: SnapshotPool<V>,
    current: Option<MonitorElement<V>>,
    next: Option<MonitorElement<V>>,
    scratch: BitSet,
    first_delivery: bool,
    started: bool,
}

/// Turns a stream of raw values into a bounded sequence of change snapshots
/// for a single consumer.
pub struct MonitorEngine<V> {
    id: EngineId,
    name: String,
    config: MonitorConfig,
    field_count: usize,
    state: Mutex<EngineState<V>>,
    listener: Mutex<Option<Arc<dyn ChangeListener>>>,
    signal_tx: Sender<()>,
    signal_rx: Receiver<()>,
    stats: MonitorStats,
}

impl<V: Monitored> MonitorEngine<V> {
    /// Build an engine whose pool holds `config.queue_size` copies of
    /// `prototype`. The prototype also fixes the field-index space and is the
    /// baseline the first update is compared against.
    ///
    /// Construction never fails; an unusable queue size is reported by
    /// [`MonitorEngine::start`].
    pub fn new(prototype: V, config: MonitorConfig) -> Self {
        let id = EngineId::new();
        let field_count = prototype.field_count();
        let elements = (0..config.queue_size)
            .map(|slot| MonitorElement::new(id, slot, prototype.clone(), field_count))
            .collect();
        let name = config.name.clone().unwrap_or_else(|| format!("monitor-{id}"));
        let (signal_tx, signal_rx) = bounded(1);

        Self {
            id,
            name,
            field_count,
            state: Mutex::new(EngineState {
                pool: SnapshotPool::new(id, elements),
                current: None,
                next: None,
                scratch: BitSet::new(field_count),
                first_delivery: true,
                started: false,
            }),
            listener: Mutex::new(None),
            signal_tx,
            signal_rx,
            stats: MonitorStats::default(),
            config,
        }
    }

    /// Begin accepting updates.
    ///
    /// Idempotent while started. Fails with `ResourceExhausted` if the pool
    /// cannot give the engine both a `current` and a `next` buffer.
    pub fn start(&self) -> MonitorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.started {
            return Ok(());
        }

        let capacity = state.pool.capacity();
        let free = state.pool.number_free();
        if capacity < MonitorConfig::MIN_QUEUE_SIZE {
            return Err(MonitorError::ResourceExhausted {
                reason: format!(
                    "queue size {capacity} cannot double-buffer, need at least {}",
                    MonitorConfig::MIN_QUEUE_SIZE
                ),
                capacity,
                free,
            });
        }

        // Buffers kept from a previous run are reused in place.
        let missing = usize::from(state.current.is_none()) + usize::from(state.next.is_none());
        if free < missing {
            return Err(MonitorError::ResourceExhausted {
                reason: "consumer still holds the remaining snapshots".to_string(),
                capacity,
                free,
            });
        }
        if state.current.is_none() {
            state.current = state.pool.try_acquire_free();
        }
        if state.next.is_none() {
            state.next = state.pool.try_acquire_free();
        }
        for element in state.current.iter_mut().chain(state.next.iter_mut()) {
            element.reset_bits();
        }

        state.first_delivery = true;
        state.started = true;
        debug!(engine = %self.id, name = %self.name, capacity, "monitor started");
        Ok(())
    }

    /// Stop accepting updates.
    ///
    /// Published snapshots stay pollable and releasable. Does not wait for an
    /// update already in progress on another thread.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.started {
            return;
        }
        state.started = false;
        debug!(
            engine = %self.id,
            name = %self.name,
            pending = state.pool.number_pending(),
            outstanding = state.pool.number_outstanding(),
            "monitor stopped"
        );
    }

    /// Process one raw value from the update source.
    pub fn on_update(&self, raw: V) -> UpdateOutcome {
        self.stats.record_update();
        if raw.field_count() != self.field_count {
            self.stats.record_rejected();
            warn!(
                engine = %self.id,
                expected = self.field_count,
                actual = raw.field_count(),
                "update field count mismatch"
            );
            return UpdateOutcome::Rejected;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.started {
            drop(guard);
            self.stats.record_ignored();
            debug!(engine = %self.id, "update while stopped ignored");
            return UpdateOutcome::Ignored;
        }

        let EngineState {
            current,
            scratch,
            first_delivery,
            ..
        } = &mut *state;
        let Some(current) = current.as_mut() else {
            // start() always stages current; treat a missing one like stopped.
            debug_assert!(false, "started engine without a current element");
            return UpdateOutcome::Ignored;
        };
        if !current.value.is_compatible(&raw) {
            self.stats.record_rejected();
            warn!(engine = %self.id, "update does not match the engine's field layout");
            return UpdateOutcome::Rejected;
        }

        scratch.clear_all();
        current.value.diff_into(&raw, scratch);
        current.value = raw;
        current.updated_at = Some(Utc::now());

        let mut overruns = 0u64;
        for bit in scratch.iter() {
            if current.changed.set(bit) {
                // Already pending: the delivery will carry the latest value.
                current.overrun.set(bit);
                overruns += 1;
            } else {
                current.overrun.clear(bit);
            }
        }
        self.stats.record_overruns(overruns);

        if current.changed.is_empty() {
            return UpdateOutcome::Unchanged;
        }
        if *first_delivery {
            // A new consumer has no baseline: resync every field.
            current.changed.set_all();
            *first_delivery = false;
        }

        if !self.promote(state) {
            drop(guard);
            self.stats.record_coalesced();
            return UpdateOutcome::Coalesced;
        }
        drop(guard);

        self.stats.record_delivery();
        self.notify();
        UpdateOutcome::Delivered
    }

    /// Swap `current` into the used ring and stage a new `next`.
    /// Returns false, leaving everything in place, if no buffer is free.
    fn promote(&self, state: &mut EngineState<V>) -> bool {
        if state.next.is_none() {
            state.next = state.pool.try_acquire_free();
        }
        let Some(mut next) = state.next.take() else {
            trace!(engine = %self.id, "no free snapshot, coalescing");
            return false;
        };
        let Some(current) = state.current.take() else {
            state.next = Some(next);
            return false;
        };

        // `next` was cleared when acquired and is never written while staged,
        // so its change set is already exactly what is pending since this
        // delivery: nothing.
        next.value.copy_from(&current.value);
        next.updated_at = current.updated_at;
        next.overrun.clear_all();

        trace!(
            engine = %self.id,
            slot = current.slot(),
            changed = %current.changed,
            overrun = %current.overrun,
            "snapshot published"
        );
        state.pool.publish_used(current);
        state.current = Some(next);
        state.next = state.pool.try_acquire_free();
        true
    }

    fn notify(&self) {
        // Full means a wakeup is already pending.
        let _ = self.signal_tx.try_send(());
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.monitor_event();
        }
    }

    /// Take the oldest published snapshot, or `None` if nothing is pending.
    pub fn poll(&self) -> Option<MonitorElement<V>> {
        let element = self.state.lock().pool.poll_used();
        if let Some(element) = &element {
            trace!(engine = %self.id, slot = element.slot(), "snapshot polled");
        }
        element
    }

    /// Give back the snapshot returned by the earliest unreleased `poll`.
    ///
    /// Any other snapshot is a `ProtocolViolation`: it is handed back inside
    /// the error and the engine's state is left untouched.
    pub fn release(&self, element: MonitorElement<V>) -> Result<(), ReleaseError<V>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Err(err) = state.pool.release_used(element) {
            drop(guard);
            self.stats.record_violation();
            warn!(
                engine = %self.id,
                expected = ?err.expected(),
                actual = %err.actual(),
                "snapshot released out of order"
            );
            return Err(err);
        }

        let flushed = self.config.flush_on_release
            && state.started
            && state.current.as_ref().is_some_and(|c| !c.changed.is_empty())
            && self.promote(state);
        drop(guard);

        if flushed {
            self.stats.record_delivery();
            self.notify();
        }
        Ok(())
    }

    /// Register the push-notification callback, replacing any previous one.
    pub fn set_listener(&self, listener: Arc<dyn ChangeListener>) {
        *self.listener.lock() = Some(listener);
    }

    /// Remove the push-notification callback.
    pub fn clear_listener(&self) {
        self.listener.lock().take();
    }

    pub(crate) fn signal(&self) -> Receiver<()> {
        self.signal_rx.clone()
    }

    /// Whether updates are currently accepted.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Where every buffer currently is.
    #[must_use]
    pub fn pool_state(&self) -> PoolState {
        let state = self.state.lock();
        PoolState {
            capacity: state.pool.capacity(),
            free: state.pool.number_free(),
            pending: state.pool.number_pending(),
            outstanding: state.pool.number_outstanding(),
            current: state.current.is_some(),
            next: state.next.is_some(),
        }
    }
}

impl<V> MonitorEngine<V> {
    /// This engine's identity.
    #[must_use]
    pub const fn id(&self) -> EngineId {
        self.id
    }

    /// Name used in log output.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of snapshot buffers.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.config.queue_size
    }

    /// Size of the field-index space.
    #[must_use]
    pub const fn field_count(&self) -> usize {
        self.field_count
    }

    /// The configuration this engine was built with.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Event counters.
    #[must_use]
    pub const fn stats(&self) -> &MonitorStats {
        &self.stats
    }
}

impl<V> fmt::Debug for MonitorEngine<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorEngine")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("config", &self.config)
            .field("field_count", &self.field_count)
            .finish_non_exhaustive()
    }
}
