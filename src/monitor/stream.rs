//! Blocking consumer handle over a monitor engine.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::error::{MonitorError, MonitorResult, ReleaseError};

use super::element::{EngineId, MonitorElement};
use super::engine::MonitorEngine;
use super::traits::Monitored;

/// Blocking consumer handle over a monitor engine.
///
/// The engine itself never blocks; this layers waiting on top of its
/// edge-triggered change signal. The stream does not keep the engine alive:
/// once the engine is dropped, pending receives report `Disconnected`.
#[derive(Debug)]
pub struct MonitorStream<V> {
    engine_id: EngineId,
    engine: Weak<MonitorEngine<V>>,
    rx: Receiver<()>,
}

impl<V: Monitored> MonitorEngine<V> {
    /// Create a blocking consumer handle for this engine.
    #[must_use]
    pub fn stream(self: &Arc<Self>) -> MonitorStream<V> {
        MonitorStream {
            engine_id: self.id(),
            engine: Arc::downgrade(self),
            rx: self.signal(),
        }
    }
}

impl<V: Monitored> MonitorStream<V> {
    /// The engine this stream reads from.
    #[must_use]
    pub const fn engine_id(&self) -> EngineId {
        self.engine_id
    }

    /// The engine, if it is still alive.
    #[must_use]
    pub fn engine(&self) -> Option<Arc<MonitorEngine<V>>> {
        self.engine.upgrade()
    }

    fn disconnected() -> MonitorError {
        MonitorError::Disconnected {
            path: "monitor_stream".to_string(),
        }
    }

    /// Non-blocking poll.
    pub fn poll(&self) -> MonitorResult<Option<MonitorElement<V>>> {
        let engine = self.engine.upgrade().ok_or_else(Self::disconnected)?;
        Ok(engine.poll())
    }

    /// Give a polled snapshot back. If the engine is already gone the
    /// snapshot is simply dropped.
    pub fn release(&self, element: MonitorElement<V>) -> Result<(), ReleaseError<V>> {
        match self.engine.upgrade() {
            Some(engine) => engine.release(element),
            None => Ok(()),
        }
    }

    /// Receive the next snapshot (blocking).
    pub fn recv(&self) -> MonitorResult<MonitorElement<V>> {
        loop {
            if let Some(element) = self.poll()? {
                return Ok(element);
            }
            // A wakeup may be stale (its snapshot was already polled); loop.
            self.rx.recv().map_err(|_| Self::disconnected())?;
        }
    }

    /// Receive the next snapshot with a timeout.
    ///
    /// A timeout too large to represent as a deadline waits like [`recv`].
    ///
    /// [`recv`]: MonitorStream::recv
    pub fn recv_timeout(&self, timeout: Duration) -> MonitorResult<MonitorElement<V>> {
        if let Some(element) = self.poll()? {
            return Ok(element);
        }
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.recv();
        };
        loop {
            if let Some(element) = self.poll()? {
                return Ok(element);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => {
                    // One last look: the signal may have been consumed by an
                    // earlier, stale wakeup.
                    return self.poll()?.ok_or(MonitorError::Timeout {
                        duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => return Err(Self::disconnected()),
            }
        }
    }
}
