//! Snapshot buffers handed between producer, pool and consumer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bitset::BitSet;
use crate::error::SlotRef;

/// Unique identifier for a monitor engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(Uuid);

impl EngineId {
    /// Create a new random engine id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for EngineId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One buffered copy of the monitored value plus its change bookkeeping.
///
/// Elements are never cloned: whoever holds one owns it outright, which is
/// what lets a consumer read a polled element without taking any lock.
pub struct MonitorElement<V> {
    owner: EngineId,
    slot: usize,
    pub(crate) value: V,
    pub(crate) changed: BitSet,
    pub(crate) overrun: BitSet,
    pub(crate) updated_at: Option<DateTime<Utc>>,
}

impl<V> MonitorElement<V> {
    pub(crate) fn new(owner: EngineId, slot: usize, value: V, field_count: usize) -> Self {
        Self {
            owner,
            slot,
            value,
            changed: BitSet::new(field_count),
            overrun: BitSet::new(field_count),
            updated_at: None,
        }
    }

    /// The monitored value as of this snapshot.
    #[must_use]
    pub const fn value(&self) -> &V {
        &self.value
    }

    /// Fields that differ from the previously delivered snapshot.
    #[must_use]
    pub const fn changed(&self) -> &BitSet {
        &self.changed
    }

    /// Fields that changed more than once before this snapshot was delivered.
    #[must_use]
    pub const fn overrun(&self) -> &BitSet {
        &self.overrun
    }

    /// When the last raw update was written into this snapshot.
    #[must_use]
    pub const fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Slot index inside the owning engine's pool.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Engine that owns this element.
    #[must_use]
    pub const fn owner(&self) -> EngineId {
        self.owner
    }

    /// Slot identity used in release diagnostics.
    #[must_use]
    pub const fn slot_ref(&self) -> SlotRef {
        SlotRef {
            engine: self.owner,
            slot: self.slot,
        }
    }

    pub(crate) fn reset_bits(&mut self) {
        self.changed.clear_all();
        self.overrun.clear_all();
    }
}

impl<V: fmt::Debug> fmt::Debug for MonitorElement<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorElement")
            .field("owner", &self.owner)
            .field("slot", &self.slot)
            .field("changed", &self.changed)
            .field("overrun", &self.overrun)
            .field("updated_at", &self.updated_at)
            .field("value", &self.value)
            .finish()
    }
}
