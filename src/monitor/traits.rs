//! Capabilities supplied by monitored values and consumers.

use crate::bitset::BitSet;

/// The per-type capability the engine needs from a monitored value.
///
/// Implementations decide once, for their type, how fields are compared and
/// copied; the engine never looks inside a value.
pub trait Monitored: Clone + Send + 'static {
    /// Size of the field-index space. Must not change over a value's life.
    fn field_count(&self) -> usize;

    /// Set the bit of every field whose value differs between `self` and
    /// `newer`. Every field is compared exactly once; no other bits are touched.
    fn diff_into(&self, newer: &Self, changed: &mut BitSet);

    /// Whether `other` shares this value's field-index space, so the two can
    /// be diffed position by position.
    fn is_compatible(&self, other: &Self) -> bool {
        self.field_count() == other.field_count()
    }

    /// Overwrite `self` with `other`.
    fn copy_from(&mut self, other: &Self) {
        self.clone_from(other);
    }
}

/// Push notification for consumers that prefer callbacks over polling.
///
/// Called after a snapshot has been published, outside the engine lock, so an
/// implementation may call `poll`/`release` directly.
pub trait ChangeListener: Send + Sync {
    /// A new snapshot is available. Edge-triggered: one call may cover several.
    fn monitor_event(&self);
}

impl<F> ChangeListener for F
where
    F: Fn() + Send + Sync,
{
    fn monitor_event(&self) {
        self();
    }
}
