//! Fixed ring of snapshot buffers.
//!
//! The ring has four cursors that only ever move forward, modulo capacity:
//!
//! ```text
//!   next_get_free ─► acquire (producer stages current/next)
//!   next_set_used ─► publish (current becomes used)
//!   next_get_used ─► poll    (consumer takes it)
//!   next_release  ─► release (consumer gives it back, slot is free again)
//! ```
//!
//! Every element lives at a fixed slot index and is handed out in the same
//! cyclic order at each stage, so a stage receiving anything other than the
//! slot under its cursor is either an engine defect (publish) or a consumer
//! breaking the poll/release contract (release).

use tracing::error;

use crate::error::{ReleaseError, SlotRef};

use super::element::{EngineId, MonitorElement};

/// Counts describing where the pool's elements currently are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolState {
    /// Total number of elements.
    pub capacity: usize,
    /// Elements in the free list.
    pub free: usize,
    /// Published elements not yet polled.
    pub pending: usize,
    /// Polled elements not yet released.
    pub outstanding: usize,
    /// Whether the engine holds a `current` element.
    pub current: bool,
    /// Whether the engine holds a staged `next` element.
    pub next: bool,
}

impl PoolState {
    /// Number of elements accounted for across all roles.
    #[must_use]
    pub fn accounted(&self) -> usize {
        self.free + self.pending + self.outstanding + usize::from(self.current) + usize::from(self.next)
    }

    /// Published elements, polled or not.
    #[must_use]
    pub const fn used(&self) -> usize {
        self.pending + self.outstanding
    }
}

pub(crate) struct SnapshotPool<V> {
    owner: EngineId,
    slots: Vec<Option<MonitorElement<V>>>,
    next_get_free: usize,
    next_set_used: usize,
    next_get_used: usize,
    next_release: usize,
    number_free: usize,
    number_pending: usize,
    number_outstanding: usize,
}

impl<V> SnapshotPool<V> {
    pub(crate) fn new(owner: EngineId, elements: Vec<MonitorElement<V>>) -> Self {
        debug_assert!(elements.iter().enumerate().all(|(i, e)| e.slot() == i && e.owner() == owner));
        let number_free = elements.len();
        Self {
            owner,
            slots: elements.into_iter().map(Some).collect(),
            next_get_free: 0,
            next_set_used: 0,
            next_get_used: 0,
            next_release: 0,
            number_free,
            number_pending: 0,
            number_outstanding: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) const fn number_free(&self) -> usize {
        self.number_free
    }

    #[cfg(test)]
    pub(crate) const fn number_used(&self) -> usize {
        self.number_pending + self.number_outstanding
    }

    pub(crate) const fn number_pending(&self) -> usize {
        self.number_pending
    }

    pub(crate) const fn number_outstanding(&self) -> usize {
        self.number_outstanding
    }

    fn advance(&self, cursor: usize) -> usize {
        (cursor + 1) % self.slots.len()
    }

    /// Oldest free element with cleared bit sets, or `None` if none is free.
    pub(crate) fn try_acquire_free(&mut self) -> Option<MonitorElement<V>> {
        if self.number_free == 0 {
            return None;
        }
        let slot = self.next_get_free;
        let Some(mut element) = self.slots[slot].take() else {
            error!(engine = %self.owner, slot, "free slot is empty; pool bookkeeping is corrupt");
            debug_assert!(false, "free slot {slot} is empty");
            return None;
        };
        element.reset_bits();
        self.next_get_free = self.advance(slot);
        self.number_free -= 1;
        Some(element)
    }

    /// Move an element from the `current` role into the used ring.
    pub(crate) fn publish_used(&mut self, element: MonitorElement<V>) {
        let slot = element.slot();
        if slot != self.next_set_used || self.slots[slot].is_some() {
            // Elements are acquired and published in the same ring order by
            // construction; anything else is a defect in the engine itself.
            error!(
                engine = %self.owner,
                slot,
                expected = self.next_set_used,
                "publish out of ring order"
            );
            debug_assert!(false, "publish of slot {slot}, expected {}", self.next_set_used);
        }
        self.slots[slot] = Some(element);
        self.next_set_used = self.advance(self.next_set_used);
        self.number_pending += 1;
    }

    /// Hand the oldest unpolled used element to the consumer.
    pub(crate) fn poll_used(&mut self) -> Option<MonitorElement<V>> {
        if self.number_pending == 0 {
            return None;
        }
        let slot = self.next_get_used;
        let Some(element) = self.slots[slot].take() else {
            error!(engine = %self.owner, slot, "used slot is empty; pool bookkeeping is corrupt");
            debug_assert!(false, "used slot {slot} is empty");
            return None;
        };
        self.next_get_used = self.advance(slot);
        self.number_pending -= 1;
        self.number_outstanding += 1;
        Some(element)
    }

    /// The slot the next `release_used` must receive, if any is outstanding.
    pub(crate) fn expected_release(&self) -> Option<SlotRef> {
        (self.number_outstanding > 0).then_some(SlotRef {
            engine: self.owner,
            slot: self.next_release,
        })
    }

    /// Return the earliest polled element to the free list.
    ///
    /// Anything else is rejected and handed back unchanged; the pool is not
    /// modified in that case.
    pub(crate) fn release_used(&mut self, mut element: MonitorElement<V>) -> Result<(), ReleaseError<V>> {
        let expected = self.expected_release();
        let in_order = expected.is_some_and(|e| e == element.slot_ref());
        if !in_order || self.slots[element.slot()].is_some() {
            return Err(ReleaseError::new(element, expected));
        }
        let slot = element.slot();
        element.reset_bits();
        self.slots[slot] = Some(element);
        self.next_release = self.advance(slot);
        self.number_outstanding -= 1;
        self.number_free += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(capacity: usize) -> SnapshotPool<u32> {
        let owner = EngineId::new();
        let elements = (0..capacity)
            .map(|slot| MonitorElement::new(owner, slot, 0u32, 4))
            .collect();
        SnapshotPool::new(owner, elements)
    }

    #[test]
    fn acquire_until_empty() {
        let mut p = pool(2);
        let a = p.try_acquire_free().unwrap();
        let b = p.try_acquire_free().unwrap();
        assert_eq!((a.slot(), b.slot()), (0, 1));
        assert!(p.try_acquire_free().is_none());
        assert_eq!(p.number_free(), 0);
    }

    #[test]
    fn acquire_clears_bits() {
        let mut p = pool(2);
        let mut a = p.try_acquire_free().unwrap();
        a.changed.set(1);
        p.publish_used(a);
        let mut a = p.poll_used().unwrap();
        a.overrun.set(2);
        p.release_used(a).unwrap();
        let _b = p.try_acquire_free().unwrap();
        let a = p.try_acquire_free().unwrap();
        assert_eq!(a.slot(), 0);
        assert!(a.changed().is_empty());
        assert!(a.overrun().is_empty());
    }

    #[test]
    fn publish_poll_release_cycle() {
        let mut p = pool(3);
        for round in 0..7 {
            let el = p.try_acquire_free().unwrap();
            assert_eq!(el.slot(), round % 3);
            p.publish_used(el);
            assert_eq!(p.number_used(), 1);
            assert_eq!(p.number_pending(), 1);

            let el = p.poll_used().unwrap();
            assert_eq!(p.number_used(), 1);
            assert_eq!(p.number_outstanding(), 1);
            assert!(p.poll_used().is_none());

            p.release_used(el).unwrap();
            assert_eq!(p.number_free(), 3);
            assert_eq!(p.number_used(), 0);
        }
    }

    #[test]
    fn poll_empty_returns_none() {
        let mut p = pool(2);
        assert!(p.poll_used().is_none());
    }

    #[test]
    fn release_out_of_order_is_rejected() {
        let mut p = pool(3);
        let a = p.try_acquire_free().unwrap();
        let b = p.try_acquire_free().unwrap();
        p.publish_used(a);
        p.publish_used(b);
        let a = p.poll_used().unwrap();
        let b = p.poll_used().unwrap();

        let err = p.release_used(b).unwrap_err();
        assert_eq!(err.expected().map(|s| s.slot), Some(0));
        assert_eq!(err.actual().slot, 1);
        assert_eq!(p.number_outstanding(), 2);
        assert_eq!(p.number_free(), 1);

        let b = err.into_element();
        p.release_used(a).unwrap();
        p.release_used(b).unwrap();
        assert_eq!(p.number_free(), 3);
    }

    #[test]
    fn release_without_outstanding_is_rejected() {
        let mut p = pool(2);
        let a = p.try_acquire_free().unwrap();
        let err = p.release_used(a).unwrap_err();
        assert!(err.expected().is_none());
        assert_eq!(p.number_free(), 1);
    }

    #[test]
    fn release_from_other_pool_is_rejected() {
        let mut p = pool(2);
        let mut q = pool(2);
        let a = p.try_acquire_free().unwrap();
        p.publish_used(a);
        let _polled = p.poll_used().unwrap();

        let foreign = q.try_acquire_free().unwrap();
        assert_eq!(foreign.slot(), 0);
        let err = p.release_used(foreign).unwrap_err();
        assert_eq!(err.expected().map(|s| s.slot), Some(0));
        assert_eq!(p.number_outstanding(), 1);
    }

    #[test]
    fn pool_state_accounts_everything() {
        let state = PoolState {
            capacity: 4,
            free: 1,
            pending: 1,
            outstanding: 0,
            current: true,
            next: true,
        };
        assert_eq!(state.accounted(), 4);
        assert_eq!(state.used(), 1);
    }
}
