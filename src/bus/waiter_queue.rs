// FIFO queues of parked tasks.
//
// each parked operation future owns one end of a shared slot; the queue owns
// the other. waking marks the slot and fires its waker; the woken future
// re-attempts its try-form on the next poll. a future dropped while parked
// flips its slot to cancelled, and the queue discards such slots without
// spending a wakeup on them.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::task::Waker;

/// What a parked slot is currently doing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum SlotState {
    /// parked, waiting for a wakeup from the bus protocol or a close
    Waiting,
    /// woken; the owning future should retry its try-form when next polled
    Woken,
    /// the owning future was dropped while parked; skip without waking
    Cancelled,
}

/// One parked task. The queue holds one `Rc` clone, the parked future the
/// other, so neither side can observe freed memory across a close.
pub(crate) struct WaiterSlot {
    state: Cell<SlotState>,
    waker: Cell<Option<Waker>>,
}

impl WaiterSlot {
    pub(crate) fn state(&self) -> SlotState {
        self.state.get()
    }

    /// Refresh the waker after a poll that stays pending. The task may have
    /// migrated since it parked, so the stored waker can be stale.
    pub(crate) fn set_waker(&self, waker: &Waker) {
        self.waker.set(Some(waker.clone()));
    }

    /// Mark the slot as abandoned by its future.
    pub(crate) fn cancel(&self) {
        self.state.set(SlotState::Cancelled);
    }

    fn wake(&self) {
        self.state.set(SlotState::Woken);
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

/// Strict FIFO of parked tasks: waiters are woken in the order they parked.
#[derive(Default)]
pub(crate) struct WaiterQueue {
    slots: VecDeque<Rc<WaiterSlot>>,
}

impl WaiterQueue {
    pub(crate) fn new() -> Self {
        WaiterQueue::default()
    }

    /// Park the calling task at the tail. The returned handle is how the
    /// owning future observes its wakeup, and how its drop cancels the slot.
    pub(crate) fn park(&mut self, waker: &Waker) -> Rc<WaiterSlot> {
        let slot = Rc::new(WaiterSlot {
            state: Cell::new(SlotState::Waiting),
            waker: Cell::new(Some(waker.clone())),
        });
        self.slots.push_back(Rc::clone(&slot));
        slot
    }

    /// Wake the first still-parked waiter and remove it from the queue.
    /// Returns false if no waiter was parked. Cancelled slots are discarded
    /// without consuming the wakeup.
    pub(crate) fn wake_one(&mut self) -> bool {
        while let Some(slot) = self.slots.pop_front() {
            if slot.state() == SlotState::Waiting {
                slot.wake();
                return true;
            }
            debug_assert_eq!(slot.state(), SlotState::Cancelled);
        }
        false
    }

    /// Wake every parked waiter, draining the queue.
    pub(crate) fn wake_all(&mut self) {
        while self.wake_one() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::Wake;

    struct WakeCounter(AtomicUsize);

    impl Wake for WakeCounter {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn counter() -> (Arc<WakeCounter>, Waker) {
        let counter = Arc::new(WakeCounter(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        (counter, waker)
    }

    #[test]
    fn wakes_in_park_order() {
        let mut queue = WaiterQueue::new();
        let (c1, w1) = counter();
        let (c2, w2) = counter();
        let first = queue.park(&w1);
        let second = queue.park(&w2);

        assert!(queue.wake_one());
        assert_eq!(first.state(), SlotState::Woken);
        assert_eq!(second.state(), SlotState::Waiting);
        assert_eq!(c1.0.load(Ordering::Relaxed), 1);
        assert_eq!(c2.0.load(Ordering::Relaxed), 0);

        assert!(queue.wake_one());
        assert_eq!(second.state(), SlotState::Woken);
        assert!(!queue.wake_one());
    }

    #[test]
    fn cancelled_slot_does_not_consume_wakeup() {
        let mut queue = WaiterQueue::new();
        let (c1, w1) = counter();
        let (c2, w2) = counter();
        let first = queue.park(&w1);
        let second = queue.park(&w2);

        first.cancel();
        assert!(queue.wake_one());
        assert_eq!(c1.0.load(Ordering::Relaxed), 0);
        assert_eq!(c2.0.load(Ordering::Relaxed), 1);
        assert_eq!(second.state(), SlotState::Woken);
    }

    #[test]
    fn wake_all_drains() {
        let mut queue = WaiterQueue::new();
        let (_, w) = counter();
        let slots: Vec<_> = (0..4).map(|_| queue.park(&w)).collect();
        slots[2].cancel();

        queue.wake_all();
        assert!(!queue.wake_one());
        for (i, slot) in slots.iter().enumerate() {
            let expected = if i == 2 { SlotState::Cancelled } else { SlotState::Woken };
            assert_eq!(slot.state(), expected);
        }
    }

    #[test]
    fn refreshed_waker_is_the_one_fired() {
        let mut queue = WaiterQueue::new();
        let (stale, w1) = counter();
        let (fresh, w2) = counter();
        let slot = queue.park(&w1);
        slot.set_waker(&w2);

        assert!(queue.wake_one());
        assert_eq!(stale.0.load(Ordering::Relaxed), 0);
        assert_eq!(fresh.0.load(Ordering::Relaxed), 1);
    }
}
