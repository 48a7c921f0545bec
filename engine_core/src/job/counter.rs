//! A job counter tracks how many jobs in a batch are still outstanding.
//! [`crate::job::system::JobSystem::kick_jobs`] hands the caller an
//! `Arc<JobCounter>`; every job in the batch decrements it on completion,
//! and anything waiting on the batch (another job via
//! [`yield_to_counter`](crate::job::system::yield_to_counter), or the
//! kicking thread via `blocking_kick_job`) is woken once it reaches zero.
//!
//! Waiters are stored as fiber-slot ids rather than an intrusive list of
//! pointers, since nothing here can freely alias raw pointers the way the
//! source's waiter linked list does.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use super::slot::FiberSlotId;

#[derive(Debug)]
pub struct JobCounter {
    remaining: AtomicU32,
    waiters: Mutex<Vec<FiberSlotId>>,
}

impl JobCounter {
    pub fn new(count: u32) -> Self {
        Self { remaining: AtomicU32::new(count), waiters: Mutex::new(Vec::new()) }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.remaining() == 0
    }

    /// Decrements the counter by one. If this decrement drains it to zero,
    /// returns every slot id that had registered as a waiter so the caller
    /// can requeue them.
    pub fn decrement(&self) -> Vec<FiberSlotId> {
        let prev = self.remaining.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "job counter decremented past zero");
        if prev == 1 {
            std::mem::take(&mut *self.waiters.lock())
        } else {
            Vec::new()
        }
    }

    /// Registers `slot` as waiting on this counter. Returns `false` (and
    /// registers nothing) if the counter had already reached zero by the
    /// time the caller checked, so the caller knows not to suspend.
    pub fn add_waiter(&self, slot: FiberSlotId) -> bool {
        let mut waiters = self.waiters.lock();
        if self.is_done() {
            return false;
        }
        waiters.push(slot);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrement_to_zero_returns_waiters() {
        let counter = JobCounter::new(2);
        assert!(counter.add_waiter(FiberSlotId(7)));
        assert!(counter.decrement().is_empty());
        let woken = counter.decrement();
        assert_eq!(woken, vec![FiberSlotId(7)]);
        assert!(counter.is_done());
    }

    #[test]
    fn add_waiter_on_already_done_counter_is_rejected() {
        let counter = JobCounter::new(1);
        counter.decrement();
        assert!(!counter.add_waiter(FiberSlotId(0)));
    }
}
