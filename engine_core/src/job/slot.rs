//! Fiber slots: a fixed pool of long-lived fibers, each running a small
//! dispatch loop rather than being torn down and recreated per job. A slot
//! is handed a [`Job`] while idle, resumed, runs it to completion (or
//! suspends it partway through via
//! [`yield_to_counter`](super::system::yield_to_counter)), and loops back
//! around waiting for its next job. This avoids paying fiber/stack creation
//! cost on every single job.

use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use crate::error::{FiberError, JobSystemError};
use crate::fiber::{self, Fiber};

use super::counter::JobCounter;
use super::queue::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberSlotId(pub usize);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Nothing assigned; eligible to be handed a fresh job.
    Idle = 0,
    /// Running or about to run a job handed to it.
    Busy = 1,
    /// Suspended inside a job via `yield_to_counter`, not eligible for
    /// reclaiming until the awaited counter wakes it.
    Waiting = 2,
}

pub(super) struct FiberSlotControl {
    pending: Mutex<Option<Job>>,
    state: AtomicU8,
    kill: core::sync::atomic::AtomicBool,
}

impl FiberSlotControl {
    fn state(&self) -> SlotState {
        match self.state.load(Ordering::Acquire) {
            0 => SlotState::Idle,
            1 => SlotState::Busy,
            _ => SlotState::Waiting,
        }
    }

    fn set_state(&self, state: SlotState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Marks the slot as suspended on a counter. Called directly on the
    /// control block (never through `FiberSlotPool::with_slot`) since this
    /// runs from inside the very fiber resume that already holds the
    /// slot's mutex on this thread — re-locking it would deadlock.
    pub(super) fn mark_waiting(&self) {
        self.set_state(SlotState::Waiting);
    }
}

thread_local! {
    /// The slot currently executing on this worker thread, if any, and a
    /// pointer to its control block. Read by `yield_to_counter` so it can
    /// register the right slot id as a waiter and flip it to `Waiting`
    /// without re-entering the slot pool's lock.
    static CURRENT_SLOT: core::cell::Cell<Option<(FiberSlotId, *const FiberSlotControl)>> =
        const { core::cell::Cell::new(None) };
}

pub(super) fn current_slot() -> Option<(FiberSlotId, *const FiberSlotControl)> {
    CURRENT_SLOT.with(|c| c.get())
}

extern "C" fn dispatch_loop(data: *mut u8) {
    // SAFETY: `data` is the `Arc<FiberSlotControl>` pointer leaked via
    // `Arc::into_raw` when this slot's fiber was created; reclaimed exactly
    // once here.
    let control = unsafe { Arc::from_raw(data as *const FiberSlotControl) };
    loop {
        if control.kill.load(Ordering::Acquire) {
            return;
        }

        let job = control.pending.lock().take();
        if let Some(job) = job {
            (job.func)(job.data);
            if let Some(counter) = job.counter {
                let woken = counter.decrement();
                super::system::requeue_woken(woken);
            }
            control.set_state(SlotState::Idle);
        }

        fiber::yield_now();
    }
}

pub(super) struct FiberSlot {
    fiber: Fiber,
    control: Arc<FiberSlotControl>,
}

impl FiberSlot {
    fn new(stack_size: usize) -> Result<Self, FiberError> {
        let control = Arc::new(FiberSlotControl {
            pending: Mutex::new(None),
            state: AtomicU8::new(SlotState::Idle as u8),
            kill: core::sync::atomic::AtomicBool::new(false),
        });
        let data = Arc::into_raw(Arc::clone(&control)) as *mut u8;
        let fiber = Fiber::new(stack_size, dispatch_loop, data)?;
        Ok(Self { fiber, control })
    }

    pub fn assign(&self, job: Job) {
        *self.control.pending.lock() = Some(job);
        self.control.set_state(SlotState::Busy);
    }

    /// Resumes the slot's fiber, setting up `CURRENT_SLOT` so a
    /// `yield_to_counter` call deep inside the job can find its way back
    /// here.
    pub fn resume(&mut self, id: FiberSlotId) {
        CURRENT_SLOT.with(|c| c.set(Some((id, Arc::as_ptr(&self.control)))));
        let _ = self.fiber.resume();
        CURRENT_SLOT.with(|c| c.set(None));
    }

    pub fn is_idle(&self) -> bool {
        self.control.state() == SlotState::Idle
    }
}

impl Drop for FiberSlot {
    fn drop(&mut self) {
        self.control.kill.store(true, Ordering::Release);
        // One last resume lets the dispatch loop observe the kill flag and
        // return, finishing the fiber cleanly before it's torn down.
        let _ = self.fiber.resume();
    }
}

/// A fixed-size pool of fiber slots. `acquire`/`release` hand out and take
/// back *ownership* of a slot for the duration of one job's residency on
/// it; the slot itself never moves once created, only its assignment does.
pub(super) struct FiberSlotPool {
    slots: Vec<Mutex<FiberSlot>>,
    free: SegQueue<FiberSlotId>,
}

impl FiberSlotPool {
    pub fn new(capacity: usize, stack_size: usize) -> Result<Self, JobSystemError> {
        let mut slots = Vec::with_capacity(capacity);
        let free = SegQueue::new();
        for i in 0..capacity {
            let slot = FiberSlot::new(stack_size).map_err(|_| JobSystemError::StackPoolExhausted)?;
            slots.push(Mutex::new(slot));
            free.push(FiberSlotId(i));
        }
        Ok(Self { slots, free })
    }

    pub fn try_acquire_idle(&self) -> Option<FiberSlotId> {
        self.free.pop()
    }

    pub fn release(&self, id: FiberSlotId) {
        self.free.push(id);
    }

    pub fn with_slot<R>(&self, id: FiberSlotId, f: impl FnOnce(&mut FiberSlot) -> R) -> R {
        let mut guard = self.slots[id.0].lock();
        f(&mut guard)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}
