//! The worker thread loop: one per physical core (minus one for the main
//! thread), each pulling from the ready queue of suspended work before ever
//! starting anything fresh, since resuming a job that's already holding
//! stack and partial progress is strictly cheaper than spinning up a new
//! one.

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::system::JobSystemInner;

const IDLE_WAIT: Duration = Duration::from_micros(200);

pub(super) fn worker_loop(inner: &JobSystemInner) {
    while !inner.shutdown.load(Ordering::Acquire) {
        if let Some(id) = inner.ready.pop() {
            let became_idle = inner.slots.with_slot(id, |slot| {
                slot.resume(id);
                slot.is_idle()
            });
            if became_idle {
                inner.slots.release(id);
            }
            continue;
        }

        if let Some(job) = inner.queues.pop() {
            match inner.slots.try_acquire_idle() {
                Some(id) => {
                    let became_idle = inner.slots.with_slot(id, |slot| {
                        slot.assign(job);
                        slot.resume(id);
                        slot.is_idle()
                    });
                    if became_idle {
                        inner.slots.release(id);
                    }
                }
                None => {
                    // Every slot is busy; put the job back at its original
                    // priority and let whoever drains a slot next pick it
                    // up. Relative order among same-priority jobs is not
                    // preserved here, only the priority itself.
                    let priority = job.priority;
                    let _ = inner.queues.push(priority, job);
                    inner.signal.wait_timeout(IDLE_WAIT);
                }
            }
            continue;
        }

        inner.signal.wait_timeout(IDLE_WAIT);
    }
}
