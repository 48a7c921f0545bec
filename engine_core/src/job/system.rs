//! The job system proper: kicking work, waiting on it, and the worker
//! threads that actually run it.

use core::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_queue::SegQueue;

use crate::config::EngineConfig;
use crate::error::JobSystemError;
use crate::threading::{pin_current_thread_to_core, ThreadSignal};

use super::counter::JobCounter;
use super::queue::{Job, JobFn, JobPriority, JobQueues};
use super::slot::{current_slot, FiberSlotId, FiberSlotPool};
use super::worker::worker_loop;

pub(super) struct JobSystemInner {
    pub(super) queues: JobQueues,
    pub(super) slots: FiberSlotPool,
    pub(super) ready: SegQueue<FiberSlotId>,
    pub(super) signal: ThreadSignal,
    pub(super) shutdown: AtomicBool,
}

thread_local! {
    /// The job system that owns the worker thread currently executing,
    /// set once when that thread is spawned. Lets free functions like
    /// [`yield_to_counter`] and [`requeue_woken`] reach the right
    /// `JobSystemInner` without a process-wide singleton — each worker
    /// thread belongs to exactly one `JobSystem` for its whole life.
    static CURRENT_INNER: RefCell<Option<Arc<JobSystemInner>>> = const { RefCell::new(None) };
}

pub struct JobSystem {
    inner: Arc<JobSystemInner>,
    workers: Vec<JoinHandle<()>>,
}

impl JobSystem {
    /// Starts the job system: allocates the fiber slot pool and launches
    /// one worker thread per `config.resolved_worker_count()`, each pinned
    /// to its own physical core.
    pub fn new(config: &EngineConfig) -> Result<Self, JobSystemError> {
        let queue_capacity = 4096;
        let queues = JobQueues::new(queue_capacity);
        let slots = FiberSlotPool::new(config.job_stack_pool_size, config.job_stack_size)?;
        let inner = Arc::new(JobSystemInner {
            queues,
            slots,
            ready: SegQueue::new(),
            signal: ThreadSignal::new(),
            shutdown: AtomicBool::new(false),
        });

        let worker_count = config.resolved_worker_count();
        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let inner = Arc::clone(&inner);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("job-worker-{i}"))
                    .spawn(move || {
                        CURRENT_INNER.with(|c| *c.borrow_mut() = Some(Arc::clone(&inner)));
                        pin_current_thread_to_core(i);
                        worker_loop(&inner);
                    })
                    .expect("failed to spawn job worker thread"),
            );
        }

        Ok(Self { inner, workers })
    }

    /// Enqueues `jobs` at `priority` and returns a counter that reaches zero
    /// once every one of them has run.
    pub fn kick_jobs(&self, priority: JobPriority, jobs: Vec<(JobFn, *mut u8)>) -> Result<Arc<JobCounter>, JobSystemError> {
        let counter = Arc::new(JobCounter::new(jobs.len() as u32));
        for (func, data) in jobs {
            self.inner.queues.push(priority, Job { func, data, counter: Some(Arc::clone(&counter)), priority })?;
        }
        self.inner.signal.notify_all();
        Ok(counter)
    }

    /// Kicks `jobs` and blocks until they all complete. Called from inside
    /// a running job, this cooperatively yields through
    /// [`yield_to_counter`] so the worker goes on to run other work instead
    /// of parking; called from any other thread, it parks on the job
    /// system's signal instead, waking periodically to recheck, since there
    /// is no fiber there to suspend.
    pub fn blocking_kick_job(&self, priority: JobPriority, jobs: Vec<(JobFn, *mut u8)>) -> Result<(), JobSystemError> {
        let counter = self.kick_jobs(priority, jobs)?;
        if current_slot().is_some() {
            yield_to_counter(&counter);
            return Ok(());
        }
        while !counter.is_done() {
            self.inner.signal.wait_timeout(std::time::Duration::from_micros(200));
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn slot_pool_size(&self) -> usize {
        self.inner.slots.len()
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.signal.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Suspends the currently-running job until `counter` reaches zero, letting
/// the worker that was running it pick up other work in the meantime.
/// Panics if called from outside a job (there is no fiber to suspend).
pub fn yield_to_counter(counter: &Arc<JobCounter>) {
    let (id, control) = current_slot().expect("yield_to_counter called outside a running job");
    if !counter.add_waiter(id) {
        // Counter already hit zero between the caller checking and now;
        // nothing to wait for.
        return;
    }
    // SAFETY: `control` points at the slot's own control block, owned by
    // an `Arc` that stays alive for as long as this fiber can run (one
    // clone lives inside the dispatch loop for the fiber's whole lifetime).
    unsafe { &*control }.mark_waiting();
    crate::fiber::yield_now();
}

/// Pushes every slot id in `woken` onto the ready queue and wakes a worker
/// to go pick them up. Called from inside a fiber slot's dispatch loop
/// after a job it just ran drains a counter to zero.
pub(super) fn requeue_woken(woken: Vec<FiberSlotId>) {
    if woken.is_empty() {
        return;
    }
    CURRENT_INNER.with(|c| {
        if let Some(inner) = c.borrow().as_ref() {
            for id in woken {
                inner.ready.push(id);
            }
            inner.signal.notify_all();
        }
    });
}
