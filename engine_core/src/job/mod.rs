//! The fiber-based job system: priority work queues feeding a fixed pool
//! of long-lived fibers, one worker OS thread per physical core. Jobs run
//! to completion or cooperatively suspend mid-job via
//! [`yield_to_counter`] waiting on a sub-batch; either way the worker that
//! was running them is immediately free to pick up other work.

mod counter;
mod queue;
mod slot;
mod system;
mod worker;

pub use counter::JobCounter;
pub use queue::{Job, JobFn, JobPriority, JobQueues};
pub use system::{yield_to_counter, JobSystem};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::config::EngineConfig;

    static SHARED_COUNTER: AtomicI64 = AtomicI64::new(0);

    extern "C" fn add_ten_thousand(_data: *mut u8) {
        SHARED_COUNTER.fetch_add(10_000, Ordering::SeqCst);
    }

    #[test]
    fn thousand_jobs_each_add_ten_thousand() {
        SHARED_COUNTER.store(0, Ordering::SeqCst);
        let mut config = EngineConfig::default();
        config.job_stack_pool_size = 16;
        config.job_stack_size = 64 * 1024;
        config.worker_count = Some(4);

        let system = JobSystem::new(&config).expect("job system should start");
        let jobs = (0..1000).map(|_| (add_ten_thousand as JobFn, core::ptr::null_mut())).collect();
        system.blocking_kick_job(JobPriority::High, jobs).expect("batch should complete");

        assert_eq!(SHARED_COUNTER.load(Ordering::SeqCst), 10_000_000);
        assert_eq!(system.slot_pool_size(), 16);
    }

    static FORK_JOIN_RESULT: AtomicI64 = AtomicI64::new(0);

    extern "C" fn leaf_job(_data: *mut u8) {
        FORK_JOIN_RESULT.fetch_add(1, Ordering::SeqCst);
    }

    extern "C" fn parent_job(data: *mut u8) {
        let system = unsafe { &*(data as *const JobSystem) };
        let counter =
            system.kick_jobs(JobPriority::Medium, vec![(leaf_job as JobFn, core::ptr::null_mut()); 4]).unwrap();
        yield_to_counter(&counter);
        FORK_JOIN_RESULT.fetch_add(100, Ordering::SeqCst);
    }

    #[test]
    fn yield_to_counter_resumes_after_children_complete() {
        FORK_JOIN_RESULT.store(0, Ordering::SeqCst);
        let mut config = EngineConfig::default();
        config.job_stack_pool_size = 8;
        config.worker_count = Some(2);

        let system = Arc::new(JobSystem::new(&config).expect("job system should start"));
        let system_ptr = Arc::as_ptr(&system) as *mut u8;
        system.blocking_kick_job(JobPriority::High, vec![(parent_job as JobFn, system_ptr)]).unwrap();

        assert_eq!(FORK_JOIN_RESULT.load(Ordering::SeqCst), 104);
    }

    static NESTED_BLOCKING_RESULT: AtomicI64 = AtomicI64::new(0);

    extern "C" fn nested_leaf_job(_data: *mut u8) {
        NESTED_BLOCKING_RESULT.fetch_add(1, Ordering::SeqCst);
    }

    /// Calls `blocking_kick_job` from inside a running job. With only two
    /// workers and four children plus this parent all competing for slots,
    /// an OS-thread-blocking `blocking_kick_job` here would deadlock the
    /// worker running it; it must instead cooperatively yield.
    extern "C" fn nested_blocking_parent_job(data: *mut u8) {
        let system = unsafe { &*(data as *const JobSystem) };
        system
            .blocking_kick_job(JobPriority::Medium, vec![(nested_leaf_job as JobFn, core::ptr::null_mut()); 4])
            .unwrap();
        NESTED_BLOCKING_RESULT.fetch_add(100, Ordering::SeqCst);
    }

    #[test]
    fn blocking_kick_job_yields_instead_of_blocking_the_worker_when_called_from_a_job() {
        NESTED_BLOCKING_RESULT.store(0, Ordering::SeqCst);
        let mut config = EngineConfig::default();
        config.job_stack_pool_size = 8;
        config.worker_count = Some(2);

        let system = Arc::new(JobSystem::new(&config).expect("job system should start"));
        let system_ptr = Arc::as_ptr(&system) as *mut u8;
        system.blocking_kick_job(JobPriority::High, vec![(nested_blocking_parent_job as JobFn, system_ptr)]).unwrap();

        assert_eq!(NESTED_BLOCKING_RESULT.load(Ordering::SeqCst), 104);
    }
}
