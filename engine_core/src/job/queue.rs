//! Priority job queues. Strict priority: a `High` job is always picked over
//! a `Medium` or `Low` one regardless of how long the lower-priority jobs
//! have waited. The source documents no starvation remedy for continuous
//! high-priority traffic; this keeps that behaviour rather than inventing
//! an aging policy that isn't specified anywhere.

use std::sync::Arc;

use crate::containers::RingQueue;
use crate::error::JobSystemError;
use crate::threading::SpinLocked;

use super::counter::JobCounter;

pub type JobFn = extern "C" fn(data: *mut u8);

/// A unit of work: a function pointer, an opaque data pointer, and
/// optionally the counter to decrement on completion.
pub struct Job {
    pub func: JobFn,
    pub data: *mut u8,
    pub counter: Option<Arc<JobCounter>>,
    pub priority: JobPriority,
}

// SAFETY: `data` is only ever touched by `func` while the job runs on
// whichever worker picked it up; the job system never aliases it
// concurrently.
unsafe impl Send for Job {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPriority {
    High,
    Medium,
    Low,
}

pub struct JobQueues {
    high: SpinLocked<RingQueue<Job>>,
    medium: SpinLocked<RingQueue<Job>>,
    low: SpinLocked<RingQueue<Job>>,
}

impl JobQueues {
    pub fn new(capacity_per_priority: usize) -> Self {
        Self {
            high: SpinLocked::new(RingQueue::new(capacity_per_priority)),
            medium: SpinLocked::new(RingQueue::new(capacity_per_priority)),
            low: SpinLocked::new(RingQueue::new(capacity_per_priority)),
        }
    }

    fn queue_for(&self, priority: JobPriority) -> &SpinLocked<RingQueue<Job>> {
        match priority {
            JobPriority::High => &self.high,
            JobPriority::Medium => &self.medium,
            JobPriority::Low => &self.low,
        }
    }

    pub fn push(&self, priority: JobPriority, mut job: Job) -> Result<(), JobSystemError> {
        job.priority = priority;
        self.queue_for(priority).lock().push(job).map_err(|_| JobSystemError::QueueFull)
    }

    /// Pops the highest-priority job available: `High`, then `Medium`, then
    /// `Low`.
    pub fn pop(&self) -> Option<Job> {
        self.high.lock().pop().or_else(|| self.medium.lock().pop()).or_else(|| self.low.lock().pop())
    }

    pub fn is_empty(&self) -> bool {
        self.high.lock().is_empty() && self.medium.lock().is_empty() && self.low.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn noop(_: *mut u8) {}

    #[test]
    fn strict_priority_order() {
        let queues = JobQueues::new(8);
        queues
            .push(JobPriority::Low, Job { func: noop, data: core::ptr::null_mut(), counter: None, priority: JobPriority::Low })
            .unwrap();
        queues.push(JobPriority::High, Job { func: noop, data: 1 as *mut u8, counter: None, priority: JobPriority::High }).unwrap();
        queues
            .push(JobPriority::Medium, Job { func: noop, data: 2 as *mut u8, counter: None, priority: JobPriority::Medium })
            .unwrap();

        let first = queues.pop().unwrap();
        assert_eq!(first.data as usize, 1);
        let second = queues.pop().unwrap();
        assert_eq!(second.data as usize, 2);
        let third = queues.pop().unwrap();
        assert_eq!(third.data as usize, 0);
        assert!(queues.pop().is_none());
    }
}
