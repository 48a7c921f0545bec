//! A simple wait/notify signal, used by worker threads to sleep when no
//! jobs are queued rather than spin indefinitely.

use parking_lot::{Condvar, Mutex};

pub struct ThreadSignal {
    flag: Mutex<bool>,
    condvar: Condvar,
}

impl Default for ThreadSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadSignal {
    pub fn new() -> Self {
        Self { flag: Mutex::new(false), condvar: Condvar::new() }
    }

    /// Wakes exactly one waiter, or leaves the signal set if nobody is
    /// currently waiting.
    pub fn notify_one(&self) {
        *self.flag.lock() = true;
        self.condvar.notify_one();
    }

    pub fn notify_all(&self) {
        *self.flag.lock() = true;
        self.condvar.notify_all();
    }

    /// Blocks until notified, then clears the signal.
    pub fn wait(&self) {
        let mut guard = self.flag.lock();
        while !*guard {
            self.condvar.wait(&mut guard);
        }
        *guard = false;
    }

    /// Blocks until notified or `timeout` elapses. Returns whether the
    /// signal fired before the timeout.
    pub fn wait_timeout(&self, timeout: std::time::Duration) -> bool {
        let mut guard = self.flag.lock();
        if !*guard {
            let result = self.condvar.wait_for(&mut guard, timeout);
            if result.timed_out() && !*guard {
                return false;
            }
        }
        *guard = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn notify_wakes_waiter() {
        let signal = Arc::new(ThreadSignal::new());
        let waiter = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            waiter.wait();
        });

        thread::sleep(Duration::from_millis(10));
        signal.notify_one();
        handle.join().unwrap();
    }

    #[test]
    fn wait_timeout_reports_timeout() {
        let signal = ThreadSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(5)));
    }
}
