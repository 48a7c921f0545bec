//! Cooperatively-scheduled execution contexts with their own stack.
//!
//! A [`Fiber`] is launched with an entry function and a data pointer, runs
//! until it either returns or calls [`yield_now`], and is driven entirely by
//! explicit [`Fiber::resume`] calls from whichever thread currently owns it
//! — there is no preemption. The register file itself is platform-specific
//! and left to the OS's own fiber primitive rather than hand-rolled,
//! per the observable contract: resuming a finished fiber is distinguishable
//! from resuming a merely-yielded one.

#[cfg(windows)]
#[path = "windows.rs"]
mod platform;

#[cfg(not(windows))]
#[path = "unix.rs"]
mod platform;

pub use platform::FiberEntryFn;

use crate::error::FiberError;

/// A single cooperatively-scheduled execution context with its own stack.
pub struct Fiber {
    inner: platform::PlatformFiber,
}

impl Fiber {
    /// Allocates a new fiber with `stack_size` bytes of stack. `entry` is
    /// called with `data` once the fiber is first resumed.
    pub fn new(stack_size: usize, entry: FiberEntryFn, data: *mut u8) -> Result<Self, FiberError> {
        Ok(Self { inner: platform::PlatformFiber::new(stack_size, entry, data)? })
    }

    /// Switches the calling thread into this fiber. Returns once the fiber
    /// either calls [`yield_now`] or its entry function returns.
    pub fn resume(&mut self) -> Result<(), FiberError> {
        self.inner.resume()
    }

    /// Whether the entry function has returned. A finished fiber cannot be
    /// resumed again.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

/// Switches out of the currently-running fiber, back to whichever thread or
/// fiber last called [`Fiber::resume`] on it. Must only be called from
/// inside a fiber's entry function (directly, or transitively through
/// ordinary function calls); calling it from outside any fiber is a no-op.
pub fn yield_now() {
    platform::PlatformFiber::yield_now();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    extern "C" fn increment_once(_data: *mut u8) {
        COUNTER.fetch_add(1, Ordering::SeqCst);
        yield_now();
        COUNTER.fetch_add(10, Ordering::SeqCst);
    }

    #[test]
    fn resume_runs_until_yield_then_until_return() {
        COUNTER.store(0, Ordering::SeqCst);
        let mut fiber = Fiber::new(256 * 1024, increment_once, core::ptr::null_mut()).unwrap();

        fiber.resume().unwrap();
        assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
        assert!(!fiber.is_finished());

        fiber.resume().unwrap();
        assert_eq!(COUNTER.load(Ordering::SeqCst), 11);
        assert!(fiber.is_finished());

        assert_eq!(fiber.resume(), Err(FiberError::AlreadyReturned));
    }
}
