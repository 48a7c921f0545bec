//! Fiber context switching backed by the Win32 Fiber API
//! (`ConvertThreadToFiber`/`CreateFiberEx`/`SwitchToFiber`).
//!
//! The design notes explicitly permit leaning on a platform's native fiber
//! API rather than hand-writing a register-save trampoline, as long as the
//! observable contract holds: resuming a fiber that already ran its entry
//! function to completion is distinguishable from resuming one that merely
//! yielded. `CreateFiberEx` gives us exactly that for free.

use core::cell::{Cell, RefCell};
use core::ffi::c_void;
use core::sync::atomic::{AtomicBool, Ordering};

use windows_sys::Win32::System::Threading::{ConvertThreadToFiber, CreateFiberEx, DeleteFiber, SwitchToFiber};

use crate::error::FiberError;

pub type FiberEntryFn = extern "C" fn(data: *mut u8);

struct FiberControl {
    entry: FiberEntryFn,
    data: *mut u8,
    returned: AtomicBool,
}

thread_local! {
    /// The fiber representing this OS thread's own stack, created lazily on
    /// first resume. Every worker thread needs exactly one.
    static THREAD_FIBER: Cell<*mut c_void> = const { Cell::new(core::ptr::null_mut()) };
    /// Stack of "switch back to" targets, pushed before switching into a
    /// fiber and popped after it next switches back out.
    static RESUME_STACK: RefCell<Vec<*mut c_void>> = const { RefCell::new(Vec::new()) };
}

fn ensure_thread_fiber() -> *mut c_void {
    THREAD_FIBER.with(|cell| {
        let existing = cell.get();
        if !existing.is_null() {
            return existing;
        }
        // SAFETY: FFI call with no preconditions beyond "not already a
        // fiber", which this thread-local guards against repeating.
        let fiber = unsafe { ConvertThreadToFiber(core::ptr::null()) };
        cell.set(fiber);
        fiber
    })
}

unsafe extern "system" fn trampoline(param: *mut c_void) {
    // SAFETY: `param` is the `FiberControl` leaked in `PlatformFiber::new`,
    // which outlives the fiber (freed only after `DeleteFiber`).
    let control = unsafe { &*(param as *const FiberControl) };
    (control.entry)(control.data);
    control.returned.store(true, Ordering::Release);
    loop {
        let target = RESUME_STACK.with(|s| s.borrow().last().copied());
        match target {
            Some(target) if !target.is_null() => {
                // SAFETY: `target` is a live fiber handle pushed by `resume`.
                unsafe { SwitchToFiber(target) };
            }
            _ => core::hint::spin_loop(),
        }
    }
}

pub struct PlatformFiber {
    handle: *mut c_void,
    control: *mut FiberControl,
}

impl PlatformFiber {
    pub fn new(stack_size: usize, entry: FiberEntryFn, data: *mut u8) -> Result<Self, FiberError> {
        if stack_size < 4096 {
            return Err(FiberError::StackTooSmall);
        }
        let control = Box::into_raw(Box::new(FiberControl { entry, data, returned: AtomicBool::new(false) }));
        // SAFETY: `trampoline` matches `LPFIBER_START_ROUTINE`, and
        // `control` stays alive until `DeleteFiber` runs in `Drop`.
        let handle = unsafe { CreateFiberEx(stack_size, stack_size, 0, Some(trampoline), control.cast()) };
        if handle.is_null() {
            // SAFETY: `CreateFiberEx` never took ownership since it failed.
            drop(unsafe { Box::from_raw(control) });
            return Err(FiberError::StackTooSmall);
        }
        Ok(Self { handle, control })
    }

    pub fn is_finished(&self) -> bool {
        // SAFETY: `control` is valid until `Drop`.
        unsafe { (*self.control).returned.load(Ordering::Acquire) }
    }

    pub fn resume(&mut self) -> Result<(), FiberError> {
        if self.is_finished() {
            return Err(FiberError::AlreadyReturned);
        }
        let resumer = ensure_thread_fiber();
        RESUME_STACK.with(|s| s.borrow_mut().push(resumer));
        // SAFETY: `self.handle` is a live fiber created by `CreateFiberEx`.
        unsafe { SwitchToFiber(self.handle) };
        RESUME_STACK.with(|s| {
            s.borrow_mut().pop();
        });
        Ok(())
    }

    pub fn yield_now() {
        let target = RESUME_STACK.with(|s| s.borrow().last().copied());
        if let Some(target) = target {
            if !target.is_null() {
                // SAFETY: `target` was pushed by a live `resume` call still
                // on this thread's call stack, waiting for us to switch
                // back.
                unsafe { SwitchToFiber(target) };
            }
        }
    }
}

impl Drop for PlatformFiber {
    fn drop(&mut self) {
        // SAFETY: `self.handle` was created by `CreateFiberEx` and is not
        // the currently-running fiber (fibers are only ever dropped from
        // the scheduling context that owns them).
        unsafe { DeleteFiber(self.handle) };
        // SAFETY: paired with the `Box::into_raw` in `new`; nothing else
        // holds a reference to `control` once the fiber is deleted.
        drop(unsafe { Box::from_raw(self.control) });
    }
}

// SAFETY: a `PlatformFiber` is only ever driven from one OS thread at a
// time (the job system never shares a fiber handle across threads while
// it's suspended), so sending the handle across threads between resumes is
// sound.
unsafe impl Send for PlatformFiber {}
