//! Fiber context switching backed by POSIX `ucontext_t`
//! (`getcontext`/`makecontext`/`swapcontext`). Used on any non-Windows
//! target — development and CI run here even though the engine's
//! production target is Windows, so this backend exists purely to keep the
//! rest of the crate testable off-platform.

use core::cell::RefCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicBool, Ordering};

use libc::ucontext_t;

use crate::error::FiberError;

pub type FiberEntryFn = extern "C" fn(data: *mut u8);

struct FiberControl {
    entry: FiberEntryFn,
    data: *mut u8,
    returned: AtomicBool,
}

thread_local! {
    /// Contexts to switch back into once the currently-running fiber next
    /// yields or returns, one per level of `resume` nesting on this thread.
    static RESUME_STACK: RefCell<Vec<*mut ucontext_t>> = const { RefCell::new(Vec::new()) };
    /// The currently-running fiber's own context, so `yield_now` knows what
    /// to save state into.
    static CURRENT_CTX: RefCell<Vec<*mut ucontext_t>> = const { RefCell::new(Vec::new()) };
}

unsafe extern "C" fn trampoline(hi: u32, lo: u32) {
    let addr = ((hi as usize) << 32) | lo as usize;
    // SAFETY: `addr` was split from the `FiberControl` pointer leaked in
    // `PlatformFiber::new`, reconstructed exactly as it was passed in.
    let control = unsafe { &*(addr as *const FiberControl) };
    (control.entry)(control.data);
    control.returned.store(true, Ordering::Release);
    loop {
        let target = RESUME_STACK.with(|s| s.borrow().last().copied());
        let current = CURRENT_CTX.with(|s| s.borrow().last().copied());
        if let (Some(target), Some(current)) = (target, current) {
            // SAFETY: both pointers are live stack locals owned by the
            // `resume` call still on this thread's native call stack.
            unsafe {
                libc::swapcontext(current, target);
            }
        } else {
            core::hint::spin_loop();
        }
    }
}

pub struct PlatformFiber {
    ctx: Box<ucontext_t>,
    _stack: Box<[u8]>,
    control: *mut FiberControl,
}

impl PlatformFiber {
    pub fn new(stack_size: usize, entry: FiberEntryFn, data: *mut u8) -> Result<Self, FiberError> {
        if stack_size < 16 * 1024 {
            return Err(FiberError::StackTooSmall);
        }

        let mut stack = vec![0u8; stack_size].into_boxed_slice();
        let control = Box::into_raw(Box::new(FiberControl { entry, data, returned: AtomicBool::new(false) }));

        let mut ctx_uninit: MaybeUninit<ucontext_t> = MaybeUninit::zeroed();
        // SAFETY: `ctx_uninit` is a valid, suitably-sized buffer for
        // `getcontext` to populate.
        unsafe {
            libc::getcontext(ctx_uninit.as_mut_ptr());
        }
        let mut ctx = unsafe { ctx_uninit.assume_init() };
        ctx.uc_stack.ss_sp = stack.as_mut_ptr().cast();
        ctx.uc_stack.ss_size = stack.len();
        ctx.uc_link = core::ptr::null_mut();

        let addr = control as usize;
        let hi = (addr >> 32) as u32;
        let lo = addr as u32;
        // SAFETY: `trampoline` accepts exactly the two `u32` arguments
        // passed here, matching `makecontext`'s C varargs contract.
        unsafe {
            libc::makecontext(&mut ctx, core::mem::transmute(trampoline as unsafe extern "C" fn(u32, u32)), 2, hi, lo);
        }

        Ok(Self { ctx: Box::new(ctx), _stack: stack, control })
    }

    pub fn is_finished(&self) -> bool {
        // SAFETY: `control` is valid until `Drop`.
        unsafe { (*self.control).returned.load(Ordering::Acquire) }
    }

    pub fn resume(&mut self) -> Result<(), FiberError> {
        if self.is_finished() {
            return Err(FiberError::AlreadyReturned);
        }

        let mut resumer_ctx: MaybeUninit<ucontext_t> = MaybeUninit::zeroed();
        let resumer_ptr = resumer_ctx.as_mut_ptr();
        let fiber_ptr: *mut ucontext_t = &mut *self.ctx;

        RESUME_STACK.with(|s| s.borrow_mut().push(resumer_ptr));
        CURRENT_CTX.with(|s| s.borrow_mut().push(fiber_ptr));

        // SAFETY: `resumer_ptr` is a valid, writable buffer; `fiber_ptr`
        // points at a context previously initialized by `getcontext` and
        // `makecontext`.
        unsafe {
            libc::swapcontext(resumer_ptr, fiber_ptr);
        }

        RESUME_STACK.with(|s| {
            s.borrow_mut().pop();
        });
        CURRENT_CTX.with(|s| {
            s.borrow_mut().pop();
        });
        Ok(())
    }

    pub fn yield_now() {
        let target = RESUME_STACK.with(|s| s.borrow().last().copied());
        let current = CURRENT_CTX.with(|s| s.borrow().last().copied());
        if let (Some(target), Some(current)) = (target, current) {
            // SAFETY: both are live stack locals owned by an in-progress
            // `resume` call on this thread.
            unsafe {
                libc::swapcontext(current, target);
            }
        }
    }
}

impl Drop for PlatformFiber {
    fn drop(&mut self) {
        // SAFETY: paired with the `Box::into_raw` in `new`; nothing
        // references `control` once this fiber can no longer be resumed.
        drop(unsafe { Box::from_raw(self.control) });
    }
}

// SAFETY: a `PlatformFiber` is only ever driven from one OS thread at a
// time.
unsafe impl Send for PlatformFiber {}
