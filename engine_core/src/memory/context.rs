//! Per-thread scratch memory.
//!
//! Every worker (and the main thread) owns a [`Context`]: a single stack
//! allocator used for transient, frame-scoped allocations. [`ScratchAllocator`]
//! is the handle code actually takes — a scoped mark into that stack, which
//! rewinds the stack back to where it started when dropped. Nesting is
//! enforced at the [`Context`] level rather than trusted to the caller: ending
//! a scratch allocator out of order panics instead of silently corrupting the
//! stack.

use core::cell::RefCell;
use core::ptr::NonNull;
use std::cell::Cell as StdCell;

use engine_tracing::trace_span;

use super::heap::AllocError;
use super::os::OsAllocator;
use super::stack::StackAllocator;

/// Default capacity of a thread's scratch stack. Matches the source's
/// per-thread scratch arena size.
pub const DEFAULT_SCRATCH_CAPACITY: usize = 64 * 1024 * 1024;

pub struct Context {
    stack: StackAllocator<'static>,
    marks: RefCell<Vec<usize>>,
}

impl Context {
    fn new(capacity: usize) -> Self {
        let stack = StackAllocator::new(OsAllocator::new().as_free_heap(), capacity)
            .expect("failed to reserve per-thread scratch stack from the OS");
        Self { stack, marks: RefCell::new(Vec::new()) }
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<Context>> = const { RefCell::new(None) };
    static SCRATCH_CAPACITY_OVERRIDE: StdCell<Option<usize>> = const { StdCell::new(None) };
}

/// Overrides the scratch stack capacity for the *current thread*, before its
/// [`Context`] is first touched. Intended for worker-thread setup, where the
/// job system wants a smaller or larger stack than [`DEFAULT_SCRATCH_CAPACITY`].
///
/// Panics if this thread's context has already been created.
pub fn set_thread_scratch_capacity(capacity: usize) {
    CONTEXT.with(|c| {
        assert!(c.borrow().is_none(), "scratch capacity must be set before first use on this thread");
    });
    SCRATCH_CAPACITY_OVERRIDE.with(|o| o.set(Some(capacity)));
}

fn with_context<R>(f: impl FnOnce(&Context) -> R) -> R {
    CONTEXT.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            let capacity = SCRATCH_CAPACITY_OVERRIDE.with(|o| o.get()).unwrap_or(DEFAULT_SCRATCH_CAPACITY);
            *slot = Some(Context::new(capacity));
        }
        f(slot.as_ref().expect("just initialized"))
    })
}

/// A scoped mark into the current thread's scratch stack. Allocations made
/// through this handle are all released together when it is dropped.
pub struct ScratchAllocator {
    mark: usize,
    ended: bool,
}

impl ScratchAllocator {
    pub fn begin() -> Self {
        let _span = trace_span!("context::scratch_begin");
        let mark = with_context(|ctx| {
            let cursor = ctx.stack.cursor();
            ctx.marks.borrow_mut().push(cursor);
            cursor
        });
        Self { mark, ended: false }
    }

    pub fn alloc_raw(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        with_context(|ctx| ctx.stack.push(size, align).map(|(ptr, _)| ptr))
    }

    /// Ends the scratch scope early. Equivalent to dropping it, but lets
    /// callers observe the nesting panic at a specific point rather than
    /// during an implicit drop.
    pub fn end(mut self) {
        self.end_inner();
    }

    fn end_inner(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        with_context(|ctx| {
            let popped = ctx.marks.borrow_mut().pop().expect("scratch mark stack underflow");
            assert_eq!(
                popped, self.mark,
                "scratch allocators must be ended in LIFO order (expected mark {}, found {})",
                self.mark, popped
            );
            ctx.stack.rewind_to(self.mark);
        });
    }
}

impl Drop for ScratchAllocator {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        // A panic already unwinding this thread (e.g. a sibling scratch
        // allocator's own nesting violation) must not trigger a second
        // panic here, or the process aborts instead of unwinding cleanly.
        if std::thread::panicking() {
            self.ended = true;
            with_context(|ctx| {
                ctx.marks.borrow_mut().pop();
            });
            return;
        }
        self.end_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_scratch_releases_to_pre_nesting_cursor() {
        let pre = with_context(|ctx| ctx.stack.cursor());

        let s1 = ScratchAllocator::begin();
        s1.alloc_raw(100, 16).unwrap();
        let s2 = ScratchAllocator::begin();
        s2.alloc_raw(50, 16).unwrap();
        drop(s2);
        drop(s1);

        let post = with_context(|ctx| ctx.stack.cursor());
        assert_eq!(pre, post);
    }

    #[test]
    #[should_panic(expected = "LIFO order")]
    fn ending_out_of_order_panics() {
        let s1 = ScratchAllocator::begin();
        let s2 = ScratchAllocator::begin();
        s1.end();
        drop(s2);
    }
}
