//! Thread-level primitives: locks, a wait/notify signal, and core pinning
//! for worker threads.

mod rw_lock;
mod signal;
mod spin_lock;

pub use rw_lock::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use signal::ThreadSignal;
pub use spin_lock::{SpinLocked, SpinLockedGuard};

/// Pins the calling thread to the physical core at `index`, wrapping
/// around if there are fewer cores than workers requesting one. Job-system
/// worker threads call this once at startup; failures are non-fatal (the
/// OS simply schedules the thread normally), so this logs at
/// `tracing::warn` rather than returning a `Result`.
pub fn pin_current_thread_to_core(index: usize) {
    let _span = engine_tracing::trace_span!("threading::pin_current_thread_to_core");
    let Some(cores) = core_affinity::get_core_ids() else {
        engine_tracing::tracing::warn!("could not enumerate core ids; leaving thread unpinned");
        return;
    };
    if cores.is_empty() {
        return;
    }
    let core = cores[index % cores.len()];
    if !core_affinity::set_for_current(core) {
        engine_tracing::tracing::warn!(?index, "failed to pin worker thread to core");
    }
}
