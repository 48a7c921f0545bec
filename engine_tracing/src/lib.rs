//! Ambient tracing facade shared by every `engine_core` module.
//!
//! Core modules never depend on `tracing` directly; they go through
//! [`trace_span!`] so the profiler backend (plain `tracing-subscriber` by
//! default, Tracy when the `tracy` feature is enabled) stays swappable in
//! one place.

#[doc(hidden)]
pub use tracing;

#[cfg(feature = "tracy")]
#[doc(hidden)]
pub use tracy_client;

/// Opens a span for the duration of the enclosing scope.
///
/// Mirrors `tracing::span!(Level::TRACE, ..)` but funnels every call site
/// through this crate so the backend can be swapped without touching core
/// modules.
#[macro_export]
macro_rules! trace_span {
    ($name:expr) => {
        $crate::tracing::span!($crate::tracing::Level::TRACE, $name)
    };
    ($name:expr, $($field:tt)*) => {
        $crate::tracing::span!($crate::tracing::Level::TRACE, $name, $($field)*)
    };
}

/// Installs a default `tracing-subscriber` that prints to stderr, honoring
/// `RUST_LOG`. Intended for binaries and examples embedding the core; tests
/// should call this at most once per process.
pub fn init_subscriber() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

#[cfg(feature = "tracy")]
/// Starts the Tracy client. Must be called once before any spans are
/// recorded if the `tracy` feature is enabled.
pub fn start_tracy() -> tracy_client::Client {
    tracy_client::Client::start()
}
