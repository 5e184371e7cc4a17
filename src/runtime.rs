//! Process-wide runtime hooks.
//!
//! The timeout and log callbacks are intentionally process-wide rather than
//! per-index: every search consults the same `timed_out` predicate so a
//! caller can wire one deadline policy (e.g. a wall-clock budget) across an
//! entire fleet of indices. Tests that install a callback must snapshot and
//! restore it (see `CallbackGuard`) so they don't bleed into other tests.

use std::sync::OnceLock;

use parking_lot::RwLock;

/// Opaque, caller-defined timeout context threaded through the search loop.
/// This crate never interprets it; it's handed back verbatim to
/// `timed_out`.
pub type TimeoutCtx = u64;

type TimeoutFn = Box<dyn Fn(TimeoutCtx) -> bool + Send + Sync>;
type LogFn = Box<dyn Fn(&str) + Send + Sync>;

fn timeout_slot() -> &'static RwLock<Option<TimeoutFn>> {
    static SLOT: OnceLock<RwLock<Option<TimeoutFn>>> = OnceLock::new();
    SLOT.get_or_init(|| RwLock::new(None))
}

fn log_slot() -> &'static RwLock<Option<LogFn>> {
    static SLOT: OnceLock<RwLock<Option<LogFn>>> = OnceLock::new();
    SLOT.get_or_init(|| RwLock::new(None))
}

/// Install the process-wide timeout predicate, consulted at each iteration
/// of the beam loop.
pub fn set_timeout_callback<F>(f: F)
where
    F: Fn(TimeoutCtx) -> bool + Send + Sync + 'static,
{
    *timeout_slot().write() = Some(Box::new(f));
}

pub fn clear_timeout_callback() {
    *timeout_slot().write() = None;
}

/// Returns `false` (never time out) when no callback has been installed.
pub fn timed_out(ctx: TimeoutCtx) -> bool {
    match timeout_slot().read().as_ref() {
        Some(f) => f(ctx),
        None => false,
    }
}

/// Install the process-wide diagnostic sink. Defaults to forwarding through
/// `tracing::debug!` when unset, so the hook is additive rather than
/// replacing the ambient logging the rest of the crate emits.
pub fn set_log_callback<F>(f: F)
where
    F: Fn(&str) + Send + Sync + 'static,
{
    *log_slot().write() = Some(Box::new(f));
}

pub fn clear_log_callback() {
    *log_slot().write() = None;
}

pub fn log(msg: &str) {
    match log_slot().read().as_ref() {
        Some(f) => f(msg),
        None => tracing::debug!(target: "vecsim_core::runtime", "{msg}"),
    }
}

/// RAII helper for tests: snapshots both callback slots on construction and
/// restores them on drop, so installing a fake timeout predicate in one test
/// can't leak into the next.
pub struct CallbackGuard {
    _private: (),
}

impl CallbackGuard {
    pub fn install() -> Self {
        Self { _private: () }
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        clear_timeout_callback();
        clear_log_callback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn default_never_times_out() {
        let _guard = CallbackGuard::install();
        assert!(!timed_out(0));
    }

    #[test]
    fn installed_predicate_is_consulted() {
        let _guard = CallbackGuard::install();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        set_timeout_callback(move |_ctx| {
            fired2.store(true, Ordering::SeqCst);
            true
        });
        assert!(timed_out(42));
        assert!(fired.load(Ordering::SeqCst));
    }
}
