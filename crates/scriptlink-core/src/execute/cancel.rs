//! Cooperative cancellation for running scripts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Thread-safe cancellation signal for one execution.
///
/// A signal is tripped either explicitly through [`cancel`](Self::cancel) or
/// implicitly once its deadline passes. Clones share the explicit flag, so
/// tripping any clone is visible to all of them. Signals are never reset;
/// each execution gets a fresh one.
///
/// # Example
///
/// ```
/// use scriptlink_core::CancelSignal;
///
/// let signal = CancelSignal::new();
/// let observer = signal.clone();
///
/// assert!(!observer.is_cancelled());
/// signal.cancel();
/// assert!(observer.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelSignal {
    /// A signal with no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that trips by itself at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// A signal that trips by itself after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// True once cancelled explicitly or past the deadline.
    ///
    /// Scripts poll this through `ScriptContext::is_cancelled`.
    pub fn is_cancelled(&self) -> bool {
        self.was_cancelled() || self.deadline_elapsed()
    }

    /// True only if [`cancel`](Self::cancel) was called.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn deadline_elapsed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Request cancellation. Returns `false` if it was already requested.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_signal_default() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());
        assert!(signal.deadline().is_none());
    }

    #[test]
    fn test_cancel_is_shared_and_idempotent() {
        let signal = CancelSignal::new();
        let clone = signal.clone();

        assert!(clone.cancel());
        assert!(!signal.cancel());
        assert!(signal.is_cancelled());
        assert!(signal.was_cancelled());
    }

    #[test]
    fn test_deadline_trips_without_explicit_cancel() {
        let signal = CancelSignal::with_timeout(Duration::from_millis(20));
        assert!(!signal.is_cancelled());

        std::thread::sleep(Duration::from_millis(40));

        assert!(signal.is_cancelled());
        assert!(signal.deadline_elapsed());
        assert!(!signal.was_cancelled());
    }

    #[test]
    fn test_cancel_across_threads() {
        let signal = CancelSignal::new();
        let worker = signal.clone();

        let handle = std::thread::spawn(move || {
            while !worker.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            true
        });

        signal.cancel();
        assert!(handle.join().unwrap());
    }
}
