use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation hook for long-running calls.
///
/// Ring searches poll it once per angular sample, optimizers once per
/// generation or iteration. When [`is_cancelled`](Self::is_cancelled) returns
/// `true` the call stops and returns a `Cancelled` error; inputs passed by
/// reference are never modified.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use powdercal::ProgressMonitor;
///
/// let flag = AtomicBool::new(false);
/// assert!(!flag.is_cancelled());
/// flag.store(true, Ordering::Relaxed);
/// assert!(flag.is_cancelled());
/// ```
pub trait ProgressMonitor {
    /// Whether the caller asked the current operation to stop.
    fn is_cancelled(&self) -> bool;

    /// Report `units` of completed work. Default: ignored.
    fn worked(&self, _units: usize) {}
}

/// Monitor that never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMonitor;

impl ProgressMonitor for NoopMonitor {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl ProgressMonitor for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

impl<M: ProgressMonitor + ?Sized> ProgressMonitor for &M {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }

    fn worked(&self, units: usize) {
        (**self).worked(units)
    }
}
