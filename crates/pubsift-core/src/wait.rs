//! Cancellable polling with an explicit deadline

use std::time::{Duration, Instant};

use crate::shutdown::is_shutdown_requested;

/// How a [`poll_until`] loop ended.
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The check produced a value
    Ready(T),
    /// Deadline passed before the check produced a value
    TimedOut,
    /// Shutdown was requested while waiting
    Cancelled,
}

/// Call `check` every `interval` until it returns `Some`, the deadline passes,
/// or shutdown is requested.
///
/// `check` runs at least once, even with a zero deadline.
pub fn poll_until<T>(
    deadline: Duration,
    interval: Duration,
    mut check: impl FnMut() -> Option<T>,
) -> PollOutcome<T> {
    let started = Instant::now();
    loop {
        if let Some(value) = check() {
            return PollOutcome::Ready(value);
        }
        if is_shutdown_requested() {
            return PollOutcome::Cancelled;
        }
        let elapsed = started.elapsed();
        if elapsed >= deadline {
            return PollOutcome::TimedOut;
        }
        std::thread::sleep(interval.min(deadline - elapsed));
    }
}
