//! Bounded polling for script-driven page transitions.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Fixed-interval poll loop with an overall deadline.
///
/// ```ignore
/// let mut poller = Poller::new(interval, timeout);
/// while poller.tick().await {
///     if done().await { break; }
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    interval: Duration,
    timeout: Duration,
    started: Instant,
    first: bool,
}

impl Poller {
    /// Start the clock now.
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            started: Instant::now(),
            first: true,
        }
    }

    /// Time since the poller was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.elapsed() >= self.timeout
    }

    /// Wait for the next observation slot.
    ///
    /// The first call returns true immediately. Later calls sleep one
    /// interval, clipped to the deadline, and return false once it has passed.
    pub async fn tick(&mut self) -> bool {
        if self.first {
            self.first = false;
            return true;
        }
        let remaining = self.timeout.saturating_sub(self.elapsed());
        if remaining.is_zero() {
            return false;
        }
        sleep(self.interval.min(remaining)).await;
        true
    }
}

/// Evaluate `predicate` every `interval` until it holds or `timeout` passes.
///
/// The predicate is always evaluated at least once, and once more at the
/// deadline. Returns whether it ever held.
pub async fn await_condition<F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut predicate: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut poller = Poller::new(interval, timeout);
    while poller.tick().await {
        if predicate().await {
            return true;
        }
    }
    false
}
