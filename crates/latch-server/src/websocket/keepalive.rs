//! Keep-alive ping scheduling and liveness checks.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Fixed-period ping schedule for one connection.
///
/// The first tick fires one full period after creation, never immediately.
/// Dropping the timer stops it.
#[derive(Debug)]
pub struct KeepAlive {
    interval: Interval,
}

impl KeepAlive {
    /// Start a schedule ticking every `period`.
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    /// Ping period.
    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    /// Wait for the next tick. Cancel-safe.
    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

/// Whether a client silent for `since_pong` has exceeded `timeout`.
///
/// A `None` timeout disables the check.
pub fn is_unresponsive(since_pong: Duration, timeout: Option<Duration>) -> bool {
    timeout.is_some_and(|limit| since_pong > limit)
}
