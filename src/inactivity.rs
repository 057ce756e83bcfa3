//! Last-request tracking and the inactivity shutdown monitor.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::Instant;
use tokio::time::sleep;

/// How often the monitor checks the last-request timestamp.
const CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Records when the server last saw a request.
///
/// Updated by the HTTP middleware on request entry and response completion.
/// Only monotonicity matters; in the worst case the monitor misses an update
/// by one tick.
#[derive(Debug)]
pub struct InactivityTracker {
    /// Reference point for the stored offset.
    epoch: Instant,
    /// Milliseconds since `epoch` of the last observed request.
    last_request: AtomicU64,
}

impl InactivityTracker {
    /// Creates a tracker with the clock started now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_request: AtomicU64::new(0),
        }
    }

    /// Marks the current instant as the last request time.
    pub fn touch(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_request.store(now, Ordering::Relaxed);
    }

    /// Time elapsed since the last observed request.
    pub fn idle_for(&self) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_request.load(Ordering::Relaxed);
        Duration::from_millis(now.saturating_sub(last))
    }

    /// Resolves once the server has been idle for `timeout`.
    pub async fn monitor(&self, timeout: Duration) {
        loop {
            sleep(CHECK_INTERVAL).await;
            if self.idle_for() >= timeout {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn touch_resets_idle_time() {
        let tracker = InactivityTracker::new();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tracker.idle_for() >= Duration::from_millis(40));

        tracker.touch();
        assert!(tracker.idle_for() < Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_fires_after_timeout() {
        let tracker = InactivityTracker::new();
        tracker.touch();
        // Paused time auto-advances whenever the runtime is otherwise idle.
        tokio::time::timeout(Duration::from_secs(10), tracker.monitor(Duration::from_secs(3)))
            .await
            .expect("monitor should fire once the timeout elapses");
    }
}
