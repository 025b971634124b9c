/// Process-wide liveness timestamp
///
/// Created once at daemon startup and shared by the HTTP handlers (writers) and the
/// idle monitor (reader). Stored as milliseconds since creation on a monotonic clock,
/// so wall-clock adjustments never shorten or extend the idle window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct Heartbeat {
    origin: Instant,
    last_beat_ms: AtomicU64,
}

impl Heartbeat {
    /// Start the clock; creation counts as the first heartbeat
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_beat_ms: AtomicU64::new(0),
        }
    }

    /// Record a liveness signal
    pub fn beat(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_beat_ms.fetch_max(now, Ordering::Relaxed);
    }

    /// Time elapsed since the most recent heartbeat
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_beat_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn beat_resets_idle_time() {
        let heartbeat = Heartbeat::new();
        tokio::time::advance(Duration::from_secs(42)).await;
        assert_eq!(heartbeat.idle_for(), Duration::from_secs(42));

        heartbeat.beat();
        assert_eq!(heartbeat.idle_for(), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(heartbeat.idle_for(), Duration::from_secs(5));
    }
}
