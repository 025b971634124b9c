/// Idle-timeout monitor
///
/// Background loop, independent of request handling, that wakes on a fixed interval
/// and resolves once no heartbeat has been seen for longer than the idle timeout.
/// The server uses it as one of its graceful-shutdown triggers.

use crate::runtime::heartbeat::Heartbeat;
use std::{sync::Arc, time::Duration};

/// Default time without heartbeats before the daemon exits
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default wake-up interval of the monitor loop
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct IdleMonitor {
    heartbeat: Arc<Heartbeat>,
    timeout: Duration,
    interval: Duration,
}

impl IdleMonitor {
    pub fn new(heartbeat: Arc<Heartbeat>, timeout: Duration, interval: Duration) -> Self {
        Self {
            heartbeat,
            timeout,
            // A zero interval would spin
            interval: interval.max(Duration::from_millis(10)),
        }
    }

    /// Resolve once the heartbeat has been silent for longer than the timeout
    ///
    /// A heartbeat arriving before a check pushes the deadline a full timeout window
    /// past that heartbeat.
    pub async fn wait_for_idle(&self) {
        tracing::info!(
            "⏰ Idle monitor started (timeout {}s, check every {}s)",
            self.timeout.as_secs(),
            self.interval.as_secs()
        );
        loop {
            tokio::time::sleep(self.interval).await;
            let idle = self.heartbeat.idle_for();
            if idle > self.timeout {
                tracing::info!("No heartbeat for {}s, shutting down", idle.as_secs());
                return;
            }
            tracing::debug!("Idle for {}s", idle.as_secs());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn monitor(heartbeat: &Arc<Heartbeat>) -> IdleMonitor {
        IdleMonitor::new(Arc::clone(heartbeat), DEFAULT_IDLE_TIMEOUT, DEFAULT_CHECK_INTERVAL)
    }

    #[tokio::test(start_paused = true)]
    async fn shuts_down_after_timeout_without_heartbeats() {
        let heartbeat = Arc::new(Heartbeat::new());
        let started = Instant::now();
        monitor(&heartbeat).wait_for_idle().await;

        let waited = started.elapsed();
        assert!(waited > DEFAULT_IDLE_TIMEOUT, "stopped early after {waited:?}");
        assert!(waited <= DEFAULT_IDLE_TIMEOUT + DEFAULT_CHECK_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn late_heartbeat_defers_shutdown_by_a_full_window() {
        let heartbeat = Arc::new(Heartbeat::new());
        let started = Instant::now();

        let beater = Arc::clone(&heartbeat);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(290)).await;
            beater.beat();
        });

        monitor(&heartbeat).wait_for_idle().await;
        let waited = started.elapsed();
        assert!(
            waited >= Duration::from_secs(290) + DEFAULT_IDLE_TIMEOUT,
            "stopped after {waited:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn steady_heartbeats_keep_it_alive() {
        let heartbeat = Arc::new(Heartbeat::new());
        let idle_monitor = IdleMonitor::new(
            Arc::clone(&heartbeat),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );

        let beater = Arc::clone(&heartbeat);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(20)).await;
                beater.beat();
            }
        });

        let outcome =
            tokio::time::timeout(Duration::from_secs(3_600), idle_monitor.wait_for_idle()).await;
        assert!(outcome.is_err(), "monitor fired despite heartbeats");
    }
}
