//! Tokio clock adapter.

use mqtt_endpoint_core::Clock;
use tokio::time::{Duration, Instant};

/// Monotonic clock over `tokio::time`, so tests running under
/// `start_paused` virtual time drive keep-alive exactly like the real
/// thing.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        TokioClock {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        TokioClock::new()
    }
}

impl Clock for TokioClock {
    fn now_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    async fn sleep_millis(&self, millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}
