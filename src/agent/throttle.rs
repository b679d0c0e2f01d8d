//! Fixed pause between successive model calls
//!
//! The research and reasoning agents issue several calls back to back. A
//! short sleep before every call but the first keeps them under upstream rate
//! limits.

use tokio::time::{sleep, Duration};

pub const DEFAULT_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct Throttle {
    pause: Duration,
    calls: usize,
}

impl Throttle {
    pub fn new(pause: Duration) -> Self {
        Self { pause, calls: 0 }
    }

    /// Wait, if needed, before issuing the next call.
    pub async fn ready(&mut self) {
        if self.calls > 0 && !self.pause.is_zero() {
            sleep(self.pause).await;
        }
        self.calls += 1;
    }

    /// Calls let through so far
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(DEFAULT_PAUSE)
    }
}
