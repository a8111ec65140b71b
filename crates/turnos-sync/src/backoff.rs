use std::time::Duration;

/// Linear reconnect backoff: `min(attempt * step, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub step: Duration,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(1000),
            cap: Duration::from_millis(5000),
        }
    }
}

impl Backoff {
    /// Delay before reconnect attempt number `attempt` (1-based; 0 yields no
    /// delay).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt).min(self.cap)
    }
}
