//! Bounded exponential backoff for automatic bridge reconnects.
//!
//! Only a peer close or a failed connect schedules retries. A local
//! `disconnect()` (user or health monitor) cancels them.

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Zero disables automatic reconnects.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Wait before retry number `attempt` (0-based): `base * 2^attempt`,
    /// capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Sleep, then call `attempt`, until it succeeds or the budget runs out.
///
/// Returns whether a retry succeeded.
pub async fn run_reconnect<F, Fut>(policy: ReconnectPolicy, mut attempt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for n in 0..policy.max_attempts {
        let delay = policy.delay(n);
        info!(attempt = n + 1, delay_ms = delay.as_millis(), "reconnecting to bridge");
        tokio::time::sleep(delay).await;
        if attempt().await {
            return true;
        }
    }
    if policy.max_attempts > 0 {
        warn!(attempts = policy.max_attempts, "giving up on bridge reconnect");
    }
    false
}
