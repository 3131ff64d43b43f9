//! Bridge heartbeat loop.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::SessionError;

/// Consecutive publish failures after which the heartbeat gives up.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Call `beat` immediately and then every `interval`.
///
/// A success resets the failure streak. Returns once
/// [`MAX_CONSECUTIVE_FAILURES`] beats in a row have failed; otherwise runs
/// until its task is aborted.
pub async fn run_heartbeat<F, Fut>(interval: Duration, mut beat: F) -> u32
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), SessionError>>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut failures = 0u32;
    loop {
        ticker.tick().await;
        match beat().await {
            Ok(()) => failures = 0,
            Err(e) => {
                failures += 1;
                warn!(error = %e, failures, "heartbeat publish failed");
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    warn!("heartbeat disabled after repeated failures");
                    return failures;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn first_beat_is_immediate_then_every_interval() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let task = tokio::spawn(run_heartbeat(Duration::from_secs(3), move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_five_consecutive_failures() {
        let start = Instant::now();
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let failures = run_heartbeat(Duration::from_secs(3), move || {
            a.fetch_add(1, Ordering::SeqCst);
            async { Err(SessionError::NotConnected) }
        })
        .await;

        assert_eq!(failures, MAX_CONSECUTIVE_FAILURES);
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        // Beats at 0, 3, 6, 9, 12 s.
        assert_eq!(start.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_streak() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let task = tokio::spawn(run_heartbeat(Duration::from_secs(1), move || {
            let n = a.fetch_add(1, Ordering::SeqCst);
            // Four failures, one success, repeating.
            let result = if n % 5 == 4 {
                Ok(())
            } else {
                Err(SessionError::SendFailed("broken pipe".to_owned()))
            };
            async move { result }
        }));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!task.is_finished());
        assert!(attempts.load(Ordering::SeqCst) > 20);
        task.abort();
    }
}
