//! Periodic telemetry log upload.
//!
//! Pushes one record immediately on start and then every interval, but only
//! while both GPS and orientation are cached. Failures are logged and never
//! retried; the next tick tries again with fresh data.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::RoverApi;
use crate::cache::SensorCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// GPS or orientation not cached yet.
    Skipped,
    Failed,
}

/// Push the current telemetry record once.
pub async fn upload_once(api: &RoverApi, rover_id: &str, cache: &SensorCache) -> UploadOutcome {
    let Some(log) = cache.telemetry() else {
        return UploadOutcome::Skipped;
    };
    match api.post_log(rover_id, &log).await {
        Ok(()) => {
            debug!(rover_id = %rover_id, "telemetry log uploaded");
            UploadOutcome::Uploaded
        }
        Err(e) => {
            warn!(rover_id = %rover_id, error = %e, "telemetry log upload failed");
            UploadOutcome::Failed
        }
    }
}

/// Handle to a running upload loop. Stopping is idempotent; dropping the
/// handle stops the loop too.
#[derive(Debug)]
pub struct LogUploader {
    task: Option<JoinHandle<()>>,
}

impl LogUploader {
    pub fn start(api: RoverApi, rover_id: String, cache: SensorCache, interval: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                upload_once(&api, &rover_id, &cache).await;
            }
        });
        Self { task: Some(task) }
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for LogUploader {
    fn drop(&mut self) {
        self.stop();
    }
}
