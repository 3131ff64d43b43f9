//! Backend HTTP API used for telemetry logs and heartbeat persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::UploadError;

/// One telemetry log record, as posted to `/rovers/{id}/logs`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryLog {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub temperature: f64,
    pub voltage: f64,
}

#[derive(Debug, Serialize)]
struct HeartbeatBody {
    timestamp: DateTime<Utc>,
}

/// Thin `reqwest` wrapper around the rover endpoints. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RoverApi {
    client: reqwest::Client,
    base_url: String,
}

impl RoverApi {
    pub fn new(base_url: &str) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /rovers/{id}/logs`
    pub async fn post_log(&self, rover_id: &str, log: &TelemetryLog) -> Result<(), UploadError> {
        let url = format!("{}/rovers/{}/logs", self.base_url, rover_id);
        let resp = self.client.post(url).json(log).send().await?;
        check_status(resp).await
    }

    /// `PATCH /rovers/{id}/heartbeat`
    pub async fn patch_heartbeat(
        &self,
        rover_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), UploadError> {
        let url = format!("{}/rovers/{}/heartbeat", self.base_url, rover_id);
        let resp = self
            .client
            .patch(url)
            .json(&HeartbeatBody { timestamp })
            .send()
            .await?;
        check_status(resp).await
    }
}

async fn check_status(resp: reqwest::Response) -> Result<(), UploadError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(UploadError::Status { status, body })
}
