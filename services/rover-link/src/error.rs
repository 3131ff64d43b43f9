use rover_protocol::ProtocolError;

use crate::camera::CameraId;
use crate::readiness::GateOutcome;

/// Failures surfaced by bridge-session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("not connected")]
    NotConnected,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("required nodes not ready: {0}")]
    NodesNotReady(GateOutcome),
    #[error("a launch needs at least one waypoint")]
    EmptyRoute,
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Failures inside the peer-media capability.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media engine: {0}")]
    Engine(String),
    #[error("session closed")]
    Closed,
}

/// Per-channel camera failures. Never escalated past the channel.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("signaling failed on {channel}: {reason}")]
    SignalingFailed { channel: CameraId, reason: String },
    #[error("media error on {channel}: {source}")]
    Media {
        channel: CameraId,
        #[source]
        source: MediaError,
    },
}

/// Failures pushing to the backend HTTP API. Logged and dropped; the next
/// interval retries naturally.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}
