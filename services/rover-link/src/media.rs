//! Peer-media capability used by the camera channels.
//!
//! Codec and ICE internals live behind these traits. A channel only drives
//! the offer/answer exchange and forwards candidates; the engine does the
//! rest and reports back through [`MediaEvent`]s.

use async_trait::async_trait;
use rover_protocol::IceCandidate;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::camera::CameraId;
use crate::error::MediaError;

/// Opaque handle to a negotiated remote video stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
}

/// Raised by a media session after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// Remote video became available.
    Stream(MediaStream),
    /// A locally gathered candidate to forward to the rover.
    LocalCandidate(IceCandidate),
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a receive-only video session for `channel`.
    async fn create_session(
        &self,
        channel: CameraId,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<Arc<dyn MediaSession>, MediaError>;
}

#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Returns the offer SDP.
    async fn create_offer(&self) -> Result<String, MediaError>;
    async fn set_local_description(&self, sdp: &str) -> Result<(), MediaError>;
    async fn set_remote_description(&self, sdp: &str) -> Result<(), MediaError>;
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), MediaError>;
    fn close(&self);
}

/// Where a channel's video is displayed.
///
/// Called with the channel's lock held: implementations must not call back
/// into the camera manager.
pub trait VideoSink: Send + Sync {
    /// Id of the stream currently attached, if any.
    fn current_stream(&self) -> Option<String>;
    fn attach(&self, stream: &MediaStream);
    /// Stop playback and release the stream.
    fn detach(&self);
    fn play(&self) -> Result<(), MediaError>;
}
