//! Shared fixtures for rover-link integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use rover_link::camera::{BindRetry, CameraId, CameraSettings};
use rover_link::error::MediaError;
use rover_link::media::{MediaEngine, MediaEvent, MediaSession, MediaStream, VideoSink};
use rover_link::reconnect::ReconnectPolicy;
use rover_link::{SessionSettings, SessionTimings};
use rover_protocol::IceCandidate;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const ROVER_ID: &str = "7";

/// Timings short enough for real-time socket tests.
pub fn fast_timings() -> SessionTimings {
    SessionTimings {
        heartbeat_interval: Duration::from_millis(100),
        readiness_poll: Duration::from_millis(20),
        health_initial_delay: Duration::from_millis(100),
        health_interval: Duration::from_millis(100),
        log_upload_interval: Duration::from_millis(100),
        heartbeat_persist_interval: Duration::from_secs(60),
        bind_retry: BindRetry {
            interval: Duration::from_millis(20),
            max_attempts: 100,
        },
    }
}

pub fn settings(bridge_url: &str) -> SessionSettings {
    SessionSettings {
        rover_id: ROVER_ID.to_owned(),
        bridge_url: bridge_url.to_owned(),
        connect_timeout: Duration::from_secs(2),
        cameras: CameraId::ALL.map(|_| CameraSettings {
            url: "ws://127.0.0.1:1".to_owned(),
            enabled: false,
        }),
        autonomous_nodes: vec!["gps_node".to_owned(), "navigation_node".to_owned()],
        manual_nodes: vec!["motor_controller".to_owned()],
        readiness_timeout: Duration::from_millis(500),
        // Reconnect tests opt in explicitly.
        reconnect: ReconnectPolicy {
            max_attempts: 0,
            ..ReconnectPolicy::default()
        },
        timings: fast_timings(),
    }
}

/// A `/node_status` frame body with every node in `nodes` set to `state`.
pub fn node_status(nodes: &[(&str, &str)]) -> Value {
    let nodes: serde_json::Map<String, Value> = nodes
        .iter()
        .map(|(name, state)| ((*name).to_owned(), json!(state)))
        .collect();
    json!({ "data": json!({ "timestamp": 1.0, "nodes": nodes }).to_string() })
}

// ---------------------------------------------------------------------------
// Media fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SessionLog {
    pub local_descriptions: Vec<String>,
    pub remote_descriptions: Vec<String>,
    pub candidates: Vec<IceCandidate>,
    pub closed: bool,
}

pub struct FakeSession {
    channel: CameraId,
    pub events: mpsc::UnboundedSender<MediaEvent>,
    pub log: Mutex<SessionLog>,
}

impl FakeSession {
    pub fn emit_stream(&self, id: &str) {
        let _ = self.events.send(MediaEvent::Stream(MediaStream { id: id.to_owned() }));
    }

    pub fn emit_candidate(&self, candidate: &str) {
        let _ = self.events.send(MediaEvent::LocalCandidate(IceCandidate {
            candidate: candidate.to_owned(),
            sdp_mid: Some("0".to_owned()),
            sdp_mline_index: Some(0),
        }));
    }

    pub fn remote_descriptions(&self) -> Vec<String> {
        self.log.lock().unwrap().remote_descriptions.clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.log.lock().unwrap().candidates.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.log.lock().unwrap().closed
    }
}

#[async_trait]
impl MediaSession for FakeSession {
    async fn create_offer(&self) -> Result<String, MediaError> {
        Ok(format!("v=0 offer-{}", self.channel))
    }

    async fn set_local_description(&self, sdp: &str) -> Result<(), MediaError> {
        self.log.lock().unwrap().local_descriptions.push(sdp.to_owned());
        Ok(())
    }

    async fn set_remote_description(&self, sdp: &str) -> Result<(), MediaError> {
        self.log.lock().unwrap().remote_descriptions.push(sdp.to_owned());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), MediaError> {
        self.log.lock().unwrap().candidates.push(candidate.clone());
        Ok(())
    }

    fn close(&self) {
        self.log.lock().unwrap().closed = true;
    }
}

/// Records every session it creates so tests can drive media events.
#[derive(Default)]
pub struct FakeEngine {
    sessions: Mutex<Vec<(CameraId, Arc<FakeSession>)>>,
}

impl FakeEngine {
    pub fn sessions_for(&self, channel: CameraId) -> Vec<Arc<FakeSession>> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == channel)
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn latest(&self, channel: CameraId) -> Option<Arc<FakeSession>> {
        self.sessions_for(channel).pop()
    }

    /// Poll until a session exists for `channel`.
    pub async fn wait_for_session(&self, channel: CameraId) -> Arc<FakeSession> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(s) = self.latest(channel) {
                    return s;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("media session never created")
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn create_session(
        &self,
        channel: CameraId,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<Arc<dyn MediaSession>, MediaError> {
        let session = Arc::new(FakeSession {
            channel,
            events,
            log: Mutex::default(),
        });
        self.sessions.lock().unwrap().push((channel, session.clone()));
        Ok(session)
    }
}

/// Video sink that records attach/detach/play calls.
#[derive(Default)]
pub struct RecordingSink {
    pub current: Mutex<Option<String>>,
    pub attached: Mutex<Vec<String>>,
    pub plays: Mutex<u32>,
    pub detaches: Mutex<u32>,
}

impl RecordingSink {
    pub fn attached(&self) -> Vec<String> {
        self.attached.lock().unwrap().clone()
    }

    pub fn detaches(&self) -> u32 {
        *self.detaches.lock().unwrap()
    }

    pub fn current(&self) -> Option<String> {
        self.current.lock().unwrap().clone()
    }
}

impl VideoSink for RecordingSink {
    fn current_stream(&self) -> Option<String> {
        self.current.lock().unwrap().clone()
    }

    fn attach(&self, stream: &MediaStream) {
        *self.current.lock().unwrap() = Some(stream.id.clone());
        self.attached.lock().unwrap().push(stream.id.clone());
    }

    fn detach(&self) {
        *self.current.lock().unwrap() = None;
        *self.detaches.lock().unwrap() += 1;
    }

    fn play(&self) -> Result<(), MediaError> {
        *self.plays.lock().unwrap() += 1;
        Ok(())
    }
}

/// Poll `cond` until it holds or `within` elapses.
pub async fn eventually<F: FnMut() -> bool>(within: Duration, mut cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
