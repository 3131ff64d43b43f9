//! Bridge session: owns the single bridge socket for one rover.
//!
//! State machine:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Idle       (close / disconnect)
//!             |
//!             +-------> Faulted -> Idle         (connect error)
//! ```
//!
//! A peer close or a failed connect schedules bounded reconnects (see
//! [`crate::reconnect`]); a local disconnect cancels them.
//!
//! One reader task dispatches inbound frames in socket order; one writer task
//! drains the outbound queue and reports per-frame write failures back to the
//! sender without giving up on the socket. Only the reader decides the socket
//! is gone. Dropping the outbound queue makes the writer send a close frame.
//! A generation counter is bumped on every connect and teardown so late
//! events from a superseded socket are ignored.
//!
//! Shared state sits behind a `std::sync::Mutex` that is never held across an
//! await point.

use chrono::{DateTime, Utc};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use rover_protocol::{
    BridgeFrame, DriveCommand, HeartbeatPayload, NodeStatusSnapshot, RoverCommand, SoftwareData,
    Stamped, Topic, Waypoint, WaypointEntry,
};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::api::RoverApi;
use crate::cache::SensorCache;
use crate::camera::{BindRetry, CameraId, CameraManager, CameraSettings, CameraStatus};
use crate::config::RoverLinkConfig;
use crate::error::SessionError;
use crate::health::{self, HealthTarget};
use crate::heartbeat::run_heartbeat;
use crate::media::{MediaEngine, VideoSink};
use crate::readiness::{self, GateOutcome};
use crate::reconnect::{ReconnectPolicy, run_reconnect};
use crate::uploader::LogUploader;

const EVENT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    /// Last connect attempt failed.
    Faulted,
}

/// Every interval the session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    pub heartbeat_interval: Duration,
    pub readiness_poll: Duration,
    pub health_initial_delay: Duration,
    pub health_interval: Duration,
    pub log_upload_interval: Duration,
    /// Minimum gap between heartbeat-persistence requests.
    pub heartbeat_persist_interval: Duration,
    pub bind_retry: BindRetry,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(3),
            readiness_poll: readiness::DEFAULT_POLL_INTERVAL,
            health_initial_delay: health::DEFAULT_INITIAL_DELAY,
            health_interval: health::DEFAULT_CHECK_INTERVAL,
            log_upload_interval: Duration::from_secs(15),
            heartbeat_persist_interval: Duration::from_secs(15),
            bind_retry: BindRetry::default(),
        }
    }
}

/// Everything a session needs at construction. Never changes afterwards.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub rover_id: String,
    pub bridge_url: String,
    pub connect_timeout: Duration,
    /// Indexed by [`CameraId::index`].
    pub cameras: [CameraSettings; 3],
    pub autonomous_nodes: Vec<String>,
    pub manual_nodes: Vec<String>,
    pub readiness_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub timings: SessionTimings,
}

impl SessionSettings {
    pub fn from_config(cfg: &RoverLinkConfig) -> Self {
        Self {
            rover_id: cfg.rover_id.clone(),
            bridge_url: cfg.rover.bridge_url(),
            connect_timeout: cfg.rover.connect_timeout,
            cameras: CameraId::ALL.map(|id| {
                let cam = cfg.cameras[id.index()];
                CameraSettings {
                    url: cfg.rover.signaling_url(cam.port),
                    enabled: cam.enabled,
                }
            }),
            autonomous_nodes: cfg.mission.autonomous_nodes.clone(),
            manual_nodes: cfg.mission.manual_nodes.clone(),
            readiness_timeout: cfg.mission.readiness_timeout,
            reconnect: cfg.rover.reconnect,
            timings: SessionTimings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MissionState {
    pub is_navigating: bool,
    pub current_waypoint: usize,
    pub total_waypoints: usize,
}

/// Point-in-time view of a session, sent with every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub rover_id: String,
    pub state: ConnectionState,
    pub is_connected: bool,
    #[serde(flatten)]
    pub mission: MissionState,
    pub connection_errors: u32,
    pub heartbeat_errors: u32,
    pub heartbeat_active: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub rover_state: Option<String>,
    pub required_nodes: Vec<String>,
    pub cameras: [CameraStatus; 3],
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionStatus),
    /// A cache slot was updated from an inbound frame.
    SensorUpdated(Topic),
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Result of writing one frame to the socket.
type Delivery = Result<(), String>;

struct Outbound {
    message: Message,
    delivered: Option<oneshot::Sender<Delivery>>,
}

#[derive(Default)]
struct SessionState {
    connection: ConnectionState,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    heartbeat_active: bool,
    reconnect: Option<JoinHandle<()>>,
    uploader: Option<LogUploader>,
    health: Option<JoinHandle<()>>,
    connection_errors: u32,
    heartbeat_errors: u32,
    last_heartbeat: Option<DateTime<Utc>>,
    last_heartbeat_persist: Option<Instant>,
    mission: MissionState,
    required_nodes: Vec<String>,
}

impl SessionState {
    /// Connected until the reader sees the socket close, even while writes
    /// are failing.
    fn is_live(&self) -> bool {
        self.connection == ConnectionState::Connected && self.outbound.is_some()
    }

    fn enqueue(
        &self,
        frame: &BridgeFrame,
        delivered: Option<oneshot::Sender<Delivery>>,
    ) -> Result<(), SessionError> {
        let tx = match &self.outbound {
            Some(tx) if self.connection == ConnectionState::Connected => tx,
            _ => return Err(SessionError::NotConnected),
        };
        let text = frame.to_text()?;
        tx.send(Outbound {
            message: Message::Text(text.into()),
            delivered,
        })
        .map_err(|_| SessionError::NotConnected)
    }

    fn send_frame(&self, frame: &BridgeFrame) -> Result<(), SessionError> {
        self.enqueue(frame, None)
    }

    /// Queue `frame` and hand back a receiver that resolves once the writer
    /// has tried to put it on the socket.
    fn send_frame_tracked(
        &self,
        frame: &BridgeFrame,
    ) -> Result<oneshot::Receiver<Delivery>, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(frame, Some(tx))?;
        Ok(rx)
    }

    fn cancel_reconnect(&mut self) {
        if let Some(reconnect) = self.reconnect.take() {
            reconnect.abort();
        }
    }

    /// Drop the socket and stop every task tied to it.
    fn release_link(&mut self) {
        self.outbound = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        self.heartbeat_active = false;
        if let Some(mut uploader) = self.uploader.take() {
            uploader.stop();
        }
    }

    fn end_mission(&mut self) {
        if let Some(health) = self.health.take() {
            health.abort();
        }
        self.mission = MissionState::default();
        self.required_nodes.clear();
    }
}

struct Inner {
    settings: SessionSettings,
    cache: SensorCache,
    cameras: CameraManager,
    api: Option<RoverApi>,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<SessionState>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Handle to one rover's bridge session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct BridgeSession {
    inner: Arc<Inner>,
}

impl BridgeSession {
    /// `engine` drives the camera channels; without one they are never
    /// started. `api` enables log upload and heartbeat persistence.
    pub fn new(
        settings: SessionSettings,
        engine: Option<Arc<dyn MediaEngine>>,
        api: Option<RoverApi>,
    ) -> Self {
        let cameras = CameraManager::new(
            settings.cameras.clone(),
            engine,
            settings.timings.bind_retry,
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                settings,
                cache: SensorCache::new(),
                cameras,
                api,
                events,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn rover_id(&self) -> &str {
        &self.inner.settings.rover_id
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn cache(&self) -> &SensorCache {
        &self.inner.cache
    }

    pub fn cameras(&self) -> &CameraManager {
        &self.inner.cameras
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock().connection
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_live()
    }

    pub fn mission(&self) -> MissionState {
        self.lock().mission
    }

    pub fn required_nodes(&self) -> Vec<String> {
        self.lock().required_nodes.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let st = self.lock();
        SessionStatus {
            rover_id: self.inner.settings.rover_id.clone(),
            state: st.connection,
            is_connected: st.is_live(),
            mission: st.mission,
            connection_errors: st.connection_errors,
            heartbeat_errors: st.heartbeat_errors,
            heartbeat_active: st.heartbeat_active,
            last_heartbeat: st.last_heartbeat,
            rover_state: self.inner.cache.rover_state(),
            required_nodes: st.required_nodes.clone(),
            cameras: self.inner.cameras.statuses(),
        }
    }

    fn notify(&self) {
        // No receivers is fine.
        let _ = self
            .inner
            .events
            .send(SessionEvent::StateChanged(self.status()));
    }

    // -----------------------------------------------------------------------
    // Connect / disconnect
    // -----------------------------------------------------------------------

    /// Open the bridge socket, subscribe, and start heartbeat, log upload
    /// and enabled cameras.
    ///
    /// Already connected: only reconciles camera channels. Cancels pending
    /// automatic reconnects; on failure a fresh retry schedule starts.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.lock().cancel_reconnect();
        self.open_link(true).await
    }

    /// `retry` schedules automatic reconnects if this attempt fails. The
    /// reconnect loop itself passes `false`.
    async fn open_link(&self, retry: bool) -> Result<(), SessionError> {
        let generation = {
            let mut st = self.lock();
            if st.is_live() {
                drop(st);
                self.inner.cameras.reconcile();
                return Ok(());
            }
            st.generation += 1;
            st.release_link();
            st.connection = ConnectionState::Connecting;
            st.generation
        };

        let url = self.inner.settings.bridge_url.as_str();
        let timeout = self.inner.settings.connect_timeout;
        info!(rover_id = %self.rover_id(), url = %url, "connecting to bridge");

        match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
            Ok(Ok((ws, _response))) => {
                let (sink, stream) = ws.split();
                self.on_open(generation, sink, stream)
            }
            Ok(Err(e)) => Err(self.on_connect_error(generation, e.to_string(), retry)),
            Err(_) => Err(self.on_connect_error(
                generation,
                format!("timed out after {}ms", timeout.as_millis()),
                retry,
            )),
        }
    }

    fn on_open<W, R>(&self, generation: u64, sink: W, stream: R) -> Result<(), SessionError>
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: fmt::Display + Send,
        R: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin
            + Send
            + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(sink, rx));

        {
            let mut st = self.lock();
            if st.generation != generation {
                // Superseded while connecting; dropping `tx` closes the socket.
                return Err(SessionError::ConnectionFailed(
                    "superseded by a newer connect or disconnect".to_owned(),
                ));
            }
            st.connection = ConnectionState::Connected;
            st.connection_errors = 0;
            st.heartbeat_errors = 0;
            st.last_heartbeat_persist = None;
            st.outbound = Some(tx);
            for topic in Topic::SUBSCRIBED {
                st.send_frame(&BridgeFrame::subscribe(topic))?;
            }

            let reader = self.clone();
            st.reader = Some(tokio::spawn(async move {
                reader.read_loop(stream, generation).await;
            }));
            st.heartbeat = Some(self.spawn_heartbeat(generation));
            st.heartbeat_active = true;
            st.uploader = self.inner.api.clone().map(|api| {
                LogUploader::start(
                    api,
                    self.inner.settings.rover_id.clone(),
                    self.inner.cache.clone(),
                    self.inner.settings.timings.log_upload_interval,
                )
            });
        }

        self.inner.cameras.reconcile();
        info!(rover_id = %self.rover_id(), "bridge connected");
        self.notify();
        Ok(())
    }

    /// Reports the failure as `Faulted`, then settles in `Idle`.
    fn on_connect_error(&self, generation: u64, reason: String, retry: bool) -> SessionError {
        {
            let mut st = self.lock();
            if st.generation != generation {
                return SessionError::ConnectionFailed(reason);
            }
            st.connection_errors += 1;
            st.connection = ConnectionState::Faulted;
            st.release_link();
            if let Some(health) = st.health.take() {
                health.abort();
            }
            self.inner.cache.clear();
        }
        self.inner.cameras.teardown_all();
        warn!(rover_id = %self.rover_id(), error = %reason, "bridge connection failed");
        self.notify();

        let settled = {
            let mut st = self.lock();
            let settled = st.generation == generation;
            if settled {
                st.connection = ConnectionState::Idle;
                if retry {
                    self.schedule_reconnect(&mut st);
                }
            }
            settled
        };
        if settled {
            self.notify();
        }
        SessionError::ConnectionFailed(reason)
    }

    fn on_socket_closed(&self, generation: u64) {
        {
            let mut st = self.lock();
            if st.generation != generation || st.connection != ConnectionState::Connected {
                return;
            }
            st.generation += 1;
            st.connection = ConnectionState::Idle;
            st.release_link();
            st.end_mission();
            self.inner.cache.clear();
            self.schedule_reconnect(&mut st);
        }
        self.inner.cameras.teardown_all();
        info!(rover_id = %self.rover_id(), "bridge socket closed");
        self.notify();
    }

    /// Replace any pending retry schedule with a fresh one.
    fn schedule_reconnect(&self, st: &mut SessionState) {
        st.cancel_reconnect();
        let policy = self.inner.settings.reconnect;
        if policy.max_attempts == 0 {
            return;
        }
        let session = self.clone();
        st.reconnect = Some(tokio::spawn(async move {
            let recovered = run_reconnect(policy, || {
                let session = session.clone();
                async move { session.open_link(false).await.is_ok() }
            })
            .await;
            if recovered {
                info!(rover_id = %session.rover_id(), "bridge reconnected");
            }
        }));
    }

    /// Unsubscribe, close the socket, and stop every timer and camera.
    /// Pending automatic reconnects are cancelled.
    ///
    /// Idempotent. Notifies only when the session was connected.
    pub fn disconnect(&self) {
        let was_connected = {
            let mut st = self.lock();
            let was_connected = st.connection == ConnectionState::Connected;
            st.generation += 1;
            st.cancel_reconnect();
            if was_connected {
                for topic in Topic::SUBSCRIBED {
                    if let Err(e) = st.send_frame(&BridgeFrame::unsubscribe(topic)) {
                        debug!(topic = topic.name(), error = %e, "unsubscribe not sent");
                    }
                }
            }
            st.release_link();
            st.end_mission();
            st.connection = ConnectionState::Idle;
            self.inner.cache.clear();
            was_connected
        };
        self.inner.cameras.teardown_all();
        if was_connected {
            info!(rover_id = %self.rover_id(), "bridge disconnected");
            self.notify();
        }
    }

    // -----------------------------------------------------------------------
    // Socket tasks
    // -----------------------------------------------------------------------

    async fn read_loop<R>(self, mut stream: R, generation: u64)
    where
        R: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => self.handle_text(generation, &text),
                Ok(Message::Close(frame)) => {
                    debug!(rover_id = %self.rover_id(), ?frame, "bridge closed by peer");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(rover_id = %self.rover_id(), error = %e, "bridge socket error");
                    break;
                }
            }
        }
        self.on_socket_closed(generation);
    }

    fn handle_text(&self, generation: u64, text: &str) {
        let frame = match BridgeFrame::from_text(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "dropping non-JSON bridge frame");
                return;
            }
        };
        let BridgeFrame::Publish { topic, msg } = frame else {
            return;
        };
        let Some(known) = Topic::from_name(&topic) else {
            debug!(topic = %topic, "dropping frame for unknown topic");
            return;
        };

        let (persist, updated) = {
            let mut st = self.lock();
            if st.generation != generation || st.connection != ConnectionState::Connected {
                return;
            }
            let persist = self.heartbeat_persist_due(&mut st);
            let updated = match &msg {
                Some(msg) => match self.inner.cache.apply(known, msg) {
                    Ok(updated) => updated,
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "dropping undecodable payload");
                        false
                    }
                },
                None => {
                    debug!(topic = %topic, "publish without msg");
                    false
                }
            };
            (persist, updated)
        };

        if updated {
            let _ = self.inner.events.send(SessionEvent::SensorUpdated(known));
        }
        if persist {
            self.persist_heartbeat();
        }
    }

    fn heartbeat_persist_due(&self, st: &mut SessionState) -> bool {
        if self.inner.api.is_none() {
            return false;
        }
        let now = Instant::now();
        let due = st.last_heartbeat_persist.is_none_or(|last| {
            now.duration_since(last) >= self.inner.settings.timings.heartbeat_persist_interval
        });
        if due {
            st.last_heartbeat_persist = Some(now);
        }
        due
    }

    fn persist_heartbeat(&self) {
        let Some(api) = self.inner.api.clone() else {
            return;
        };
        let rover_id = self.inner.settings.rover_id.clone();
        tokio::spawn(async move {
            if let Err(e) = api.patch_heartbeat(&rover_id, Utc::now()).await {
                warn!(rover_id = %rover_id, error = %e, "heartbeat persistence failed");
            }
        });
    }

    fn spawn_heartbeat(&self, generation: u64) -> JoinHandle<()> {
        let session = self.clone();
        let interval = self.inner.settings.timings.heartbeat_interval;
        tokio::spawn(async move {
            run_heartbeat(interval, || {
                let beat = session.clone();
                async move { beat.publish_heartbeat(generation).await }
            })
            .await;
            session.on_heartbeat_stopped(generation);
        })
    }

    /// Publish one heartbeat and wait for the writer's verdict.
    async fn publish_heartbeat(&self, generation: u64) -> Result<(), SessionError> {
        let queued = {
            let st = self.lock();
            let payload = HeartbeatPayload {
                rover_id: self.inner.settings.rover_id.clone(),
                timestamp: Utc::now().timestamp_millis(),
                status: "alive".to_owned(),
                is_navigating: st.mission.is_navigating,
            };
            BridgeFrame::publish_json(Topic::Heartbeat, &payload)
                .map_err(SessionError::from)
                .and_then(|frame| st.send_frame_tracked(&frame))
        };
        let result = match queued {
            Ok(delivered) => match delivered.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => Err(SessionError::SendFailed(reason)),
                Err(_) => Err(SessionError::NotConnected),
            },
            Err(e) => Err(e),
        };

        let mut st = self.lock();
        if st.generation == generation {
            match &result {
                Ok(()) => {
                    st.last_heartbeat = Some(Utc::now());
                    st.heartbeat_errors = 0;
                }
                Err(_) => st.heartbeat_errors += 1,
            }
        }
        result
    }

    /// The heartbeat gave up; the socket stays open.
    fn on_heartbeat_stopped(&self, generation: u64) {
        {
            let mut st = self.lock();
            if st.generation != generation {
                return;
            }
            st.heartbeat_active = false;
        }
        warn!(rover_id = %self.rover_id(), "heartbeat stopped, session stays connected");
        self.notify();
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    fn publish_stamped<T: Serialize>(&self, topic: Topic, payload: T) -> Result<(), SessionError> {
        let stamped = Stamped {
            payload,
            timestamp: Utc::now().timestamp_millis(),
            rover_id: self.inner.settings.rover_id.clone(),
        };
        let frame = BridgeFrame::publish_json(topic, &stamped)?;
        self.lock().send_frame(&frame)
    }

    /// Publish a control command on `/command`.
    pub fn send_command(&self, command: RoverCommand) -> Result<(), SessionError> {
        let kind = command.kind();
        self.publish_stamped(Topic::Command, command)?;
        info!(rover_id = %self.rover_id(), command = kind, "command sent");
        Ok(())
    }

    /// Publish software data on `/gps_waypoints`.
    pub fn send_software_data(&self, data: SoftwareData) -> Result<(), SessionError> {
        let kind = data.kind();
        self.publish_stamped(Topic::SoftwareData, data)?;
        debug!(rover_id = %self.rover_id(), kind, "software data sent");
        Ok(())
    }

    /// Send one wheel command while in manual control.
    pub fn send_drive(&self, drive: DriveCommand) -> Result<(), SessionError> {
        self.send_software_data(SoftwareData::ManualCommand(drive))
    }

    // -----------------------------------------------------------------------
    // Command flows
    // -----------------------------------------------------------------------

    /// Wait for `required` to all report `running`, polling the cache.
    pub async fn wait_for_nodes_running(&self, required: &[String], timeout: Duration) -> bool {
        readiness::wait_for_nodes_running(
            &self.inner.cache,
            required,
            timeout,
            self.inner.settings.timings.readiness_poll,
        )
        .await
    }

    async fn gate(&self, required: &[String]) -> GateOutcome {
        readiness::poll_until_ready(
            &self.inner.cache,
            required,
            self.inner.settings.readiness_timeout,
            self.inner.settings.timings.readiness_poll,
        )
        .await
    }

    fn rollback_mission(&self) {
        self.lock().mission = MissionState::default();
    }

    /// Start an autonomous mission over `waypoints`.
    ///
    /// Mission flags are set before the readiness gate and rolled back if it
    /// fails. On success the route is published and the health monitor armed.
    pub async fn launch_rover(&self, waypoints: &[Waypoint]) -> Result<(), SessionError> {
        if waypoints.is_empty() {
            return Err(SessionError::EmptyRoute);
        }
        {
            let mut st = self.lock();
            if !st.is_live() {
                return Err(SessionError::NotConnected);
            }
            st.mission = MissionState {
                is_navigating: true,
                current_waypoint: 0,
                total_waypoints: waypoints.len(),
            };
        }

        let launch = RoverCommand::LaunchRover {
            waypoint_count: waypoints.len(),
            launch_mode: "autonomous".to_owned(),
        };
        if let Err(e) = self.send_command(launch) {
            self.rollback_mission();
            return Err(e);
        }

        let required = self.inner.settings.autonomous_nodes.clone();
        let outcome = self.gate(&required).await;
        if !outcome.is_ready() {
            self.rollback_mission();
            warn!(rover_id = %self.rover_id(), outcome = %outcome, "launch aborted");
            return Err(SessionError::NodesNotReady(outcome));
        }
        if !self.is_connected() {
            self.rollback_mission();
            return Err(SessionError::NotConnected);
        }

        let route = SoftwareData::Waypoints {
            waypoints: WaypointEntry::from_route(waypoints),
        };
        if let Err(e) = self.send_software_data(route) {
            self.rollback_mission();
            return Err(e);
        }

        self.arm_health(required);
        info!(
            rover_id = %self.rover_id(),
            waypoints = waypoints.len(),
            "autonomous mission launched"
        );
        self.notify();
        Ok(())
    }

    /// Hand the rover over to manual control once its manual-mode nodes run.
    pub async fn enable_manual_control(&self) -> Result<(), SessionError> {
        self.send_command(RoverCommand::ManualControl {
            control_mode: "manual".to_owned(),
        })?;

        let required = self.inner.settings.manual_nodes.clone();
        let outcome = self.gate(&required).await;
        if !outcome.is_ready() {
            warn!(rover_id = %self.rover_id(), outcome = %outcome, "manual control refused");
            return Err(SessionError::NodesNotReady(outcome));
        }
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        self.arm_health(required);
        info!(rover_id = %self.rover_id(), "manual control enabled");
        self.notify();
        Ok(())
    }

    /// Stop the rover. Always succeeds locally: the stop command is sent
    /// when connected, and the mission is cleared either way.
    pub fn stop_rover(&self) {
        if self.is_connected() {
            if let Err(e) = self.send_command(RoverCommand::Stop { emergency: false }) {
                warn!(rover_id = %self.rover_id(), error = %e, "stop command not sent");
            }
        }
        self.lock().end_mission();
        info!(rover_id = %self.rover_id(), "mission stopped");
        self.notify();
    }

    fn arm_health(&self, required: Vec<String>) {
        let timings = self.inner.settings.timings;
        let mut st = self.lock();
        if let Some(previous) = st.health.take() {
            previous.abort();
        }
        st.required_nodes = required.clone();
        st.health = Some(tokio::spawn(health::run_monitor(
            self.clone(),
            required,
            timings.health_initial_delay,
            timings.health_interval,
        )));
    }

    // -----------------------------------------------------------------------
    // Cameras
    // -----------------------------------------------------------------------

    pub fn set_video_sink(&self, id: CameraId, sink: Arc<dyn VideoSink>) {
        self.inner.cameras.set_video_sink(id, sink);
    }

    /// Change a channel's enable flag. Applied right away while connected,
    /// otherwise on the next connect.
    pub fn set_camera_enabled(&self, id: CameraId, enabled: bool) {
        self.inner.cameras.set_enabled(id, enabled);
        if self.is_connected() {
            self.inner.cameras.reconcile();
        } else if !enabled {
            self.inner.cameras.teardown(id);
        }
    }
}

impl HealthTarget for BridgeSession {
    fn mission_active(&self) -> bool {
        let st = self.lock();
        st.is_live() && !st.required_nodes.is_empty()
    }

    fn node_status(&self) -> Option<NodeStatusSnapshot> {
        self.inner.cache.node_status()
    }

    fn force_disconnect(&self) {
        self.disconnect();
    }
}

/// Drain the outbound queue. A failed write is reported to its sender and
/// the loop keeps going; the reader owns close detection.
async fn write_loop<W>(mut sink: W, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    W: Sink<Message> + Unpin,
    W::Error: fmt::Display,
{
    while let Some(out) = rx.recv().await {
        let delivery = sink.send(out.message).await.map_err(|e| e.to_string());
        if let Err(e) = &delivery {
            debug!(error = %e, "bridge frame not written");
        }
        if let Some(delivered) = out.delivered {
            // The sender may have given up waiting.
            let _ = delivered.send(delivery);
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}
