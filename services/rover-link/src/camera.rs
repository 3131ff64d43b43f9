//! Camera signaling manager.
//!
//! Three independent channels (csi, usb, csi2), each with its own signaling
//! socket and media session:
//!
//! ```text
//! Disconnected -> SignalingOpen -> Offered -> Negotiated
//!       ^                                          |
//!       +------------- socket error / close -------+
//! ```
//!
//! A failure on one channel never touches the others.

use futures_util::{SinkExt, StreamExt};
use rover_protocol::SignalingMessage;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::error::CameraError;
use crate::media::{MediaEngine, MediaEvent, MediaSession, MediaStream, VideoSink};

// ---------------------------------------------------------------------------
// Identity and status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraId {
    Csi,
    Usb,
    Csi2,
}

impl CameraId {
    pub const ALL: [CameraId; 3] = [CameraId::Csi, CameraId::Usb, CameraId::Csi2];

    pub fn index(self) -> usize {
        match self {
            CameraId::Csi => 0,
            CameraId::Usb => 1,
            CameraId::Csi2 => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CameraId::Csi => "csi",
            CameraId::Usb => "usb",
            CameraId::Csi2 => "csi2",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            CameraId::Csi => 8765,
            CameraId::Usb => 8766,
            CameraId::Csi2 => 8767,
        }
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalingPhase {
    Disconnected,
    SignalingOpen,
    Offered,
    Negotiated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraStatus {
    pub id: CameraId,
    pub phase: SignalingPhase,
    pub enabled: bool,
    pub has_stream: bool,
    pub has_sink: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    /// Signaling socket URL, e.g. `ws://100.85.202.20:8765`.
    pub url: String,
    pub enabled: bool,
}

/// Polling used by [`CameraChannel::set_video_sink`] while no media session
/// exists yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindRetry {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for BindRetry {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            max_attempts: 300,
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

struct ChannelState {
    phase: SignalingPhase,
    enabled: bool,
    /// Bumped on every start and teardown so a superseded task cannot touch
    /// the channel.
    generation: u64,
    stream: Option<MediaStream>,
    sink: Option<Arc<dyn VideoSink>>,
    session: Option<Arc<dyn MediaSession>>,
    /// Outbound queue drained by the signaling task. Dropping it closes the
    /// socket.
    signal_tx: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
    bind_task: Option<JoinHandle<()>>,
}

impl ChannelState {
    /// Detach sink, close session, close socket, clear stream, and cancel a
    /// pending bind retry.
    fn teardown(&mut self) {
        if let Some(bind) = self.bind_task.take() {
            bind.abort();
        }
        if let Some(sink) = &self.sink {
            sink.detach();
        }
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.signal_tx = None;
        self.stream = None;
        self.phase = SignalingPhase::Disconnected;
    }
}

/// One camera's signaling state machine. Cheap to clone.
#[derive(Clone)]
pub struct CameraChannel {
    id: CameraId,
    url: Arc<str>,
    bind_retry: BindRetry,
    state: Arc<Mutex<ChannelState>>,
}

impl CameraChannel {
    pub fn new(id: CameraId, settings: CameraSettings, bind_retry: BindRetry) -> Self {
        Self {
            id,
            url: settings.url.into(),
            bind_retry,
            state: Arc::new(Mutex::new(ChannelState {
                phase: SignalingPhase::Disconnected,
                enabled: settings.enabled,
                generation: 0,
                stream: None,
                sink: None,
                session: None,
                signal_tx: None,
                task: None,
                bind_task: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> CameraId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    pub fn phase(&self) -> SignalingPhase {
        self.lock().phase
    }

    pub fn stream(&self) -> Option<MediaStream> {
        self.lock().stream.clone()
    }

    pub fn status(&self) -> CameraStatus {
        let st = self.lock();
        CameraStatus {
            id: self.id,
            phase: st.phase,
            enabled: st.enabled,
            has_stream: st.stream.is_some(),
            has_sink: st.sink.is_some(),
        }
    }

    /// Whether a signaling task is alive for the current generation.
    pub fn is_running(&self) -> bool {
        self.lock().task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Open the signaling socket and negotiate. No-op while already running.
    pub fn start(&self, engine: Arc<dyn MediaEngine>) {
        let mut st = self.lock();
        if st.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        st.generation += 1;
        let generation = st.generation;
        let channel = self.clone();
        st.task = Some(tokio::spawn(async move {
            channel.run_signaling(engine, generation).await;
        }));
    }

    /// Tear the channel down. Idempotent.
    pub fn teardown(&self) {
        let mut st = self.lock();
        st.generation += 1;
        st.teardown();
        // The task exits on its own once its outbound queue is gone; a task
        // still connecting sees the new generation and drops its socket.
        st.task = None;
    }

    /// Register where this channel's video is shown.
    ///
    /// Binds now if a stream exists. If no media session exists yet, polls
    /// until both stream and sink are present or the retry budget runs out.
    pub fn set_video_sink(&self, sink: Arc<dyn VideoSink>) {
        let mut st = self.lock();
        st.sink = Some(sink.clone());
        if let Some(bind) = st.bind_task.take() {
            bind.abort();
        }
        if let Some(stream) = &st.stream {
            bind(self.id, sink.as_ref(), stream);
            return;
        }
        if st.session.is_none() {
            let channel = self.clone();
            st.bind_task = Some(tokio::spawn(async move {
                channel.bind_when_ready().await;
            }));
        }
    }

    async fn bind_when_ready(self) {
        for _ in 0..self.bind_retry.max_attempts {
            tokio::time::sleep(self.bind_retry.interval).await;
            let st = self.lock();
            if let (Some(stream), Some(sink)) = (&st.stream, &st.sink) {
                bind(self.id, sink.as_ref(), stream);
                return;
            }
        }
        warn!(
            camera = %self.id,
            attempts = self.bind_retry.max_attempts,
            "gave up waiting for a stream to bind"
        );
    }

    // -- signaling task --

    async fn run_signaling(self, engine: Arc<dyn MediaEngine>, generation: u64) {
        let id = self.id;
        let ws = match tokio_tungstenite::connect_async(self.url.as_ref()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                self.fail(
                    generation,
                    &CameraError::SignalingFailed {
                        channel: id,
                        reason: e.to_string(),
                    },
                );
                return;
            }
        };
        if self.lock().generation != generation {
            debug!(camera = %id, "signaling superseded while connecting");
            return;
        }

        let (media_tx, mut media_rx) = mpsc::unbounded_channel();
        let session = match engine.create_session(id, media_tx).await {
            Ok(session) => session,
            Err(source) => {
                self.fail(generation, &CameraError::Media { channel: id, source });
                return;
            }
        };

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        {
            let mut st = self.lock();
            if st.generation != generation {
                session.close();
                return;
            }
            st.phase = SignalingPhase::SignalingOpen;
            st.session = Some(session.clone());
            st.signal_tx = Some(out_tx);
        }
        info!(camera = %id, url = %self.url, "signaling open");

        if let Err(e) = self.send_offer(generation, session.as_ref()).await {
            self.fail(generation, &e);
            return;
        }

        let (mut ws_tx, mut ws_rx) = ws.split();
        loop {
            tokio::select! {
                out = out_rx.recv() => match out {
                    Some(msg) => {
                        if let Err(e) = ws_tx.send(msg).await {
                            warn!(camera = %id, error = %e, "signaling send failed");
                            break;
                        }
                    }
                    None => {
                        // Torn down: the queue was dropped with the session.
                        let _ = ws_tx.send(Message::Close(None)).await;
                        debug!(camera = %id, "signaling closed locally");
                        return;
                    }
                },
                inbound = ws_rx.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_signal(generation, session.as_ref(), &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(camera = %id, "signaling socket closed");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(camera = %id, error = %e, "signaling socket error");
                        break;
                    }
                    Some(Ok(_)) => {}
                },
                Some(event) = media_rx.recv() => self.handle_media_event(generation, event),
            }
        }

        let mut st = self.lock();
        if st.generation == generation {
            st.teardown();
        }
    }

    async fn send_offer(
        &self,
        generation: u64,
        session: &dyn MediaSession,
    ) -> Result<(), CameraError> {
        let media_err = |source| CameraError::Media {
            channel: self.id,
            source,
        };
        let sdp = session.create_offer().await.map_err(media_err)?;
        session.set_local_description(&sdp).await.map_err(media_err)?;
        self.send(generation, &SignalingMessage::Offer { sdp })?;
        let mut st = self.lock();
        if st.generation == generation {
            st.phase = SignalingPhase::Offered;
        }
        Ok(())
    }

    fn send(&self, generation: u64, msg: &SignalingMessage) -> Result<(), CameraError> {
        let failed = |reason: String| CameraError::SignalingFailed {
            channel: self.id,
            reason,
        };
        let text = msg.to_text().map_err(|e| failed(e.to_string()))?;
        let st = self.lock();
        match (&st.signal_tx, st.generation == generation) {
            (Some(tx), true) => tx
                .send(Message::Text(text.into()))
                .map_err(|_| failed("signaling socket gone".to_owned())),
            _ => Err(failed("channel torn down".to_owned())),
        }
    }

    async fn handle_signal(&self, generation: u64, session: &dyn MediaSession, text: &str) {
        let msg = match SignalingMessage::from_text(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(camera = %self.id, error = %e, "dropping undecodable signaling message");
                return;
            }
        };
        match msg {
            SignalingMessage::Answer { sdp } => {
                match session.set_remote_description(&sdp).await {
                    Ok(()) => {
                        let mut st = self.lock();
                        if st.generation == generation {
                            st.phase = SignalingPhase::Negotiated;
                        }
                        info!(camera = %self.id, "answer applied");
                    }
                    Err(e) => warn!(camera = %self.id, error = %e, "failed to apply answer"),
                }
            }
            SignalingMessage::IceCandidate { candidate } | SignalingMessage::Candidate { candidate } => {
                if let Err(e) = session.add_ice_candidate(&candidate).await {
                    warn!(camera = %self.id, error = %e, "failed to add remote candidate");
                }
            }
            SignalingMessage::Offer { .. } => {
                debug!(camera = %self.id, "ignoring offer from rover");
            }
        }
    }

    fn handle_media_event(&self, generation: u64, event: MediaEvent) {
        match event {
            MediaEvent::Stream(stream) => {
                let mut st = self.lock();
                if st.generation != generation {
                    return;
                }
                info!(camera = %self.id, stream = %stream.id, "remote stream available");
                if let Some(sink) = &st.sink {
                    bind(self.id, sink.as_ref(), &stream);
                }
                st.stream = Some(stream);
            }
            MediaEvent::LocalCandidate(candidate) => {
                if let Err(e) = self.send(generation, &SignalingMessage::Candidate { candidate }) {
                    debug!(error = %e, "local candidate not sent");
                }
            }
        }
    }

    fn fail(&self, generation: u64, err: &CameraError) {
        warn!(camera = %self.id, error = %err, "camera channel failed");
        let mut st = self.lock();
        if st.generation == generation {
            st.teardown();
        }
    }
}

/// Attach `stream` to `sink` unless it already shows it, then try to play.
fn bind(id: CameraId, sink: &dyn VideoSink, stream: &MediaStream) {
    if sink.current_stream().as_deref() == Some(stream.id.as_str()) {
        return;
    }
    sink.attach(stream);
    if let Err(e) = sink.play() {
        warn!(camera = %id, error = %e, "video playback failed to start");
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// The three camera channels of one rover.
pub struct CameraManager {
    channels: [CameraChannel; 3],
    engine: Option<Arc<dyn MediaEngine>>,
}

impl CameraManager {
    /// `settings` is indexed by [`CameraId::index`].
    pub fn new(
        settings: [CameraSettings; 3],
        engine: Option<Arc<dyn MediaEngine>>,
        bind_retry: BindRetry,
    ) -> Self {
        let [csi, usb, csi2] = settings;
        Self {
            channels: [
                CameraChannel::new(CameraId::Csi, csi, bind_retry),
                CameraChannel::new(CameraId::Usb, usb, bind_retry),
                CameraChannel::new(CameraId::Csi2, csi2, bind_retry),
            ],
            engine,
        }
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    pub fn channel(&self, id: CameraId) -> &CameraChannel {
        &self.channels[id.index()]
    }

    pub fn channels(&self) -> &[CameraChannel; 3] {
        &self.channels
    }

    /// Start every enabled channel that is not running and tear down every
    /// disabled one.
    pub fn reconcile(&self) {
        for channel in &self.channels {
            if !channel.is_enabled() {
                if channel.phase() != SignalingPhase::Disconnected || channel.is_running() {
                    channel.teardown();
                }
                continue;
            }
            match &self.engine {
                Some(engine) => channel.start(engine.clone()),
                None => debug!(camera = %channel.id(), "no media engine, channel not started"),
            }
        }
    }

    pub fn set_enabled(&self, id: CameraId, enabled: bool) {
        self.channel(id).set_enabled(enabled);
    }

    pub fn set_video_sink(&self, id: CameraId, sink: Arc<dyn VideoSink>) {
        self.channel(id).set_video_sink(sink);
    }

    pub fn teardown(&self, id: CameraId) {
        self.channel(id).teardown();
    }

    pub fn teardown_all(&self) {
        for channel in &self.channels {
            channel.teardown();
        }
    }

    pub fn statuses(&self) -> [CameraStatus; 3] {
        [
            self.channels[0].status(),
            self.channels[1].status(),
            self.channels[2].status(),
        ]
    }
}
