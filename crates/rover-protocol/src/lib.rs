// rover-protocol: Bridge and camera-signaling wire types.
//
// Bridge frames use the rosbridge JSON envelope: a top-level `op` field
// selects subscribe / unsubscribe / publish.  Rover-side publishers are not
// consistent about payload encoding (some send flat JSON, some stringify a
// JSON document into `msg.data`), so every inbound decoder here accepts both.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Every bridge topic the client publishes to or subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Command,
    SoftwareData,
    Heartbeat,
    Gps,
    ImuRaw,
    Lidar,
    ObstacleDetected,
    ObstacleDistance,
    Timestamp,
    NodeStatus,
    RoverState,
}

impl Topic {
    /// Topics the session subscribes to on connect, in subscription order.
    pub const SUBSCRIBED: [Topic; 8] = [
        Topic::Gps,
        Topic::ImuRaw,
        Topic::Lidar,
        Topic::ObstacleDetected,
        Topic::ObstacleDistance,
        Topic::Timestamp,
        Topic::NodeStatus,
        Topic::RoverState,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Topic::Command => "/command",
            Topic::SoftwareData => "/gps_waypoints",
            Topic::Heartbeat => "/heartbeat",
            Topic::Gps => "/fix",
            Topic::ImuRaw => "/imu/raw",
            Topic::Lidar => "/scan",
            Topic::ObstacleDetected => "/obstacle_detected",
            Topic::ObstacleDistance => "/obstacle_distance",
            Topic::Timestamp => "/timestamp",
            Topic::NodeStatus => "/node_status",
            Topic::RoverState => "/rover_state",
        }
    }

    /// ROS message type advertised in subscribe frames.
    pub fn message_type(self) -> &'static str {
        match self {
            Topic::Gps => "sensor_msgs/NavSatFix",
            Topic::ImuRaw => "std_msgs/Float64MultiArray",
            Topic::Lidar => "sensor_msgs/LaserScan",
            Topic::ObstacleDetected => "std_msgs/Bool",
            Topic::ObstacleDistance => "std_msgs/Float32",
            Topic::Command
            | Topic::SoftwareData
            | Topic::Heartbeat
            | Topic::Timestamp
            | Topic::NodeStatus
            | Topic::RoverState => "std_msgs/String",
        }
    }

    pub fn from_name(name: &str) -> Option<Topic> {
        const ALL: [Topic; 11] = [
            Topic::Command,
            Topic::SoftwareData,
            Topic::Heartbeat,
            Topic::Gps,
            Topic::ImuRaw,
            Topic::Lidar,
            Topic::ObstacleDetected,
            Topic::ObstacleDistance,
            Topic::Timestamp,
            Topic::NodeStatus,
            Topic::RoverState,
        ];
        ALL.into_iter().find(|t| t.name() == name)
    }
}

// ---------------------------------------------------------------------------
// Bridge envelope
// ---------------------------------------------------------------------------

/// One JSON text frame on the bridge socket.
///
/// Inbound frames with any other `op` (status, service responses) decode as
/// `Other` and are ignored by the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BridgeFrame {
    Subscribe {
        topic: String,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        msg_type: Option<String>,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        msg: Option<Value>,
    },
    #[serde(other)]
    Other,
}

impl BridgeFrame {
    pub fn subscribe(topic: Topic) -> Self {
        BridgeFrame::Subscribe {
            topic: topic.name().to_owned(),
            msg_type: Some(topic.message_type().to_owned()),
        }
    }

    pub fn unsubscribe(topic: Topic) -> Self {
        BridgeFrame::Unsubscribe {
            topic: topic.name().to_owned(),
        }
    }

    /// Publish `payload` as a `std_msgs/String` whose `data` is the
    /// payload's JSON text.
    pub fn publish_json<T: Serialize>(topic: Topic, payload: &T) -> Result<Self, ProtocolError> {
        let data = serde_json::to_string(payload)?;
        Ok(BridgeFrame::Publish {
            topic: topic.name().to_owned(),
            msg: Some(serde_json::json!({ "data": data })),
        })
    }

    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Lenient payload decoding
// ---------------------------------------------------------------------------

/// Decode a structured payload from a publish frame's `msg`.
///
/// Tries, in order: `msg.data` as stringified JSON, `msg.data` as an object,
/// then `msg` itself.
pub fn decode_payload<T: DeserializeOwned>(msg: &Value) -> Result<T, ProtocolError> {
    match msg.get("data") {
        Some(Value::String(text)) => {
            if let Ok(inner) = serde_json::from_str::<T>(text) {
                return Ok(inner);
            }
        }
        Some(inner @ Value::Object(_)) => {
            if let Ok(decoded) = T::deserialize(inner) {
                return Ok(decoded);
            }
        }
        _ => {}
    }
    Ok(T::deserialize(msg)?)
}

fn scalar(msg: &Value) -> &Value {
    msg.get("data").unwrap_or(msg)
}

/// Decode a `std_msgs/Bool`-like payload. Strings and numbers are accepted.
pub fn decode_bool(msg: &Value) -> Result<bool, ProtocolError> {
    match scalar(msg) {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
        Value::String(s) => s
            .trim()
            .parse::<bool>()
            .map_err(|_| ProtocolError::InvalidPayload(format!("not a bool: {s:?}"))),
        other => Err(ProtocolError::InvalidPayload(format!("not a bool: {other}"))),
    }
}

/// Decode a `std_msgs/Float32`-like payload. Numeric strings are accepted.
pub fn decode_f64(msg: &Value) -> Result<f64, ProtocolError> {
    match scalar(msg) {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ProtocolError::InvalidPayload(format!("not a float: {n}"))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ProtocolError::InvalidPayload(format!("not a float: {s:?}"))),
        other => Err(ProtocolError::InvalidPayload(format!(
            "not a float: {other}"
        ))),
    }
}

/// Decode a `std_msgs/String`-like payload; numbers are rendered as text.
pub fn decode_text(msg: &Value) -> Result<String, ProtocolError> {
    match scalar(msg) {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ProtocolError::InvalidPayload(format!(
            "not a string: {other}"
        ))),
    }
}

/// Decode a `std_msgs/Float64MultiArray`-like payload into its values.
pub fn decode_f64_array(msg: &Value) -> Result<Vec<f64>, ProtocolError> {
    match scalar(msg) {
        Value::String(text) => Ok(serde_json::from_str(text)?),
        arr @ Value::Array(_) => Ok(Vec::<f64>::deserialize(arr)?),
        other => Err(ProtocolError::InvalidPayload(format!(
            "not a float array: {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Rover -> client payloads
// ---------------------------------------------------------------------------

/// `sensor_msgs/NavSatFix`, reduced to the fields the client uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<GpsStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpsStatus {
    pub status: i8,
    #[serde(default)]
    pub service: u16,
}

/// Raw orientation sample: `[roll, pitch, yaw, temperature, voltage]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuRaw {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub temperature: f64,
    pub voltage: f64,
}

impl ImuRaw {
    /// The rover publishes exactly five values; anything else is rejected.
    pub fn from_values(values: &[f64]) -> Result<Self, ProtocolError> {
        match values {
            [roll, pitch, yaw, temperature, voltage] => Ok(Self {
                roll: *roll,
                pitch: *pitch,
                yaw: *yaw,
                temperature: *temperature,
                voltage: *voltage,
            }),
            _ => Err(ProtocolError::InvalidPayload(format!(
                "expected 5 raw IMU values, got {}",
                values.len()
            ))),
        }
    }
}

/// `sensor_msgs/LaserScan`. Out-of-range samples arrive as JSON `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserScan {
    pub angle_min: f32,
    pub angle_max: f32,
    pub angle_increment: f32,
    #[serde(default)]
    pub time_increment: f32,
    #[serde(default)]
    pub scan_time: f32,
    pub range_min: f32,
    pub range_max: f32,
    pub ranges: Vec<Option<f32>>,
    #[serde(default)]
    pub intensities: Vec<Option<f32>>,
}

/// Lifecycle state reported for one remote software component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Running,
    Offline,
    Starting,
    Stopping,
    Error,
    #[serde(other)]
    Unknown,
}

/// Full node-status report. Each frame replaces the previous snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeStatusSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub nodes: HashMap<String, NodeState>,
}

impl NodeStatusSnapshot {
    pub fn state_of(&self, node: &str) -> Option<NodeState> {
        self.nodes.get(node).copied()
    }
}

/// Decode a `/rover_state` payload: `{"state": ".."}` (object or
/// stringified) or a bare state string.
pub fn decode_rover_state(msg: &Value) -> Result<String, ProtocolError> {
    fn state_field(v: &Value) -> Option<String> {
        v.get("state").and_then(Value::as_str).map(str::to_owned)
    }
    let inner = scalar(msg);
    if let Some(state) = state_field(inner) {
        return Ok(state);
    }
    match inner {
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(parsed) => Ok(state_field(&parsed)
                .or_else(|| parsed.as_str().map(str::to_owned))
                .unwrap_or_else(|| text.clone())),
            Err(_) => Ok(text.clone()),
        },
        other => Err(ProtocolError::InvalidPayload(format!(
            "not a rover state: {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Client -> rover payloads
// ---------------------------------------------------------------------------

/// Control command published on `/command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum RoverCommand {
    LaunchRover {
        waypoint_count: usize,
        launch_mode: String,
    },
    ManualControl {
        control_mode: String,
    },
    Stop {
        emergency: bool,
    },
}

impl RoverCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            RoverCommand::LaunchRover { .. } => "LaunchRover",
            RoverCommand::ManualControl { .. } => "ManualControl",
            RoverCommand::Stop { .. } => "Stop",
        }
    }
}

/// A geographic waypoint as entered by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lng: f64,
}

/// Waypoint as the rover's navigation stack expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointEntry {
    pub id: usize,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl WaypointEntry {
    pub fn from_route(waypoints: &[Waypoint]) -> Vec<WaypointEntry> {
        waypoints
            .iter()
            .enumerate()
            .map(|(id, wp)| WaypointEntry {
                id,
                latitude: wp.lat,
                longitude: wp.lng,
                altitude: 0.0,
            })
            .collect()
    }
}

/// Differential wheel command in the rover's `{"T":1,"L":..,"R":..}` form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveCommand {
    #[serde(rename = "T")]
    pub mode: u8,
    #[serde(rename = "L")]
    pub left: f64,
    #[serde(rename = "R")]
    pub right: f64,
}

impl DriveCommand {
    pub fn wheels(left: f64, right: f64) -> Self {
        Self {
            mode: 1,
            left,
            right,
        }
    }

    pub fn forward(speed: f64) -> Self {
        Self::wheels(0.1 * speed, 0.1 * speed)
    }

    pub fn backward(speed: f64) -> Self {
        Self::wheels(-0.1 * speed, -0.1 * speed)
    }

    pub fn turn_left(speed: f64) -> Self {
        Self::wheels(-0.25 * speed, 0.25 * speed)
    }

    pub fn turn_right(speed: f64) -> Self {
        Self::wheels(0.25 * speed, -0.25 * speed)
    }

    pub fn stop() -> Self {
        Self::wheels(0.0, 0.0)
    }
}

/// Software data published on `/gps_waypoints`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SoftwareData {
    Waypoints { waypoints: Vec<WaypointEntry> },
    NavigationParams(serde_json::Map<String, Value>),
    ManualCommand(DriveCommand),
}

impl SoftwareData {
    pub fn kind(&self) -> &'static str {
        match self {
            SoftwareData::Waypoints { .. } => "waypoints",
            SoftwareData::NavigationParams(_) => "navigation_params",
            SoftwareData::ManualCommand(_) => "manual_command",
        }
    }
}

/// Envelope stamped onto every outbound command / software-data payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamped<T> {
    #[serde(flatten)]
    pub payload: T,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub rover_id: String,
}

/// Liveness frame published on `/heartbeat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub rover_id: String,
    pub timestamp: i64,
    pub status: String,
    pub is_navigating: bool,
}

// ---------------------------------------------------------------------------
// Camera signaling
// ---------------------------------------------------------------------------

/// ICE candidate in the browser `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

/// One message on a camera channel's signaling socket.
///
/// The client sends `offer` and `candidate`; the rover answers with `answer`
/// and `ice-candidate` (older firmware also uses `candidate`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: IceCandidate },
    IceCandidate { candidate: IceCandidate },
}

impl SignalingMessage {
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
