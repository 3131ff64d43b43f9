//! Rover link configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides and no
//! hot reload. Default config path: `/etc/rover-link/rover-link.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `rover_id`
//!
//! Everything else has a default. Camera signaling ports must be distinct
//! from each other and from the bridge port.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::camera::CameraId;
use crate::reconnect::{self, ReconnectPolicy};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/rover-link/rover-link.toml";

const DEFAULT_ADDRESS: &str = "127.0.0.1";
const DEFAULT_BRIDGE_PORT: u16 = 9090;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_READINESS_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_AUTONOMOUS_NODES: [&str; 4] =
    ["gps_node", "imu_node", "lidar_node", "navigation_node"];
const DEFAULT_MANUAL_NODES: [&str; 2] = ["imu_node", "motor_controller"];

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level rover link configuration.
#[derive(Debug, Clone)]
pub struct RoverLinkConfig {
    pub schema_version: u32,
    pub rover_id: String,
    pub rover: RoverConfig,
    pub api: ApiConfig,
    /// Indexed by [`CameraId::index`].
    pub cameras: [CameraConfig; 3],
    pub mission: MissionConfig,
}

#[derive(Debug, Clone)]
pub struct RoverConfig {
    /// Host name or IP of the rover.
    pub address: String,
    pub bridge_port: u16,
    pub connect_timeout: Duration,
    /// Automatic retries after a peer close or failed connect.
    pub reconnect: ReconnectPolicy,
}

#[derive(Debug, Clone, Default)]
pub struct ApiConfig {
    /// Backend base URL, e.g. `http://localhost:5173/api`. `None` disables
    /// log upload and heartbeat persistence.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct MissionConfig {
    pub autonomous_nodes: Vec<String>,
    pub manual_nodes: Vec<String>,
    pub readiness_timeout: Duration,
}

impl RoverConfig {
    pub fn bridge_url(&self) -> String {
        format!("ws://{}:{}", self.address, self.bridge_port)
    }

    pub fn signaling_url(&self, port: u16) -> String {
        format!("ws://{}:{}", self.address, port)
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    rover_id: Option<RawRoverId>,
    rover: Option<RawRoverConfig>,
    api: Option<RawApiConfig>,
    cameras: Option<RawCamerasConfig>,
    mission: Option<RawMissionConfig>,
}

/// Rover ids are numeric in the backend but some deployments quote them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRoverId {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawRoverConfig {
    address: Option<String>,
    bridge_port: Option<u16>,
    connect_timeout_ms: Option<u64>,
    reconnect_attempts: Option<u32>,
    reconnect_base_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawApiConfig {
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCamerasConfig {
    csi: Option<RawCameraConfig>,
    usb: Option<RawCameraConfig>,
    csi2: Option<RawCameraConfig>,
}

#[derive(Debug, Deserialize)]
struct RawCameraConfig {
    enabled: Option<bool>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct RawMissionConfig {
    autonomous_nodes: Option<Vec<String>>,
    manual_nodes: Option<Vec<String>>,
    readiness_timeout_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load rover link config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<RoverLinkConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Parse and validate rover link config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<RoverLinkConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {}",
            schema_version
        )));
    }

    let rover_id = match raw
        .rover_id
        .ok_or_else(|| ConfigError::MissingField("rover_id".to_owned()))?
    {
        RawRoverId::Number(n) => n.to_string(),
        RawRoverId::Text(s) => s.trim().to_owned(),
    };
    if rover_id.is_empty() {
        return Err(ConfigError::InvalidValue(
            "rover_id must not be empty".to_owned(),
        ));
    }

    let rover = match raw.rover {
        Some(r) => RoverConfig {
            address: r.address.unwrap_or_else(|| DEFAULT_ADDRESS.to_owned()),
            bridge_port: r.bridge_port.unwrap_or(DEFAULT_BRIDGE_PORT),
            connect_timeout: Duration::from_millis(
                r.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            ),
            reconnect: ReconnectPolicy {
                max_attempts: r
                    .reconnect_attempts
                    .unwrap_or(reconnect::DEFAULT_MAX_ATTEMPTS),
                base_delay: r
                    .reconnect_base_delay_ms
                    .map_or(reconnect::DEFAULT_BASE_DELAY, Duration::from_millis),
                max_delay: r
                    .reconnect_max_delay_ms
                    .map_or(reconnect::DEFAULT_MAX_DELAY, Duration::from_millis),
            },
        },
        None => RoverConfig {
            address: DEFAULT_ADDRESS.to_owned(),
            bridge_port: DEFAULT_BRIDGE_PORT,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            reconnect: ReconnectPolicy::default(),
        },
    };
    if rover.address.trim().is_empty() {
        return Err(ConfigError::InvalidValue(
            "rover.address must not be empty".to_owned(),
        ));
    }
    if rover.connect_timeout.is_zero() {
        return Err(ConfigError::InvalidValue(
            "rover.connect_timeout_ms must be greater than 0".to_owned(),
        ));
    }
    if rover.reconnect.base_delay.is_zero() {
        return Err(ConfigError::InvalidValue(
            "rover.reconnect_base_delay_ms must be greater than 0".to_owned(),
        ));
    }
    if rover.reconnect.max_delay < rover.reconnect.base_delay {
        return Err(ConfigError::InvalidValue(
            "rover.reconnect_max_delay_ms must not be below rover.reconnect_base_delay_ms"
                .to_owned(),
        ));
    }

    let api = ApiConfig {
        base_url: raw
            .api
            .and_then(|a| a.base_url)
            .map(|url| url.trim_end_matches('/').to_owned())
            .filter(|url| !url.is_empty()),
    };

    let cameras = build_cameras(raw.cameras, rover.bridge_port)?;

    let mission = match raw.mission {
        Some(m) => MissionConfig {
            autonomous_nodes: m
                .autonomous_nodes
                .unwrap_or_else(|| to_owned_list(&DEFAULT_AUTONOMOUS_NODES)),
            manual_nodes: m
                .manual_nodes
                .unwrap_or_else(|| to_owned_list(&DEFAULT_MANUAL_NODES)),
            readiness_timeout: Duration::from_millis(
                m.readiness_timeout_ms
                    .unwrap_or(DEFAULT_READINESS_TIMEOUT_MS),
            ),
        },
        None => MissionConfig {
            autonomous_nodes: to_owned_list(&DEFAULT_AUTONOMOUS_NODES),
            manual_nodes: to_owned_list(&DEFAULT_MANUAL_NODES),
            readiness_timeout: Duration::from_millis(DEFAULT_READINESS_TIMEOUT_MS),
        },
    };

    Ok(RoverLinkConfig {
        schema_version,
        rover_id,
        rover,
        api,
        cameras,
        mission,
    })
}

fn to_owned_list(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_owned()).collect()
}

fn build_cameras(
    raw: Option<RawCamerasConfig>,
    bridge_port: u16,
) -> Result<[CameraConfig; 3], ConfigError> {
    let (csi, usb, csi2) = match raw {
        Some(c) => (c.csi, c.usb, c.csi2),
        None => (None, None, None),
    };
    let resolve = |id: CameraId, raw: Option<RawCameraConfig>| match raw {
        Some(c) => CameraConfig {
            enabled: c.enabled.unwrap_or(id == CameraId::Csi),
            port: c.port.unwrap_or_else(|| id.default_port()),
        },
        None => CameraConfig {
            enabled: id == CameraId::Csi,
            port: id.default_port(),
        },
    };
    let cameras = [
        resolve(CameraId::Csi, csi),
        resolve(CameraId::Usb, usb),
        resolve(CameraId::Csi2, csi2),
    ];

    for (i, cam) in cameras.iter().enumerate() {
        let id = CameraId::ALL[i];
        if cam.port == bridge_port {
            return Err(ConfigError::InvalidValue(format!(
                "cameras.{}.port {} collides with rover.bridge_port",
                id, cam.port
            )));
        }
        for (j, other) in cameras.iter().enumerate().skip(i + 1) {
            if cam.port == other.port {
                return Err(ConfigError::InvalidValue(format!(
                    "cameras.{}.port and cameras.{}.port are both {}",
                    id,
                    CameraId::ALL[j],
                    cam.port
                )));
            }
        }
    }
    Ok(cameras)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
