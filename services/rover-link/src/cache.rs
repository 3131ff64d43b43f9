use rover_protocol::{
    GpsFix, ImuRaw, LaserScan, NodeStatusSnapshot, ProtocolError, Topic, decode_bool,
    decode_f64, decode_f64_array, decode_payload, decode_rover_state, decode_text,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use crate::api::TelemetryLog;

/// Last obstacle report. Detection and distance arrive on separate topics
/// and each keeps its last value when only the other one updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ObstacleReading {
    pub detected: Option<bool>,
    pub distance: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatteryInfo {
    pub voltage: f64,
    pub temperature: f64,
}

/// Every cached slot, as one consistent copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub gps: Option<GpsFix>,
    pub imu: Option<ImuRaw>,
    pub lidar: Option<LaserScan>,
    pub obstacle: Option<ObstacleReading>,
    pub node_status: Option<NodeStatusSnapshot>,
    pub rover_timestamp: Option<String>,
    pub rover_state: Option<String>,
}

impl SensorSnapshot {
    pub fn is_empty(&self) -> bool {
        *self == SensorSnapshot::default()
    }
}

/// Thread-safe latest-value cache for inbound sensor topics.
///
/// Cheap to clone; clones share the same slots.
#[derive(Clone, Default)]
pub struct SensorCache {
    inner: Arc<RwLock<SensorSnapshot>>,
}

impl SensorCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, f: impl FnOnce(&SensorSnapshot) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write(&self, f: impl FnOnce(&mut SensorSnapshot)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    /// Decode `msg` for `topic` and store it in that topic's slot.
    ///
    /// Returns `Ok(false)` for topics that carry no cached data (the
    /// client's own outbound topics).
    pub fn apply(&self, topic: Topic, msg: &Value) -> Result<bool, ProtocolError> {
        match topic {
            Topic::Gps => self.set_gps(decode_payload(msg)?),
            Topic::ImuRaw => self.set_imu(ImuRaw::from_values(&decode_f64_array(msg)?)?),
            Topic::Lidar => self.set_lidar(decode_payload(msg)?),
            Topic::ObstacleDetected => self.set_obstacle_detected(decode_bool(msg)?),
            Topic::ObstacleDistance => self.set_obstacle_distance(decode_f64(msg)?),
            Topic::Timestamp => self.set_rover_timestamp(decode_text(msg)?),
            Topic::NodeStatus => self.set_node_status(decode_payload(msg)?),
            Topic::RoverState => self.set_rover_state(decode_rover_state(msg)?),
            Topic::Command | Topic::SoftwareData | Topic::Heartbeat => {
                debug!(topic = topic.name(), "ignoring frame on outbound topic");
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn set_gps(&self, fix: GpsFix) {
        self.write(|s| s.gps = Some(fix));
    }

    pub fn set_imu(&self, imu: ImuRaw) {
        self.write(|s| s.imu = Some(imu));
    }

    pub fn set_lidar(&self, scan: LaserScan) {
        self.write(|s| s.lidar = Some(scan));
    }

    pub fn set_obstacle_detected(&self, detected: bool) {
        self.write(|s| s.obstacle.get_or_insert_with(Default::default).detected = Some(detected));
    }

    pub fn set_obstacle_distance(&self, distance: f64) {
        self.write(|s| s.obstacle.get_or_insert_with(Default::default).distance = Some(distance));
    }

    /// Replaces the previous snapshot wholesale.
    pub fn set_node_status(&self, snapshot: NodeStatusSnapshot) {
        self.write(|s| s.node_status = Some(snapshot));
    }

    pub fn set_rover_timestamp(&self, ts: String) {
        self.write(|s| s.rover_timestamp = Some(ts));
    }

    pub fn set_rover_state(&self, state: String) {
        self.write(|s| s.rover_state = Some(state));
    }

    /// Empty every slot at once.
    pub fn clear(&self) {
        self.write(|s| *s = SensorSnapshot::default());
    }

    pub fn snapshot(&self) -> SensorSnapshot {
        self.read(Clone::clone)
    }

    pub fn is_empty(&self) -> bool {
        self.read(SensorSnapshot::is_empty)
    }

    pub fn gps(&self) -> Option<GpsFix> {
        self.read(|s| s.gps.clone())
    }

    pub fn imu(&self) -> Option<ImuRaw> {
        self.read(|s| s.imu)
    }

    pub fn lidar(&self) -> Option<LaserScan> {
        self.read(|s| s.lidar.clone())
    }

    pub fn obstacle(&self) -> Option<ObstacleReading> {
        self.read(|s| s.obstacle)
    }

    pub fn node_status(&self) -> Option<NodeStatusSnapshot> {
        self.read(|s| s.node_status.clone())
    }

    pub fn rover_timestamp(&self) -> Option<String> {
        self.read(|s| s.rover_timestamp.clone())
    }

    pub fn rover_state(&self) -> Option<String> {
        self.read(|s| s.rover_state.clone())
    }

    pub fn gps_position(&self) -> Option<GpsPosition> {
        self.read(|s| {
            s.gps.as_ref().map(|fix| GpsPosition {
                latitude: fix.latitude,
                longitude: fix.longitude,
                altitude: fix.altitude,
            })
        })
    }

    pub fn battery(&self) -> Option<BatteryInfo> {
        self.read(|s| {
            s.imu.map(|imu| BatteryInfo {
                voltage: imu.voltage,
                temperature: imu.temperature,
            })
        })
    }

    /// A log record, available only when both GPS and orientation are cached.
    pub fn telemetry(&self) -> Option<TelemetryLog> {
        self.read(|s| {
            let (gps, imu) = (s.gps.as_ref()?, s.imu?);
            Some(TelemetryLog {
                latitude: gps.latitude,
                longitude: gps.longitude,
                altitude: gps.altitude,
                roll: imu.roll,
                pitch: imu.pitch,
                yaw: imu.yaw,
                temperature: imu.temperature,
                voltage: imu.voltage,
            })
        })
    }
}
