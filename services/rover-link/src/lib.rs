pub mod api;
pub mod cache;
pub mod camera;
pub mod config;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod media;
pub mod readiness;
pub mod reconnect;
pub mod registry;
pub mod session;
pub mod uploader;

pub use cache::SensorCache;
pub use camera::{CameraId, CameraManager, SignalingPhase};
pub use error::SessionError;
pub use registry::SessionRegistry;
pub use session::{BridgeSession, ConnectionState, SessionEvent, SessionSettings, SessionTimings};
