// rover-test-utils: Shared test utilities for the rover link suite.
//
// Provides mock bridge and camera-signaling servers for integration testing
// of bridge sessions and camera channels.

pub mod mock_bridge_server;
pub mod mock_signaling_server;
mod socket_hub;

pub use mock_bridge_server::MockBridgeServer;
pub use mock_signaling_server::MockSignalingServer;
