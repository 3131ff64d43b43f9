//! Node health monitor.
//!
//! While a mission is active, re-checks the required nodes: once shortly
//! after arming, then on a slower cadence. Any required node that is not
//! `running` forces a full disconnect. There is no partial recovery; the
//! operator has to reconnect and relaunch.

use rover_protocol::{NodeState, NodeStatusSnapshot};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error};

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// A required node that is not running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeFailure {
    /// Missing from the snapshot, or offline / starting / stopping / unknown.
    Offline(String),
    Error(String),
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeFailure::Offline(name) => write!(f, "{name} (offline)"),
            NodeFailure::Error(name) => write!(f, "{name} (error)"),
        }
    }
}

/// Compare the latest snapshot against the required set.
pub fn evaluate(snapshot: Option<&NodeStatusSnapshot>, required: &[String]) -> Vec<NodeFailure> {
    required
        .iter()
        .filter_map(
            |name| match snapshot.and_then(|s| s.state_of(name)) {
                Some(NodeState::Running) => None,
                Some(NodeState::Error) => Some(NodeFailure::Error(name.clone())),
                _ => Some(NodeFailure::Offline(name.clone())),
            },
        )
        .collect()
}

/// What the monitor watches and tears down.
pub trait HealthTarget: Send + Sync + 'static {
    /// Connected with an active mission.
    fn mission_active(&self) -> bool;
    fn node_status(&self) -> Option<NodeStatusSnapshot>;
    fn force_disconnect(&self);
}

/// Run checks until one fails (then disconnect once) or the mission ends.
pub async fn run_monitor<T: HealthTarget>(
    target: T,
    required: Vec<String>,
    initial_delay: Duration,
    interval: Duration,
) {
    if required.is_empty() {
        return;
    }
    tokio::time::sleep(initial_delay).await;
    loop {
        if !target.mission_active() {
            debug!("health monitor idle, mission no longer active");
            return;
        }
        let failures = evaluate(target.node_status().as_ref(), &required);
        if !failures.is_empty() {
            let list: Vec<String> = failures.iter().map(ToString::to_string).collect();
            error!(failures = %list.join(", "), "required nodes failed, disconnecting");
            target.force_disconnect();
            return;
        }
        debug!(nodes = required.len(), "health check passed");
        tokio::time::sleep(interval).await;
    }
}
