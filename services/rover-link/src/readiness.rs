//! Readiness gate for high-risk commands.
//!
//! Polls the cached node-status snapshot on a fixed cadence until every
//! required node reports `running`. Fails fast when any required node reports
//! `error`, otherwise gives up at the timeout. `starting` keeps the gate
//! waiting and does not extend the deadline.

use rover_protocol::{NodeState, NodeStatusSnapshot};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::SensorCache;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Ready,
    /// Required nodes that reported `error`.
    NodeErrors(Vec<String>),
    /// Required nodes still not `running` when the deadline passed.
    TimedOut { not_running: Vec<String> },
}

impl GateOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, GateOutcome::Ready)
    }
}

impl fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateOutcome::Ready => write!(f, "ready"),
            GateOutcome::NodeErrors(names) => {
                write!(f, "nodes in error: {}", names.join(", "))
            }
            GateOutcome::TimedOut { not_running } => {
                write!(f, "timed out waiting for: {}", not_running.join(", "))
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Check {
    Ready,
    Errors(Vec<String>),
    Waiting(Vec<String>),
}

fn check(snapshot: Option<&NodeStatusSnapshot>, required: &[String]) -> Check {
    let Some(snapshot) = snapshot else {
        return Check::Waiting(required.to_vec());
    };
    let mut errors = Vec::new();
    let mut waiting = Vec::new();
    for name in required {
        match snapshot.state_of(name) {
            Some(NodeState::Running) => {}
            Some(NodeState::Error) => errors.push(name.clone()),
            _ => waiting.push(name.clone()),
        }
    }
    if !errors.is_empty() {
        Check::Errors(errors)
    } else if waiting.is_empty() {
        Check::Ready
    } else {
        Check::Waiting(waiting)
    }
}

/// Wait for `required` to all report `running`.
///
/// The first check runs immediately, later ones every `poll`. An empty
/// `required` set is ready without a snapshot.
pub async fn poll_until_ready(
    cache: &SensorCache,
    required: &[String],
    timeout: Duration,
    poll: Duration,
) -> GateOutcome {
    if required.is_empty() {
        return GateOutcome::Ready;
    }
    let deadline = Instant::now() + timeout;
    loop {
        match check(cache.node_status().as_ref(), required) {
            Check::Ready => {
                info!(nodes = ?required, "required nodes running");
                return GateOutcome::Ready;
            }
            Check::Errors(names) => {
                info!(nodes = ?names, "required nodes reported error");
                return GateOutcome::NodeErrors(names);
            }
            Check::Waiting(not_running) => {
                let now = Instant::now();
                if now >= deadline {
                    info!(nodes = ?not_running, "readiness wait timed out");
                    return GateOutcome::TimedOut { not_running };
                }
                debug!(waiting = ?not_running, "waiting for nodes");
                tokio::time::sleep(poll.min(deadline - now)).await;
            }
        }
    }
}

/// Boolean form of [`poll_until_ready`].
pub async fn wait_for_nodes_running(
    cache: &SensorCache,
    required: &[String],
    timeout: Duration,
    poll: Duration,
) -> bool {
    poll_until_ready(cache, required, timeout, poll)
        .await
        .is_ready()
}
