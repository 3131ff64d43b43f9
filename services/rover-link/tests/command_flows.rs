//! Integration tests for launch / manual control / stop and the node health
//! monitor against a mock bridge.

mod common;

use common::{ROVER_ID, eventually, node_status, settings};
use rover_link::readiness::GateOutcome;
use rover_link::reconnect::ReconnectPolicy;
use rover_link::{BridgeSession, ConnectionState, SessionError, SessionEvent};
use rover_protocol::{BridgeFrame, DriveCommand, Topic, Waypoint};
use rover_test_utils::MockBridgeServer;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

const ROUTE: [Waypoint; 2] = [
    Waypoint {
        lat: 12.9716,
        lng: 77.5946,
    },
    Waypoint {
        lat: 12.9720,
        lng: 77.5950,
    },
];

async fn connected_session() -> (MockBridgeServer, BridgeSession) {
    let mut server = MockBridgeServer::start().await.expect("start bridge");
    let session = BridgeSession::new(settings(&server.url()), None, None);
    session.connect().await.expect("connect");
    server.wait_for_connections(1).await;
    (server, session)
}

/// Publish a node-status frame and wait until the session has cached it.
async fn report_nodes(server: &MockBridgeServer, session: &BridgeSession, nodes: &[(&str, &str)]) {
    let mut rx = session.subscribe();
    assert!(server.publish(Topic::NodeStatus.name(), node_status(nodes)));
    let seen = tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(SessionEvent::SensorUpdated(Topic::NodeStatus)) => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(seen, "node status never reached the cache");
}

/// Next `/command` payload, skipping heartbeats and subscriptions.
async fn next_command(server: &mut MockBridgeServer) -> Option<Value> {
    server.wait_for_publish(Topic::Command, WAIT).await
}

/// True if any `topic` publish is already queued at the server.
fn saw_publish(server: &mut MockBridgeServer, topic: Topic) -> bool {
    server
        .drain_frames()
        .iter()
        .any(|f| matches!(f, BridgeFrame::Publish { topic: t, .. } if t == topic.name()))
}

fn count_disconnects(rx: &mut broadcast::Receiver<SessionEvent>) -> usize {
    let mut n = 0;
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::StateChanged(status) = event {
            if !status.is_connected {
                n += 1;
            }
        }
    }
    n
}

// ---------------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn launch_publishes_command_then_route() {
    let (mut server, session) = connected_session().await;
    report_nodes(
        &server,
        &session,
        &[("gps_node", "running"), ("navigation_node", "running")],
    )
    .await;

    session.launch_rover(&ROUTE).await.expect("launch");

    let cmd = next_command(&mut server).await.expect("launch command");
    assert_eq!(cmd["type"], "LaunchRover");
    assert_eq!(cmd["params"]["waypoint_count"], 2);
    assert_eq!(cmd["params"]["launch_mode"], "autonomous");
    assert_eq!(cmd["rover_id"], ROVER_ID);
    assert!(cmd["timestamp"].as_i64().unwrap() > 0);

    let route = server
        .wait_for_publish(Topic::SoftwareData, WAIT)
        .await
        .expect("route");
    assert_eq!(route["type"], "waypoints");
    let waypoints = route["data"]["waypoints"].as_array().unwrap();
    assert_eq!(waypoints.len(), 2);
    assert_eq!(waypoints[0]["id"], 0);
    assert_eq!(waypoints[1]["latitude"], 12.9720);
    assert_eq!(waypoints[1]["longitude"], 77.5950);
    assert_eq!(waypoints[1]["altitude"], 0.0);

    let mission = session.mission();
    assert!(mission.is_navigating);
    assert_eq!(mission.total_waypoints, 2);
    assert_eq!(mission.current_waypoint, 0);
    assert_eq!(session.required_nodes(), vec!["gps_node", "navigation_node"]);
}

#[tokio::test]
async fn heartbeat_reports_navigation_after_launch() {
    let (mut server, session) = connected_session().await;
    report_nodes(
        &server,
        &session,
        &[("gps_node", "running"), ("navigation_node", "running")],
    )
    .await;
    session.launch_rover(&ROUTE).await.unwrap();
    server.drain_frames();

    let beat = server
        .wait_for_frame(WAIT, |f| match f {
            BridgeFrame::Publish { topic, msg: Some(msg) } if topic == "/heartbeat" => msg["data"]
                .as_str()
                .is_some_and(|d| d.contains("\"is_navigating\":true")),
            _ => false,
        })
        .await;
    assert!(beat.is_some());
}

#[tokio::test]
async fn launch_with_empty_route_is_rejected() {
    let (mut server, session) = connected_session().await;
    let err = session.launch_rover(&[]).await.unwrap_err();
    assert!(matches!(err, SessionError::EmptyRoute));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!saw_publish(&mut server, Topic::Command));
    assert!(!session.mission().is_navigating);
}

#[tokio::test]
async fn launch_while_disconnected_fails() {
    let session = BridgeSession::new(settings("ws://127.0.0.1:1"), None, None);
    let err = session.launch_rover(&ROUTE).await.unwrap_err();
    assert!(matches!(err, SessionError::NotConnected));
    assert!(!session.mission().is_navigating);
}

#[tokio::test]
async fn launch_fails_fast_on_node_error_and_rolls_back() {
    let (mut server, session) = connected_session().await;
    report_nodes(
        &server,
        &session,
        &[("gps_node", "running"), ("navigation_node", "error")],
    )
    .await;

    let err = session.launch_rover(&ROUTE).await.unwrap_err();
    match err {
        SessionError::NodesNotReady(GateOutcome::NodeErrors(names)) => {
            assert_eq!(names, vec!["navigation_node"]);
        }
        other => panic!("expected node errors, got {other:?}"),
    }
    assert_eq!(session.mission().total_waypoints, 0);
    assert!(!session.mission().is_navigating);
    assert!(session.required_nodes().is_empty());

    // The launch command went out; the route did not.
    assert!(next_command(&mut server).await.is_some());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!saw_publish(&mut server, Topic::SoftwareData));
    assert!(session.is_connected());
}

#[tokio::test]
async fn launch_times_out_while_nodes_start() {
    let (mut server, session) = connected_session().await;
    report_nodes(
        &server,
        &session,
        &[("gps_node", "running"), ("navigation_node", "starting")],
    )
    .await;

    let started = tokio::time::Instant::now();
    let err = session.launch_rover(&ROUTE).await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(450));
    match err {
        SessionError::NodesNotReady(GateOutcome::TimedOut { not_running }) => {
            assert_eq!(not_running, vec!["navigation_node"]);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(!session.mission().is_navigating);
    assert!(!saw_publish(&mut server, Topic::SoftwareData));
}

#[tokio::test]
async fn launch_succeeds_once_nodes_come_up() {
    let (server, session) = connected_session().await;
    report_nodes(&server, &session, &[("gps_node", "starting")]).await;

    let launcher = session.clone();
    let launch = tokio::spawn(async move { launcher.launch_rover(&ROUTE).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.mission().is_navigating, "flags are set optimistically");
    report_nodes(
        &server,
        &session,
        &[("gps_node", "running"), ("navigation_node", "running")],
    )
    .await;

    launch.await.unwrap().expect("launch");
    assert!(session.mission().is_navigating);
}

// ---------------------------------------------------------------------------
// Manual control
// ---------------------------------------------------------------------------

#[tokio::test]
async fn manual_control_requires_manual_nodes() {
    let (mut server, session) = connected_session().await;
    report_nodes(&server, &session, &[("motor_controller", "running")]).await;

    session.enable_manual_control().await.expect("manual");
    let cmd = next_command(&mut server).await.expect("manual command");
    assert_eq!(cmd["type"], "ManualControl");
    assert_eq!(cmd["params"]["control_mode"], "manual");
    assert_eq!(session.required_nodes(), vec!["motor_controller"]);
    assert!(!session.mission().is_navigating);
}

#[tokio::test]
async fn manual_control_refused_when_node_errors() {
    let (server, session) = connected_session().await;
    report_nodes(&server, &session, &[("motor_controller", "error")]).await;

    let err = session.enable_manual_control().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::NodesNotReady(GateOutcome::NodeErrors(ref names)) if names == &["motor_controller"]
    ));
    assert!(session.required_nodes().is_empty());
    assert!(session.is_connected());
}

#[tokio::test]
async fn manual_control_while_disconnected_fails() {
    let session = BridgeSession::new(settings("ws://127.0.0.1:1"), None, None);
    let err = session.enable_manual_control().await.unwrap_err();
    assert!(matches!(err, SessionError::NotConnected));
}

#[tokio::test]
async fn drive_commands_go_out_as_manual_software_data() {
    let (mut server, session) = connected_session().await;
    session.send_drive(DriveCommand::turn_left(2.0)).unwrap();

    let data = server
        .wait_for_publish(Topic::SoftwareData, WAIT)
        .await
        .expect("drive frame");
    assert_eq!(data["type"], "manual_command");
    assert_eq!(data["data"]["T"], 1);
    assert_eq!(data["data"]["L"], -0.5);
    assert_eq!(data["data"]["R"], 0.5);
    assert_eq!(data["rover_id"], ROVER_ID);
}

#[tokio::test]
async fn drive_while_disconnected_fails() {
    let session = BridgeSession::new(settings("ws://127.0.0.1:1"), None, None);
    let err = session.send_drive(DriveCommand::stop()).unwrap_err();
    assert!(matches!(err, SessionError::NotConnected));
}

// ---------------------------------------------------------------------------
// Stop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_sends_command_and_clears_mission() {
    let (mut server, session) = connected_session().await;
    report_nodes(
        &server,
        &session,
        &[("gps_node", "running"), ("navigation_node", "running")],
    )
    .await;
    session.launch_rover(&ROUTE).await.unwrap();
    let _launch = next_command(&mut server).await;

    session.stop_rover();
    let cmd = next_command(&mut server).await.expect("stop command");
    assert_eq!(cmd["type"], "Stop");
    assert_eq!(cmd["params"]["emergency"], false);
    assert!(!session.mission().is_navigating);
    assert!(session.required_nodes().is_empty());
    assert!(session.is_connected());
}

#[tokio::test]
async fn stop_while_disconnected_still_succeeds() {
    let session = BridgeSession::new(settings("ws://127.0.0.1:1"), None, None);
    let mut rx = session.subscribe();
    session.stop_rover();
    assert!(!session.mission().is_navigating);
    assert!(matches!(rx.try_recv(), Ok(SessionEvent::StateChanged(_))));
}

// ---------------------------------------------------------------------------
// Health monitor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_node_forces_a_single_disconnect() {
    let (mut server, session) = connected_session().await;
    report_nodes(
        &server,
        &session,
        &[("gps_node", "running"), ("navigation_node", "running")],
    )
    .await;
    session.launch_rover(&ROUTE).await.unwrap();

    let mut rx = session.subscribe();
    report_nodes(
        &server,
        &session,
        &[("gps_node", "running"), ("navigation_node", "offline")],
    )
    .await;

    assert!(
        eventually(WAIT, || session.connection_state() == ConnectionState::Idle).await,
        "health monitor never disconnected"
    );
    tokio::time::timeout(WAIT, server.wait_for_all_closed())
        .await
        .expect("socket closed");
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(count_disconnects(&mut rx), 1);
    assert!(!session.mission().is_navigating);
    assert!(session.required_nodes().is_empty());
    assert!(session.cache().is_empty());
}

#[tokio::test]
async fn health_forced_disconnect_does_not_reconnect() {
    let mut server = MockBridgeServer::start().await.expect("start bridge");
    let mut s = settings(&server.url());
    s.reconnect = ReconnectPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(40),
        max_delay: Duration::from_millis(80),
    };
    let session = BridgeSession::new(s, None, None);
    session.connect().await.expect("connect");
    server.wait_for_connections(1).await;
    report_nodes(
        &server,
        &session,
        &[("gps_node", "running"), ("navigation_node", "running")],
    )
    .await;
    session.launch_rover(&ROUTE).await.unwrap();

    report_nodes(
        &server,
        &session,
        &[("gps_node", "error"), ("navigation_node", "running")],
    )
    .await;
    assert!(eventually(WAIT, || session.connection_state() == ConnectionState::Idle).await);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(server.connection_count(), 1);
    assert!(!session.is_connected());
}

#[tokio::test]
async fn healthy_nodes_keep_the_session_up() {
    let (server, session) = connected_session().await;
    report_nodes(
        &server,
        &session,
        &[("gps_node", "running"), ("navigation_node", "running")],
    )
    .await;
    session.launch_rover(&ROUTE).await.unwrap();

    // Several check intervals pass.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(session.is_connected());
    assert!(session.mission().is_navigating);
}

#[tokio::test]
async fn stopped_mission_is_not_monitored() {
    let (server, session) = connected_session().await;
    report_nodes(
        &server,
        &session,
        &[("gps_node", "running"), ("navigation_node", "running")],
    )
    .await;
    session.launch_rover(&ROUTE).await.unwrap();
    session.stop_rover();

    report_nodes(&server, &session, &[("gps_node", "error")]).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(session.is_connected());
}
