// mock_bridge_server: A mock rosbridge endpoint for testing bridge sessions.
//
// Records every frame the client sends (subscribe, unsubscribe, publish) and
// lets the test publish topic frames back to the client.

use std::net::SocketAddr;
use std::time::Duration;

use rover_protocol::{BridgeFrame, Topic};
use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::socket_hub::SocketHub;

/// A mock bridge server for integration testing.
///
/// Binds to port 0 (random). Each test spins up its own instance.
pub struct MockBridgeServer {
    hub: SocketHub,
}

impl MockBridgeServer {
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            hub: SocketHub::start().await?,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.hub.local_addr()
    }

    pub fn port(&self) -> u16 {
        self.hub.local_addr().port()
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.hub.local_addr())
    }

    /// Number of clients accepted since start.
    pub fn connection_count(&self) -> usize {
        self.hub.accepted_count()
    }

    /// Number of clients currently connected.
    pub fn active_connections(&self) -> usize {
        self.hub.active_count()
    }

    pub async fn wait_for_connections(&mut self, n: usize) {
        self.hub.wait_for_accepted(n).await;
    }

    /// Wait until every client socket has closed.
    pub async fn wait_for_all_closed(&mut self) {
        self.hub.wait_for_active(0).await;
    }

    /// Next frame received from any client, in arrival order.
    ///
    /// Frames that are not valid bridge JSON are skipped.
    pub async fn next_frame(&mut self) -> Option<BridgeFrame> {
        loop {
            let text = self.hub.recv_text().await?;
            if let Ok(frame) = BridgeFrame::from_text(&text) {
                return Some(frame);
            }
        }
    }

    /// Skip frames until one matches `pred`. Returns `None` if nothing
    /// matches within `within`.
    pub async fn wait_for_frame<F>(&mut self, within: Duration, mut pred: F) -> Option<BridgeFrame>
    where
        F: FnMut(&BridgeFrame) -> bool,
    {
        tokio::time::timeout(within, async {
            loop {
                let frame = self.next_frame().await?;
                if pred(&frame) {
                    return Some(frame);
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    /// Wait for the next publish on `topic` and return its decoded
    /// stringified `data` payload.
    pub async fn wait_for_publish(&mut self, topic: Topic, within: Duration) -> Option<Value> {
        let name = topic.name();
        let frame = self
            .wait_for_frame(within, |f| {
                matches!(f, BridgeFrame::Publish { topic, .. } if topic == name)
            })
            .await?;
        match frame {
            BridgeFrame::Publish { msg: Some(msg), .. } => {
                let data = msg.get("data")?.as_str()?;
                serde_json::from_str(data).ok()
            }
            _ => None,
        }
    }

    /// Frames already received but not yet consumed.
    pub fn drain_frames(&mut self) -> Vec<BridgeFrame> {
        let mut frames = Vec::new();
        while let Some(text) = self.hub.try_recv_text() {
            if let Ok(frame) = BridgeFrame::from_text(&text) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Publish `msg` on `topic` to the connected client.
    pub fn publish(&self, topic: &str, msg: Value) -> bool {
        let frame = BridgeFrame::Publish {
            topic: topic.to_owned(),
            msg: Some(msg),
        };
        match frame.to_text() {
            Ok(text) => self.hub.send(Message::Text(text.into())),
            Err(_) => false,
        }
    }

    /// Send an arbitrary text frame to the connected client.
    pub fn send_text(&self, text: &str) -> bool {
        self.hub.send(Message::Text(text.to_owned().into()))
    }

    /// Close the connected client's socket from the server side.
    pub fn close_client(&self) -> bool {
        self.hub.send(Message::Close(None))
    }
}
