// mock_signaling_server: A mock camera signaling endpoint.
//
// Records the offers and candidates a camera channel sends and lets the test
// answer them.

use std::net::SocketAddr;
use std::time::Duration;

use rover_protocol::{IceCandidate, SignalingMessage};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::socket_hub::SocketHub;

pub struct MockSignalingServer {
    hub: SocketHub,
}

impl MockSignalingServer {
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

    pub fn connection_count(&self) -> usize {
        self.hub.accepted_count()
    }

    pub fn active_connections(&self) -> usize {
        self.hub.active_count()
    }

    pub async fn wait_for_connections(&mut self, n: usize) {
        self.hub.wait_for_accepted(n).await;
    }

    pub async fn wait_for_all_closed(&mut self) {
        self.hub.wait_for_active(0).await;
    }

    /// Next signaling message from the client, or `None` if nothing arrives
    /// within `within`.
    pub async fn next_message(&mut self, within: Duration) -> Option<SignalingMessage> {
        tokio::time::timeout(within, async {
            loop {
                let text = self.hub.recv_text().await?;
                if let Ok(msg) = SignalingMessage::from_text(&text) {
                    return Some(msg);
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    /// Wait for the client's offer and return its SDP.
    pub async fn expect_offer(&mut self, within: Duration) -> Option<String> {
        match self.next_message(within).await? {
            SignalingMessage::Offer { sdp } => Some(sdp),
            _ => None,
        }
    }

    pub fn send(&self, msg: &SignalingMessage) -> bool {
        match msg.to_text() {
            Ok(text) => self.hub.send(Message::Text(text.into())),
            Err(_) => false,
        }
    }

    pub fn send_answer(&self, sdp: &str) -> bool {
        self.send(&SignalingMessage::Answer {
            sdp: sdp.to_owned(),
        })
    }

    pub fn send_ice_candidate(&self, candidate: &str) -> bool {
        self.send(&SignalingMessage::IceCandidate {
            candidate: IceCandidate {
                candidate: candidate.to_owned(),
                sdp_mid: Some("0".to_owned()),
                sdp_mline_index: Some(0),
            },
        })
    }

    pub fn close_client(&self) -> bool {
        self.hub.send(Message::Close(None))
    }
}
