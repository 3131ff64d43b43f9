// socket_hub: Accept loop shared by the mock bridge and signaling servers.
//
// Accepts any number of WebSocket clients on 127.0.0.1:<random>. Every text
// frame a client sends is forwarded to the test in arrival order; the test
// can push frames to (or close) the most recently accepted client.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;

type ClientTx = Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>;

pub(crate) struct SocketHub {
    addr: SocketAddr,
    inbound: mpsc::UnboundedReceiver<String>,
    current: ClientTx,
    accepted: watch::Receiver<usize>,
    active: watch::Receiver<usize>,
    _task: tokio::task::JoinHandle<()>,
}

impl SocketHub {
    pub(crate) async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let current: ClientTx = Arc::new(Mutex::new(None));
        let (accepted_tx, accepted) = watch::channel(0usize);
        let (active_tx, active) = watch::channel(0usize);

        let task = tokio::spawn(accept_loop(
            listener,
            inbound_tx,
            current.clone(),
            accepted_tx,
            active_tx,
        ));

        Ok(Self {
            addr,
            inbound,
            current,
            accepted,
            active,
            _task: task,
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) async fn recv_text(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    pub(crate) fn try_recv_text(&mut self) -> Option<String> {
        self.inbound.try_recv().ok()
    }

    /// Send to the most recently accepted client. Returns false when no
    /// client is connected.
    pub(crate) fn send(&self, msg: Message) -> bool {
        let guard = self.current.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    pub(crate) fn accepted_count(&self) -> usize {
        *self.accepted.borrow()
    }

    pub(crate) fn active_count(&self) -> usize {
        *self.active.borrow()
    }

    pub(crate) async fn wait_for_accepted(&mut self, n: usize) {
        let _ = self.accepted.wait_for(|count| *count >= n).await;
    }

    pub(crate) async fn wait_for_active(&mut self, n: usize) {
        let _ = self.active.wait_for(|count| *count == n).await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    inbound: mpsc::UnboundedSender<String>,
    current: ClientTx,
    accepted: watch::Sender<usize>,
    active: watch::Sender<usize>,
) {
    let accepted = Arc::new(accepted);
    let active = Arc::new(active);
    while let Ok((stream, _peer)) = listener.accept().await {
        let inbound = inbound.clone();
        let current = current.clone();
        let accepted = accepted.clone();
        let active = active.clone();
        tokio::spawn(async move {
            // Client drops are expected in tests.
            let _ = handle_connection(stream, inbound, current, &accepted, &active).await;
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    inbound: mpsc::UnboundedSender<String>,
    current: ClientTx,
    accepted: &watch::Sender<usize>,
    active: &watch::Sender<usize>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    *current.lock().unwrap() = Some(out_tx.clone());
    // Counted only once the client can be addressed.
    active.send_modify(|count| *count += 1);
    accepted.send_modify(|count| *count += 1);

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if write.send(msg).await.is_err() || is_close {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = read.next().await {
        match msg {
            Message::Text(text) => {
                let _ = inbound.send(text.to_string());
            }
            Message::Close(_) => break,
            _ => continue,
        }
    }

    {
        let mut guard = current.lock().unwrap();
        if guard.as_ref().is_some_and(|tx| tx.same_channel(&out_tx)) {
            *guard = None;
        }
    }
    writer.abort();
    active.send_modify(|count| *count = count.saturating_sub(1));
    Ok(())
}
