//! WebSocket signal server implementation

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info};

use switchboard_core::{CloseCode, Config, ConfigError};

use crate::router::Relay;
use crate::sweeper::spawn_sweeper;
use crate::transport::{ChannelTransport, Outbound};

/// Signal server: accepts connections and feeds them to the [`Relay`]
pub struct SignalServer {
    relay: Arc<Relay>,
}

impl SignalServer {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            relay: Arc::new(Relay::new(config)?),
        })
    }

    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Start the signal server
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        info!("Signal server listening on {}", listener.local_addr()?);

        let sweeper = spawn_sweeper(self.relay.clone());
        let result = self.accept_loop(&listener).await;
        sweeper.abort();
        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<(), std::io::Error> {
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let relay = self.relay.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, relay).await {
                    debug!("Connection error from {}: {:?}", peer_addr, e);
                }
            });
        }
    }
}

impl Default for SignalServer {
    fn default() -> Self {
        Self {
            relay: Arc::new(Relay::default()),
        }
    }
}

/// Plain HTTP endpoints served next to the WebSocket upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HttpRoute {
    Health,
    Stats,
}

/// Route a request by its first line; anything else is a WebSocket upgrade
fn http_route(head: &[u8]) -> Option<HttpRoute> {
    let head = String::from_utf8_lossy(head);
    let mut parts = head.lines().next()?.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    match parts.next()? {
        "/health" => Some(HttpRoute::Health),
        "/stats" => Some(HttpRoute::Stats),
        _ => None,
    }
}

/// Handle a single connection (HTTP or WebSocket)
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    relay: Arc<Relay>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Peek at the request line to catch health checks
    let mut peek_buf = [0u8; 32];
    let n = stream.peek(&mut peek_buf).await?;

    if let Some(route) = http_route(&peek_buf[..n]) {
        return handle_http_request(&mut stream, route, &relay).await;
    }

    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (transport, mut outbound) = ChannelTransport::channel();
    let peer_id = relay.connect(Arc::new(transport));
    debug!("New connection from {} as peer {}", peer_addr, peer_id);

    let result = loop {
        tokio::select! {
            inbound = ws_receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let _ = relay.on_message(peer_id, &text);
                }
                Some(Ok(Message::Binary(data))) => {
                    let _ = relay.on_message(peer_id, &String::from_utf8_lossy(&data));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Peer {} sent close: {:?}", peer_id, frame);
                    break Ok(());
                }
                // Pings are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            },
            command = outbound.recv() => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = ws_sender.send(Message::Text(text)).await {
                        break Err(e);
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let _ = ws_sender.send(close_message(code, reason)).await;
                    break Ok(());
                }
                None => break Ok(()),
            },
        }
    };

    match result {
        Ok(()) => relay.on_close(peer_id),
        Err(e) => {
            relay.on_error(peer_id, &e.to_string());
            send_queued_close(&mut ws_sender, &mut outbound).await;
        }
    }

    debug!("Connection closed: peer {}", peer_id);
    Ok(())
}

fn close_message(code: CloseCode, reason: String) -> Message {
    Message::Close(Some(CloseFrame {
        code: WsCloseCode::from(code.as_u16()),
        reason: reason.into(),
    }))
}

/// Deliver a close the relay queued after the loop ended, skipping unsent text
async fn send_queued_close<S>(sender: &mut S, outbound: &mut UnboundedReceiver<Outbound>)
where
    S: Sink<Message> + Unpin,
{
    while let Ok(command) = outbound.try_recv() {
        if let Outbound::Close { code, reason } = command {
            let _ = sender.send(close_message(code, reason)).await;
            return;
        }
    }
}

/// Handle an HTTP request (for health checks)
async fn handle_http_request(
    stream: &mut TcpStream,
    route: HttpRoute,
    relay: &Relay,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Drain the request
    let mut buf = vec![0u8; 1024];
    let _ = stream.read(&mut buf).await?;

    let lobbies = relay.lobby_count();
    let peers = relay.peer_count();
    let body = match route {
        HttpRoute::Health => serde_json::json!({
            "status": "healthy",
            "lobbies": lobbies,
            "peers": peers,
        }),
        HttpRoute::Stats => serde_json::json!({
            "lobbies": lobbies,
            "peers": peers,
        }),
    }
    .to_string();

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    Ok(())
}
