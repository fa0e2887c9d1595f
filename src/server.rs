use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use warp::ws::{Message, WebSocket};

use crate::error::ProtocolError;
use crate::messages::{ClientMessage, ServerMessage};
use crate::presence::PresenceNotifier;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::router::{deliver, Router};
use crate::session_key::BROADCAST;

pub const WELCOME: &str = "connected, please log in";

#[derive(Clone)]
pub struct Server {
    registry: ConnectionRegistry,
    router: Router,
    presence: PresenceNotifier,
}

impl Default for Server {
    fn default() -> Self {
        Self::new(ConnectionRegistry::new())
    }
}

impl Server {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Server {
            router: Router::new(registry.clone()),
            presence: PresenceNotifier::new(registry.clone()),
            registry,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn spawn_heartbeat(&self, interval: Duration, timeout: Option<Duration>) -> JoinHandle<()> {
        self.presence.spawn_heartbeat(interval, timeout)
    }

    /// Registers a freshly accepted transport and greets it. Frames for the
    /// connection arrive on the returned receiver.
    pub async fn open(&self, addr: Option<SocketAddr>) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.registry.register(tx.clone(), addr).await;
        match addr {
            Some(addr) => info!("New connection #{} ({})", id, addr),
            None => info!("New connection #{}", id),
        }

        let welcome = ServerMessage::System {
            message: WELCOME.to_string(),
        };
        if let Ok(frame) = serde_json::to_string(&welcome) {
            deliver(&tx, &frame);
        }
        (id, rx)
    }

    /// Handles one inbound text frame. Malformed input is logged and
    /// dropped; the connection stays open.
    pub async fn handle_text(&self, id: &str, text: &str) {
        self.registry.touch(id).await;
        match ClientMessage::decode(text) {
            Ok(message) => self.handle_client_message(id, message).await,
            Err(e) => warn!("Rejected payload from #{}: {}", id, e),
        }
    }

    pub async fn handle_client_message(&self, id: &str, message: ClientMessage) {
        match message {
            ClientMessage::Login { username } => {
                let username = username.trim();
                if username.is_empty() {
                    self.reply(id, &ServerMessage::login_rejected("username must not be empty"))
                        .await;
                    return;
                }
                if username == BROADCAST {
                    warn!("Login as reserved name {:?} refused on #{}", username, id);
                    self.reply(id, &ServerMessage::login_rejected(format!("{BROADCAST} is a reserved name")))
                        .await;
                    return;
                }
                // The failure reply is already sent; nothing else to do.
                let _ = self.presence.login(id, username).await;
            }
            ClientMessage::Message { .. } | ClientMessage::Image { .. } => {
                self.router.route(id, message).await;
            }
            ClientMessage::Logout => {
                self.presence.logout(id).await;
            }
            ClientMessage::Ping => {
                self.reply(id, &ServerMessage::Pong).await;
            }
            ClientMessage::Pong => {}
        }
    }

    /// Transport closed. Safe to call more than once.
    pub async fn close(&self, id: &str) {
        let described = self.registry.describe(id).await;
        match self.presence.disconnect(id).await {
            Some(username) => info!("Connection #{} closed (user: {})", id, username),
            None => {
                if let Some((_, connected_at)) = described {
                    info!("Connection #{} closed (not logged in, open since {})", id, connected_at);
                }
            }
        }
        debug!("{} connections open", self.registry.len().await);
    }

    pub async fn handle_connection(&self, ws: WebSocket, addr: Option<SocketAddr>) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (id, mut rx) = self.open(addr).await;

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = ws_tx.send(Message::text(frame)).await {
                    error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(msg) => {
                    if msg.is_close() {
                        break;
                    }
                    match text_of(&msg) {
                        Ok(Some(text)) => self.handle_text(&id, text).await,
                        Ok(None) => self.registry.touch(&id).await,
                        Err(e) => warn!("Rejected frame from #{}: {}", id, e),
                    }
                }
                Err(e) => {
                    error!("WebSocket error on #{}: {}", id, e);
                    break;
                }
            }
        }

        self.close(&id).await;
    }

    async fn reply(&self, id: &str, message: &ServerMessage) {
        if let (Some(tx), Ok(frame)) = (self.registry.outbound(id).await, serde_json::to_string(message)) {
            deliver(&tx, &frame);
        }
    }
}

/// Text payload of a frame; control frames carry none.
fn text_of(msg: &Message) -> Result<Option<&str>, ProtocolError> {
    if msg.is_text() {
        return Ok(msg.to_str().ok());
    }
    if msg.is_binary() {
        return Err(ProtocolError::Binary);
    }
    Ok(None)
}
