use chrono::Utc;
use log::{debug, info};

use crate::messages::{ClientMessage, ServerMessage};
use crate::registry::{ConnectionRegistry, Outbound};
use crate::session_key::{derive_key, BROADCAST};

const DEFAULT_FILENAME: &str = "image";

/// What happened to a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delivery {
    /// Connections other than the sender that were handed the frame.
    pub delivered: usize,
    /// Whether the frame went back to the sender's own connection.
    pub echoed: bool,
}

#[derive(Clone)]
pub struct Router {
    registry: ConnectionRegistry,
}

impl Router {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Router { registry }
    }

    /// Fans a chat payload out. Broadcasts reach every other connection and
    /// are never looped back; private messages reach the recipient when
    /// online and are always echoed to the sender. Returns `None` when the
    /// sender is not logged in or the payload is not routable.
    pub async fn route(&self, sender: &str, message: ClientMessage) -> Option<Delivery> {
        let Some(from) = self.registry.identity_of(sender).await else {
            debug!("Dropping {} from unauthenticated connection", kind_name(&message));
            return None;
        };

        let (to, outgoing, summary) = match message {
            ClientMessage::Message {
                to,
                content,
                message_type,
                timestamp,
            } => {
                let summary: String = content.chars().take(30).collect();
                let outgoing = ServerMessage::Message {
                    from: from.clone(),
                    to: to.clone(),
                    content,
                    message_type,
                    timestamp: timestamp.unwrap_or_else(Utc::now),
                };
                (to, outgoing, summary)
            }
            ClientMessage::Image {
                to,
                image_data,
                filename,
                timestamp,
            } => {
                let filename = filename.unwrap_or_else(|| DEFAULT_FILENAME.to_string());
                let summary = format!("[image] {filename}");
                let outgoing = ServerMessage::Image {
                    from: from.clone(),
                    to: to.clone(),
                    image_data,
                    filename,
                    timestamp: timestamp.unwrap_or_else(Utc::now),
                };
                (to, outgoing, summary)
            }
            _ => return None,
        };

        if to.is_empty() {
            debug!("Dropping message from {from} without recipient");
            return None;
        }

        let Ok(frame) = serde_json::to_string(&outgoing) else {
            return None;
        };
        info!("{} -> {} [{}]: {}", from, to, derive_key(&from, &to), summary);

        if to == BROADCAST {
            let mut delivery = Delivery::default();
            for (_, tx) in self.registry.outbounds_except(Some(sender)).await {
                if deliver(&tx, &frame) {
                    delivery.delivered += 1;
                }
            }
            return Some(delivery);
        }

        let mut delivery = Delivery::default();
        match self.registry.lookup(&to).await {
            Some((target, tx)) if target != sender => {
                if deliver(&tx, &frame) {
                    delivery.delivered = 1;
                }
            }
            Some(_) => {}
            None => debug!("{to} is offline, message from {from} dropped"),
        }
        if let Some(tx) = self.registry.outbound(sender).await {
            delivery.echoed = deliver(&tx, &frame);
        }
        Some(delivery)
    }
}

/// Queues a frame without waiting on the receiver. A closed connection is
/// skipped so one dead peer never stalls the rest of a fan-out.
pub fn deliver(tx: &Outbound, frame: &str) -> bool {
    tx.send(frame.to_owned()).is_ok()
}

fn kind_name(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::Login { .. } => "login",
        ClientMessage::Message { .. } => "message",
        ClientMessage::Image { .. } => "image",
        ClientMessage::Logout => "logout",
        ClientMessage::Ping => "ping",
        ClientMessage::Pong => "pong",
    }
}
