use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::{ChatMessage, MessageKind};
use crate::error::ProtocolError;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TextKind {
    #[default]
    Text,
    Emoji,
}

impl From<TextKind> for MessageKind {
    fn from(kind: TextKind) -> Self {
        match kind {
            TextKind::Text => MessageKind::Text,
            TextKind::Emoji => MessageKind::Emoji,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "login")]
    Login {
        username: String,
    },
    #[serde(rename = "message", rename_all = "camelCase")]
    Message {
        to: String,
        content: String,
        #[serde(default)]
        message_type: TextKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    #[serde(rename = "image", rename_all = "camelCase")]
    Image {
        to: String,
        image_data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    #[serde(rename = "logout")]
    Logout,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wire form of a locally composed message. System messages never leave
    /// the client.
    pub fn outbound(message: &ChatMessage) -> Option<Self> {
        let to = message.to.clone()?;
        match message.kind {
            MessageKind::Text | MessageKind::Emoji => Some(ClientMessage::Message {
                to,
                content: message.content.clone()?,
                message_type: if message.kind == MessageKind::Emoji {
                    TextKind::Emoji
                } else {
                    TextKind::Text
                },
                timestamp: Some(message.timestamp),
            }),
            MessageKind::Image => Some(ClientMessage::Image {
                to,
                image_data: message.image_data.clone()?,
                filename: message.filename.clone(),
                timestamp: Some(message.timestamp),
            }),
            MessageKind::System => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "login", rename_all = "camelCase")]
    Login {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        online_users: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "system")]
    System {
        message: String,
    },
    #[serde(rename = "user_online", rename_all = "camelCase")]
    UserOnline {
        username: String,
        online_users: Vec<String>,
    },
    #[serde(rename = "user_offline", rename_all = "camelCase")]
    UserOffline {
        username: String,
        online_users: Vec<String>,
    },
    #[serde(rename = "message", rename_all = "camelCase")]
    Message {
        from: String,
        to: String,
        content: String,
        #[serde(default)]
        message_type: TextKind,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "image", rename_all = "camelCase")]
    Image {
        from: String,
        to: String,
        image_data: String,
        filename: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
}

impl ServerMessage {
    pub fn login_accepted(username: &str, online_users: Vec<String>) -> Self {
        ServerMessage::Login {
            success: true,
            username: Some(username.to_string()),
            online_users: Some(online_users),
            message: None,
        }
    }

    pub fn login_rejected(reason: impl Into<String>) -> Self {
        ServerMessage::Login {
            success: false,
            username: None,
            online_users: None,
            message: Some(reason.into()),
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Chat payload carried by a `message` or `image` event.
    pub fn to_chat(&self) -> Option<ChatMessage> {
        match self {
            ServerMessage::Message {
                from,
                to,
                content,
                message_type,
                timestamp,
            } => {
                let message = match message_type {
                    TextKind::Text => ChatMessage::text(from, to, content),
                    TextKind::Emoji => ChatMessage::emoji(from, to, content),
                };
                Some(message.at(*timestamp))
            }
            ServerMessage::Image {
                from,
                to,
                image_data,
                filename,
                timestamp,
            } => Some(ChatMessage::image(from, to, image_data, filename).at(*timestamp)),
            _ => None,
        }
    }
}
