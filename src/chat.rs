use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Emoji,
    Image,
    System,
}

/// A message as stored in a client's session log.
///
/// Everything except `read` is fixed at creation. `read` belongs to the
/// receiving client and never goes back over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl ChatMessage {
    fn new(from: Option<&str>, to: Option<&str>, kind: MessageKind) -> Self {
        ChatMessage {
            from: from.map(str::to_string),
            to: to.map(str::to_string),
            kind,
            content: None,
            image_data: None,
            filename: None,
            timestamp: Utc::now(),
            read: false,
        }
    }

    pub fn text(from: &str, to: &str, content: &str) -> Self {
        ChatMessage {
            content: Some(content.to_string()),
            ..Self::new(Some(from), Some(to), MessageKind::Text)
        }
    }

    pub fn emoji(from: &str, to: &str, emoji: &str) -> Self {
        ChatMessage {
            content: Some(emoji.to_string()),
            ..Self::new(Some(from), Some(to), MessageKind::Emoji)
        }
    }

    pub fn image(from: &str, to: &str, image_data: &str, filename: &str) -> Self {
        ChatMessage {
            image_data: Some(image_data.to_string()),
            filename: Some(filename.to_string()),
            ..Self::new(Some(from), Some(to), MessageKind::Image)
        }
    }

    pub fn system(text: &str) -> Self {
        ChatMessage {
            content: Some(text.to_string()),
            ..Self::new(None, None, MessageKind::System)
        }
    }

    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Duplicate predicate used to absorb re-delivery: same sender, same
    /// payload, same kind. Timestamps are deliberately ignored so the local
    /// optimistic copy and the later server echo collapse into one entry.
    pub fn is_duplicate_of(&self, other: &ChatMessage) -> bool {
        self.from == other.from
            && self.content == other.content
            && self.image_data == other.image_data
            && self.kind == other.kind
    }

    pub fn is_from(&self, identity: &str) -> bool {
        self.from.as_deref() == Some(identity)
    }

    /// Counts toward `local`'s unread badge. Own messages never do.
    pub fn is_unread_for(&self, local: &str) -> bool {
        !self.read && !self.is_from(local)
    }

    /// Short single-line summary for session listings.
    pub fn preview(&self) -> String {
        match self.kind {
            MessageKind::Image => {
                format!("[image] {}", self.filename.as_deref().unwrap_or("image"))
            }
            _ => {
                let content = self.content.as_deref().unwrap_or_default();
                let mut preview: String = content.chars().take(30).collect();
                if content.chars().count() > 30 {
                    preview.push_str("...");
                }
                preview
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn duplicate_ignores_timestamp() {
        let first = ChatMessage::text("alice", "bob", "hi");
        let echo = first.clone().at(first.timestamp + Duration::seconds(2));
        assert!(echo.is_duplicate_of(&first));
    }

    #[test]
    fn different_sender_or_kind_is_not_duplicate() {
        let alice = ChatMessage::text("alice", "all", "hi");
        let bob = ChatMessage::text("bob", "all", "hi");
        let emoji = ChatMessage::emoji("alice", "all", "hi");
        assert!(!alice.is_duplicate_of(&bob));
        assert!(!alice.is_duplicate_of(&emoji));
    }

    #[test]
    fn stored_form_uses_camel_case_and_skips_empty_fields() {
        let message = ChatMessage::image("alice", "bob", "data:image/png;base64,AA==", "a.png");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["imageData"], "data:image/png;base64,AA==");
        assert_eq!(json["kind"], "image");
        assert!(json.get("content").is_none());
    }

    #[test]
    fn own_messages_never_count_as_unread() {
        let mut incoming = ChatMessage::text("alice", "bob", "hi");
        assert!(incoming.is_unread_for("bob"));
        assert!(!incoming.is_unread_for("alice"));
        incoming.read = true;
        assert!(!incoming.is_unread_for("bob"));
        assert!(ChatMessage::system("carol is online").is_unread_for("bob"));
    }

    #[test]
    fn preview_truncates_long_text() {
        let long = "x".repeat(40);
        let message = ChatMessage::text("alice", "bob", &long);
        assert_eq!(message.preview(), format!("{}...", "x".repeat(30)));
        let image = ChatMessage::image("alice", "bob", "data:,", "cat.png");
        assert_eq!(image.preview(), "[image] cat.png");
    }
}
