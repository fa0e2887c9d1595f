//! Portable export of one session log: a format tag plus every message
//! individually encoded, so a damaged entry does not spoil the rest.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::chat::ChatMessage;
use crate::error::BundleError;

pub const BUNDLE_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: String,
    pub export_date: DateTime<Utc>,
    pub messages: Vec<String>,
}

impl ExportBundle {
    pub fn new(messages: &[ChatMessage]) -> Result<Self, BundleError> {
        let messages = messages
            .iter()
            .map(|message| -> Result<String, BundleError> {
                Ok(BASE64.encode(serde_json::to_vec(message)?))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ExportBundle {
            version: BUNDLE_VERSION.to_string(),
            export_date: Utc::now(),
            messages,
        })
    }

    pub fn to_json(&self) -> Result<String, BundleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses an exported file, refusing anything not tagged with the
    /// supported format.
    pub fn parse(text: &str) -> Result<Self, BundleError> {
        let bundle: ExportBundle = serde_json::from_str(text)?;
        if bundle.version != BUNDLE_VERSION {
            return Err(BundleError::UnsupportedVersion(bundle.version));
        }
        Ok(bundle)
    }

    /// Decodes the entries, skipping any that do not decode.
    pub fn decode_messages(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter_map(|entry| {
                let decoded = BASE64
                    .decode(entry)
                    .ok()
                    .and_then(|bytes| serde_json::from_slice::<ChatMessage>(&bytes).ok());
                if decoded.is_none() {
                    warn!("Skipping undecodable entry in export bundle");
                }
                decoded
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_is_self_describing() {
        let bundle = ExportBundle::new(&[ChatMessage::text("alice", "all", "hi")]).unwrap();
        let json: serde_json::Value = serde_json::from_str(&bundle.to_json().unwrap()).unwrap();
        assert_eq!(json["version"], BUNDLE_VERSION);
        assert!(json["exportDate"].is_string());
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn same_content_from_different_senders_survives() {
        let messages = vec![
            ChatMessage::text("alice", "all", "same"),
            ChatMessage::text("bob", "all", "same"),
        ];
        let text = ExportBundle::new(&messages).unwrap().to_json().unwrap();
        let decoded = ExportBundle::parse(&text).unwrap().decode_messages();
        assert_eq!(decoded, messages);
    }

    #[test]
    fn wrong_version_is_refused() {
        let text = r#"{"version":"2.0","exportDate":"2024-01-01T00:00:00Z","messages":[]}"#;
        assert!(matches!(
            ExportBundle::parse(text),
            Err(BundleError::UnsupportedVersion(v)) if v == "2.0"
        ));
        assert!(matches!(ExportBundle::parse("[]"), Err(BundleError::Malformed(_))));
    }

    #[test]
    fn damaged_entries_are_skipped() {
        let mut bundle = ExportBundle::new(&[ChatMessage::text("alice", "all", "ok")]).unwrap();
        bundle.messages.push("%%%".to_string());
        bundle.messages.push(BASE64.encode(b"{\"nope\":1}"));
        assert_eq!(bundle.decode_messages().len(), 1);
    }
}
