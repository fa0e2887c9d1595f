//! Deterministic conversation addressing shared by server logs and clients.
//!
//! A private key is built from the sorted pair of identities so both
//! participants file every message of their conversation under the same key,
//! whichever side sent it.

use crate::chat::ChatMessage;

/// Recipient value meaning "everyone online".
pub const BROADCAST: &str = "all";

/// Key of the single group conversation.
pub const GROUP_KEY: &str = "group_all";

const PRIVATE_PREFIX: &str = "private_";
const SEPARATOR: char = '_';

pub fn derive_key(participant: &str, other: &str) -> String {
    if other == BROADCAST {
        return GROUP_KEY.to_string();
    }

    let (first, second) = if participant <= other {
        (participant, other)
    } else {
        (other, participant)
    };
    format!("{PRIVATE_PREFIX}{first}{SEPARATOR}{second}")
}

/// Resolves the session a message belongs to from the point of view of
/// `local`. Messages sent by `local` are keyed by their recipient, messages
/// received by `local` by their sender.
pub fn derive_key_from_message(message: &ChatMessage, local: &str) -> String {
    let to = message.to.as_deref().unwrap_or(BROADCAST);
    if to == BROADCAST {
        return GROUP_KEY.to_string();
    }

    let other = match message.from.as_deref() {
        Some(from) if from == local => to,
        Some(from) => from,
        None => to,
    };
    derive_key(local, other)
}

pub fn is_private(key: &str) -> bool {
    key.starts_with(PRIVATE_PREFIX)
}

/// Recovers the other participant of a private key, or `None` when `local`
/// does not take part in it.
pub fn peer_of(key: &str, local: &str) -> Option<String> {
    let pair = key.strip_prefix(PRIVATE_PREFIX)?;

    if let Some(rest) = pair.strip_prefix(local) {
        if let Some(peer) = rest.strip_prefix(SEPARATOR) {
            if derive_key(local, peer) == key {
                return Some(peer.to_string());
            }
        }
    }
    if let Some(rest) = pair.strip_suffix(local) {
        if let Some(peer) = rest.strip_suffix(SEPARATOR) {
            if derive_key(local, peer) == key {
                return Some(peer.to_string());
            }
        }
    }
    None
}
