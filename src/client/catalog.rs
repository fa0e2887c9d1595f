use serde::Serialize;

use crate::chat::ChatMessage;
use crate::client::store::{unread_in, SessionStore};
use crate::error::StoreError;
use crate::session_key::{derive_key, is_private, peer_of, GROUP_KEY};

pub const GROUP_NAME: &str = "Everyone";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Group,
    Private,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub key: String,
    pub session_type: SessionType,
    pub name: String,
    pub unread: usize,
    pub last_message: Option<ChatMessage>,
}

/// Read-only view over the store listing conversations for one identity.
pub struct SessionCatalog<'a> {
    store: &'a SessionStore,
    local: &'a str,
}

impl<'a> SessionCatalog<'a> {
    pub fn new(store: &'a SessionStore, local: &'a str) -> Self {
        SessionCatalog { store, local }
    }

    async fn summary(&self, key: String, session_type: SessionType, name: String) -> SessionSummary {
        let log = self.store.load(&key).await;
        SessionSummary {
            unread: unread_in(&log, self.local),
            key,
            session_type,
            name,
            last_message: log.last().cloned(),
        }
    }

    async fn group(&self) -> SessionSummary {
        self.summary(GROUP_KEY.to_string(), SessionType::Group, GROUP_NAME.to_string())
            .await
    }

    /// Every stored conversation the local identity takes part in, most
    /// recently active first. The group session is always present.
    pub async fn sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut sessions = vec![self.group().await];
        for key in self.store.session_keys().await? {
            if !is_private(&key) {
                continue;
            }
            let Some(peer) = peer_of(&key, self.local) else {
                continue;
            };
            let summary = self.summary(key, SessionType::Private, peer).await;
            if summary.last_message.is_some() {
                sessions.push(summary);
            }
        }

        sessions.sort_by(|a, b| {
            let a = a.last_message.as_ref().map(|m| m.timestamp);
            let b = b.last_message.as_ref().map(|m| m.timestamp);
            b.cmp(&a)
        });
        Ok(sessions)
    }

    /// What the session list shows: the group plus one private session per
    /// online peer. History of offline peers stays stored but unlisted.
    pub async fn visible(&self, online: &[String]) -> Vec<SessionSummary> {
        let mut sessions = vec![self.group().await];
        for peer in online.iter().filter(|peer| peer.as_str() != self.local) {
            let key = derive_key(self.local, peer);
            sessions.push(self.summary(key, SessionType::Private, peer.clone()).await);
        }
        sessions
    }

    pub async fn total_unread(&self) -> Result<usize, StoreError> {
        Ok(self.sessions().await?.iter().map(|s| s.unread).sum())
    }
}
