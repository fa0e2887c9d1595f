//! Client-side handling of server events and local sends.
//!
//! Inbound events and local actions are applied one at a time by whoever
//! owns the [`Dispatcher`], so a `switch_to` always sees every message
//! appended before it.

use std::sync::Arc;

use log::debug;

use crate::chat::ChatMessage;
use crate::client::catalog::{SessionCatalog, SessionSummary, SessionType, GROUP_NAME};
use crate::client::store::SessionStore;
use crate::error::StoreError;
use crate::messages::{ClientMessage, ServerMessage};
use crate::session_key::{derive_key, derive_key_from_message, BROADCAST, GROUP_KEY};

/// Whatever shows conversations to the user.
pub trait Renderer: Send {
    /// A new message belongs to the session currently on screen.
    fn render(&mut self, session: &str, message: &ChatMessage);
    /// The user switched conversations; `log` is its full history.
    fn show_session(&mut self, session: &ActiveSession, log: &[ChatMessage]);
    /// Session list with unread badges changed.
    fn update_catalog(&mut self, sessions: &[SessionSummary]);
    /// Transient notice, e.g. login success or a failed import.
    fn notify(&mut self, text: &str);
    /// Drop the pre-login placeholder notice, if still shown.
    fn clear_placeholder(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub key: String,
    pub name: String,
    pub session_type: SessionType,
}

impl ActiveSession {
    pub fn group() -> Self {
        ActiveSession {
            key: GROUP_KEY.to_string(),
            name: GROUP_NAME.to_string(),
            session_type: SessionType::Group,
        }
    }

    pub fn private(local: &str, peer: &str) -> Self {
        ActiveSession {
            key: derive_key(local, peer),
            name: peer.to_string(),
            session_type: SessionType::Private,
        }
    }

    /// Recipient for messages composed in this session.
    pub fn target(&self) -> &str {
        match self.session_type {
            SessionType::Group => BROADCAST,
            SessionType::Private => &self.name,
        }
    }
}

pub struct Dispatcher<R: Renderer> {
    identity: String,
    store: Arc<SessionStore>,
    renderer: R,
    online: Vec<String>,
    active: ActiveSession,
    logged_in: bool,
}

impl<R: Renderer> Dispatcher<R> {
    pub fn new(identity: &str, store: Arc<SessionStore>, renderer: R) -> Self {
        Dispatcher {
            identity: identity.to_string(),
            store,
            renderer,
            online: Vec::new(),
            active: ActiveSession::group(),
            logged_in: false,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn online(&self) -> &[String] {
        &self.online
    }

    pub fn active(&self) -> &ActiveSession {
        &self.active
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn login_request(&self) -> ClientMessage {
        ClientMessage::Login {
            username: self.identity.clone(),
        }
    }

    /// Transport dropped; the next connection starts a fresh login.
    pub fn on_disconnected(&mut self) {
        self.logged_in = false;
    }

    pub async fn unread(&self, key: &str) -> usize {
        self.store.unread_count(key, &self.identity).await
    }

    /// Applies one server event. Returns a reply to transmit, if any.
    pub async fn handle(&mut self, event: ServerMessage) -> Result<Option<ClientMessage>, StoreError> {
        match event {
            ServerMessage::Login {
                success: true,
                online_users,
                ..
            } => {
                self.logged_in = true;
                self.set_online(online_users.unwrap_or_default());
                self.renderer.clear_placeholder();
                let notice = format!("Logged in as {}", self.identity);
                self.renderer.notify(&notice);
                self.refresh_catalog().await;
            }
            ServerMessage::Login { message, .. } => {
                let reason = message.unwrap_or_else(|| "login failed".to_string());
                self.renderer.notify(&format!("Login rejected: {reason}"));
            }
            ServerMessage::System { message } => {
                self.file_system_message(&message).await?;
            }
            ServerMessage::UserOnline {
                username,
                online_users,
            } => {
                self.set_online(online_users);
                self.file_system_message(&format!("{username} is online")).await?;
                self.refresh_catalog().await;
            }
            ServerMessage::UserOffline {
                username,
                online_users,
            } => {
                self.set_online(online_users);
                self.file_system_message(&format!("{username} went offline"))
                    .await?;
                self.refresh_catalog().await;
            }
            event @ (ServerMessage::Message { .. } | ServerMessage::Image { .. }) => {
                if let Some(message) = event.to_chat() {
                    self.file_chat_message(message).await?;
                }
            }
            ServerMessage::Ping => return Ok(Some(ClientMessage::Pong)),
            ServerMessage::Pong => {}
        }
        Ok(None)
    }

    /// Optimistic send: files and shows the local copy right away and hands
    /// back the wire message. The later server echo is absorbed as a
    /// duplicate.
    pub async fn compose(&mut self, message: ChatMessage) -> Result<Option<ClientMessage>, StoreError> {
        let Some(outbound) = ClientMessage::outbound(&message) else {
            return Ok(None);
        };
        let key = derive_key_from_message(&message, &self.identity);
        if self.store.append(&key, message.clone(), &self.identity).await? && key == self.active.key {
            self.renderer.render(&key, &message);
        }
        self.refresh_catalog().await;
        Ok(Some(outbound))
    }

    pub async fn send_text(&mut self, text: &str) -> Result<Option<ClientMessage>, StoreError> {
        let message = ChatMessage::text(&self.identity, self.active.target(), text);
        self.compose(message).await
    }

    pub async fn send_emoji(&mut self, emoji: &str) -> Result<Option<ClientMessage>, StoreError> {
        let message = ChatMessage::emoji(&self.identity, self.active.target(), emoji);
        self.compose(message).await
    }

    pub async fn send_image(
        &mut self,
        image_data: &str,
        filename: &str,
    ) -> Result<Option<ClientMessage>, StoreError> {
        let message = ChatMessage::image(&self.identity, self.active.target(), image_data, filename);
        self.compose(message).await
    }

    pub async fn switch_to(&mut self, session: ActiveSession) -> Result<(), StoreError> {
        self.active = session;
        self.store.mark_read(&self.active.key, &self.identity).await?;
        let log = self.store.load(&self.active.key).await;
        self.renderer.show_session(&self.active, &log);
        self.refresh_catalog().await;
        Ok(())
    }

    pub async fn open_group(&mut self) -> Result<(), StoreError> {
        self.switch_to(ActiveSession::group()).await
    }

    pub async fn open_private(&mut self, peer: &str) -> Result<(), StoreError> {
        let session = ActiveSession::private(&self.identity, peer);
        self.switch_to(session).await
    }

    pub async fn export_active(&self) -> Result<String, StoreError> {
        self.store.export(&self.active.key).await
    }

    /// Merges a bundle into the open session and redisplays it.
    pub async fn import_into_active(&mut self, text: &str) -> Result<usize, StoreError> {
        let stored = self.store.import(&self.active.key, text, &self.identity).await?;
        self.switch_to(self.active.clone()).await?;
        Ok(stored)
    }

    pub async fn sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        SessionCatalog::new(&self.store, &self.identity).sessions().await
    }

    pub async fn total_unread(&self) -> Result<usize, StoreError> {
        SessionCatalog::new(&self.store, &self.identity).total_unread().await
    }

    pub async fn refresh_catalog(&mut self) {
        let visible = SessionCatalog::new(&self.store, &self.identity)
            .visible(&self.online)
            .await;
        self.renderer.update_catalog(&visible);
    }

    fn set_online(&mut self, users: Vec<String>) {
        self.online = users.into_iter().filter(|u| *u != self.identity).collect();
    }

    async fn file_system_message(&mut self, text: &str) -> Result<(), StoreError> {
        let message = ChatMessage::system(text);
        let stored = self.store.append(GROUP_KEY, message.clone(), &self.identity).await?;
        // Repeated notices are stored once but shown every time.
        if self.active.key == GROUP_KEY {
            self.renderer.render(GROUP_KEY, &message);
            if stored {
                self.store.mark_read(GROUP_KEY, &self.identity).await?;
            }
        }
        Ok(())
    }

    async fn file_chat_message(&mut self, message: ChatMessage) -> Result<(), StoreError> {
        let key = derive_key_from_message(&message, &self.identity);
        let stored = self.store.append(&key, message.clone(), &self.identity).await?;

        if message.is_from(&self.identity) {
            debug!("Own message in {} persisted (new: {})", key, stored);
            return Ok(());
        }

        if key == self.active.key {
            if stored {
                self.renderer.render(&key, &message);
            }
            self.store.mark_read(&key, &self.identity).await?;
        } else {
            debug!("Message for background session {}", key);
        }
        self.refresh_catalog().await;
        Ok(())
    }
}
