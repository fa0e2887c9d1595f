use std::time::Duration;

use log::{info, warn};
use tokio::task::JoinHandle;

use crate::error::RegistryError;
use crate::messages::ServerMessage;
use crate::registry::ConnectionRegistry;
use crate::router::deliver;

/// Announces arrivals and departures and keeps presence honest with a
/// heartbeat.
#[derive(Clone)]
pub struct PresenceNotifier {
    registry: ConnectionRegistry,
}

impl PresenceNotifier {
    pub fn new(registry: ConnectionRegistry) -> Self {
        PresenceNotifier { registry }
    }

    /// Binds `username` to the connection, then answers it with everyone
    /// else who is online and tells everyone else it arrived. A rejected
    /// login only gets a failure reply; the existing session is untouched.
    pub async fn login(&self, id: &str, username: &str) -> Result<(), RegistryError> {
        if let Err(e) = self.registry.bind_identity(id, username).await {
            warn!("Login as {} rejected on #{}: {}", username, id, e);
            self.send(id, &ServerMessage::login_rejected(e.to_string())).await;
            return Err(e);
        }
        info!("User {} logged in on #{}", username, id);

        let others = self.registry.online_identities(Some(username)).await;
        self.send(id, &ServerMessage::login_accepted(username, others)).await;

        let announcement = ServerMessage::UserOnline {
            username: username.to_string(),
            online_users: self.registry.online_identities(None).await,
        };
        self.broadcast(&announcement, Some(id)).await;
        Ok(())
    }

    /// Explicit logout: the connection stays open but loses its identity,
    /// and hears its own departure like everyone else.
    pub async fn logout(&self, id: &str) -> Option<String> {
        let username = self.registry.unbind(id).await?;
        info!("User {} logged out on #{}", username, id);
        self.announce_offline(&username).await;
        Some(username)
    }

    /// Transport went away: forget the connection and announce the
    /// departure if it was logged in.
    pub async fn disconnect(&self, id: &str) -> Option<String> {
        let username = self.registry.remove(id).await?;
        info!("User {} went offline (#{})", username, id);
        self.announce_offline(&username).await;
        Some(username)
    }

    /// Tells every open connection, the departing one included if it is
    /// still open, who left and who remains.
    async fn announce_offline(&self, username: &str) {
        let announcement = ServerMessage::UserOffline {
            username: username.to_string(),
            online_users: self.registry.online_identities(None).await,
        };
        self.broadcast(&announcement, None).await;
    }

    /// One heartbeat round: ping every open connection, then evict the
    /// ones that stayed silent past `timeout`. Returns the evicted ids.
    pub async fn heartbeat(&self, timeout: Option<Duration>) -> Vec<String> {
        self.broadcast(&ServerMessage::Ping, None).await;

        let Some(timeout) = timeout else {
            return Vec::new();
        };
        let stale = self.registry.stale(timeout).await;
        for id in &stale {
            warn!("Connection #{} missed heartbeats for {:?}, dropping it", id, timeout);
            self.disconnect(id).await;
        }
        stale
    }

    pub fn spawn_heartbeat(&self, interval: Duration, timeout: Option<Duration>) -> JoinHandle<()> {
        let presence = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                presence.heartbeat(timeout).await;
            }
        })
    }

    async fn send(&self, id: &str, message: &ServerMessage) {
        if let (Some(tx), Ok(frame)) = (self.registry.outbound(id).await, serde_json::to_string(message)) {
            deliver(&tx, &frame);
        }
    }

    async fn broadcast(&self, message: &ServerMessage, except: Option<&str>) {
        if let Ok(frame) = serde_json::to_string(message) {
            for (_, tx) in self.registry.outbounds_except(except).await {
                deliver(&tx, &frame);
            }
        }
    }
}
