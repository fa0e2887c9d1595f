//! Who is online. The registry owns every live connection and the
//! identity <-> connection mapping in both directions.
//!
//! Both maps sit behind one lock so the uniqueness check and the insert in
//! [`ConnectionRegistry::bind_identity`] happen as a single step; two
//! near-simultaneous logins for the same name cannot both succeed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use tokio::sync::{mpsc, RwLock};

use crate::error::RegistryError;

pub type ConnectionId = String;

/// Outbound half of a connection. Frames are serialized JSON text.
pub type Outbound = mpsc::UnboundedSender<String>;

const CONNECTION_ID_LEN: usize = 9;

pub struct Connection {
    pub id: ConnectionId,
    pub addr: Option<SocketAddr>,
    pub identity: Option<String>,
    pub connected_at: DateTime<Utc>,
    last_seen: Instant,
    tx: Outbound,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    identities: HashMap<String, ConnectionId>,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, tx: Outbound, addr: Option<SocketAddr>) -> ConnectionId {
        let mut inner = self.inner.write().await;
        let id = loop {
            let candidate = generate_connection_id();
            if !inner.connections.contains_key(&candidate) {
                break candidate;
            }
        };

        inner.connections.insert(
            id.clone(),
            Connection {
                id: id.clone(),
                addr,
                identity: None,
                connected_at: Utc::now(),
                last_seen: Instant::now(),
                tx,
            },
        );
        id
    }

    pub async fn bind_identity(&self, id: &str, identity: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if inner.identities.contains_key(identity) {
            return Err(RegistryError::AlreadyOnline(identity.to_string()));
        }

        let connection = inner
            .connections
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownConnection(id.to_string()))?;
        if let Some(current) = &connection.identity {
            return Err(RegistryError::AlreadyOnline(current.clone()));
        }
        connection.identity = Some(identity.to_string());
        inner.identities.insert(identity.to_string(), id.to_string());
        Ok(())
    }

    /// Drops the identity binding of a connection, returning the identity
    /// that was bound. Calling it again is a no-op.
    pub async fn unbind(&self, id: &str) -> Option<String> {
        let mut inner = self.inner.write().await;
        let identity = inner.connections.get_mut(id)?.identity.take()?;
        inner.identities.remove(&identity);
        Some(identity)
    }

    /// Forgets the connection entirely. Dropping its outbound sender ends the
    /// writer task, which closes the socket.
    pub async fn remove(&self, id: &str) -> Option<String> {
        let mut inner = self.inner.write().await;
        let connection = inner.connections.remove(id)?;
        let identity = connection.identity?;
        inner.identities.remove(&identity);
        Some(identity)
    }

    /// Online identities in name order, optionally leaving one out.
    pub async fn online_identities(&self, excluding: Option<&str>) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut identities: Vec<String> = inner
            .identities
            .keys()
            .filter(|identity| Some(identity.as_str()) != excluding)
            .cloned()
            .collect();
        identities.sort();
        identities
    }

    pub async fn lookup(&self, identity: &str) -> Option<(ConnectionId, Outbound)> {
        let inner = self.inner.read().await;
        let id = inner.identities.get(identity)?;
        let connection = inner.connections.get(id)?;
        Some((id.clone(), connection.tx.clone()))
    }

    pub async fn identity_of(&self, id: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner.connections.get(id)?.identity.clone()
    }

    pub async fn outbound(&self, id: &str) -> Option<Outbound> {
        let inner = self.inner.read().await;
        inner.connections.get(id).map(|connection| connection.tx.clone())
    }

    /// Outbound handles of every registered connection except `except`,
    /// authenticated or not.
    pub async fn outbounds_except(&self, except: Option<&str>) -> Vec<(ConnectionId, Outbound)> {
        let inner = self.inner.read().await;
        inner
            .connections
            .values()
            .filter(|connection| Some(connection.id.as_str()) != except)
            .map(|connection| (connection.id.clone(), connection.tx.clone()))
            .collect()
    }

    pub async fn touch(&self, id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(connection) = inner.connections.get_mut(id) {
            connection.last_seen = Instant::now();
        }
    }

    /// Connections that have sent nothing for longer than `timeout`.
    pub async fn stale(&self, timeout: Duration) -> Vec<ConnectionId> {
        let inner = self.inner.read().await;
        inner
            .connections
            .values()
            .filter(|connection| connection.last_seen.elapsed() > timeout)
            .map(|connection| connection.id.clone())
            .collect()
    }

    pub async fn describe(&self, id: &str) -> Option<(Option<SocketAddr>, DateTime<Utc>)> {
        let inner = self.inner.read().await;
        let connection = inner.connections.get(id)?;
        Some((connection.addr, connection.connected_at))
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

fn generate_connection_id() -> ConnectionId {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CONNECTION_ID_LEN)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect()
}
