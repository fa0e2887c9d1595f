//! Credential check consulted by the HTTP login endpoint. Unknown names are
//! registered on first use; the relay itself only ever sees the resulting
//! username.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::AuthError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    pub id: u64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Registered(AuthenticatedUser),
    LoggedIn(AuthenticatedUser),
}

impl Authentication {
    pub fn user(&self) -> &AuthenticatedUser {
        match self {
            Authentication::Registered(user) | Authentication::LoggedIn(user) => user,
        }
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Authentication, AuthError>;
}

struct StoredUser {
    id: u64,
    password_hash: String,
}

/// Lookup-or-create user table held in memory.
#[derive(Default)]
pub struct MemoryAuthenticator {
    users: RwLock<HashMap<String, StoredUser>>,
}

impl MemoryAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    fn hash_password(username: &str, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(username.as_bytes());
        hasher.update(b":");
        hasher.update(password.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[async_trait]
impl Authenticator for MemoryAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Authentication, AuthError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let password_hash = Self::hash_password(username, password);
        let mut users = self.users.write().await;
        if let Some(user) = users.get(username) {
            if user.password_hash != password_hash {
                return Err(AuthError::WrongPassword);
            }
            return Ok(Authentication::LoggedIn(AuthenticatedUser {
                id: user.id,
                username: username.to_string(),
            }));
        }

        let id = users.len() as u64 + 1;
        users.insert(username.to_string(), StoredUser { id, password_hash });
        Ok(Authentication::Registered(AuthenticatedUser {
            id,
            username: username.to_string(),
        }))
    }
}
