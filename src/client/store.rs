//! Durable per-session message logs kept on the client.
//!
//! Each session lives in its own JSON file named after its key. Every
//! read-modify-write of a session runs under that session's lock, so an
//! inbound append and a `mark_read` on the same key cannot lose each other's
//! update.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::chat::ChatMessage;
use crate::client::bundle::ExportBundle;
use crate::error::StoreError;
use crate::session_key::derive_key_from_message;

/// Messages kept per session; the oldest go first.
pub const SESSION_CAPACITY: usize = 500;

const SESSION_FILE_PREFIX: &str = "chat_session_";
const IDENTITY_FILE: &str = "identity.json";
const LEGACY_LOG_FILE: &str = "chat_messages.json";

#[derive(Serialize, Deserialize)]
struct IdentityRecord {
    username: String,
}

pub struct SessionStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(SessionStore {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Files `message` under `key` unless an equal message (same sender,
    /// payload and kind) is already there. Returns whether it was stored.
    ///
    /// Messages written by `local` are stored as read, all others as unread.
    pub async fn append(&self, key: &str, mut message: ChatMessage, local: &str) -> Result<bool, StoreError> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let mut log = self.read_log(key).await?;
        if log.iter().any(|existing| existing.is_duplicate_of(&message)) {
            debug!("Duplicate message in {} skipped", key);
            return Ok(false);
        }
        if log.len() >= SESSION_CAPACITY && log.iter().all(|m| m.timestamp > message.timestamp) {
            debug!("Message older than a full {} log skipped", key);
            return Ok(false);
        }

        message.read = message.is_from(local);
        log.push(message);
        log.sort_by_key(|m| m.timestamp);
        if log.len() > SESSION_CAPACITY {
            let excess = log.len() - SESSION_CAPACITY;
            log.drain(..excess);
        }

        self.write_log(key, &log).await?;
        Ok(true)
    }

    /// The session log in timestamp order; empty when the session is new or
    /// its record cannot be read.
    pub async fn load(&self, key: &str) -> Vec<ChatMessage> {
        match self.read_log(key).await {
            Ok(log) => log,
            Err(e) => {
                warn!("Failed to load session {}: {}", key, e);
                Vec::new()
            }
        }
    }

    /// Marks every message not written by `local` as read. Returns how many
    /// changed.
    pub async fn mark_read(&self, key: &str, local: &str) -> Result<usize, StoreError> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let mut log = self.read_log(key).await?;
        let mut changed = 0;
        for message in log.iter_mut().filter(|m| m.is_unread_for(local)) {
            message.read = true;
            changed += 1;
        }
        if changed > 0 {
            self.write_log(key, &log).await?;
        }
        Ok(changed)
    }

    pub async fn unread_count(&self, key: &str, local: &str) -> usize {
        unread_in(&self.load(key).await, local)
    }

    /// Keys of every session that has a record on disk.
    pub async fn session_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(encoded) = name
                .to_str()
                .and_then(|name| name.strip_prefix(SESSION_FILE_PREFIX))
                .and_then(|name| name.strip_suffix(".json"))
            else {
                continue;
            };
            if let Some(key) = URL_SAFE_NO_PAD
                .decode(encoded)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub async fn export(&self, key: &str) -> Result<String, StoreError> {
        let log = self.read_log(key).await?;
        Ok(ExportBundle::new(&log)?.to_json()?)
    }

    /// Merges an exported bundle into `key`. A bundle that does not parse
    /// leaves the session untouched. Returns how many messages were new.
    pub async fn import(&self, key: &str, text: &str, local: &str) -> Result<usize, StoreError> {
        let messages = ExportBundle::parse(text)?.decode_messages();
        let mut stored = 0;
        for message in messages {
            if self.append(key, message, local).await? {
                stored += 1;
            }
        }
        info!("Imported {} messages into {}", stored, key);
        Ok(stored)
    }

    pub async fn identity(&self) -> Option<String> {
        let bytes = fs::read(self.dir.join(IDENTITY_FILE)).await.ok()?;
        let record: IdentityRecord = serde_json::from_slice(&bytes).ok()?;
        Some(record.username)
    }

    pub async fn save_identity(&self, username: &str) -> Result<(), StoreError> {
        let record = IdentityRecord {
            username: username.to_string(),
        };
        write_atomic(&self.dir.join(IDENTITY_FILE), &serde_json::to_vec(&record)?).await
    }

    pub async fn clear_identity(&self) -> Result<(), StoreError> {
        match fs::remove_file(self.dir.join(IDENTITY_FILE)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Re-files an old single flat log into per-session logs and removes it.
    pub async fn migrate_legacy(&self, local: &str) -> Result<usize, StoreError> {
        let path = self.dir.join(LEGACY_LOG_FILE);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let messages: Vec<ChatMessage> = serde_json::from_slice(&bytes)?;
        let mut migrated = 0;
        for message in messages {
            let key = derive_key_from_message(&message, local);
            if self.append(&key, message, local).await? {
                migrated += 1;
            }
        }
        fs::remove_file(&path).await?;
        info!("Migrated {} legacy messages", migrated);
        Ok(migrated)
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(key.to_string()).or_default().clone()
    }

    fn session_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!(
            "{}{}.json",
            SESSION_FILE_PREFIX,
            URL_SAFE_NO_PAD.encode(key)
        ))
    }

    async fn read_log(&self, key: &str) -> Result<Vec<ChatMessage>, StoreError> {
        match fs::read(self.session_path(key)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_log(&self, key: &str, log: &[ChatMessage]) -> Result<(), StoreError> {
        write_atomic(&self.session_path(key), &serde_json::to_vec(log)?).await
    }
}

/// Unread entries of one session log as seen by `local`.
pub fn unread_in(log: &[ChatMessage], local: &str) -> usize {
    log.iter().filter(|m| m.is_unread_for(local)).count()
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}
