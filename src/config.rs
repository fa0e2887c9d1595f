//! Settings loaded from environment variables. Everything has a default so
//! both halves start with zero configuration on one machine.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Env: `RELAY_ADDR`, default `0.0.0.0:3001`.
    pub addr: SocketAddr,
    /// Env: `HEARTBEAT_SECS`, default 30.
    pub heartbeat_interval: Duration,
    /// Silence after which a connection is dropped.
    /// Env: `HEARTBEAT_TIMEOUT_SECS`, default 90, `0` disables.
    pub heartbeat_timeout: Option<Duration>,
    /// Env: `STATIC_DIR`, default `public`.
    pub static_dir: PathBuf,
    /// Env: `TLS_CERT` and `TLS_KEY`; TLS is used only when both are set.
    pub tls: Option<(PathBuf, PathBuf)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ([0, 0, 0, 0], 3001).into(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Some(Duration::from_secs(90)),
            static_dir: PathBuf::from("public"),
            tls: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "RELAY_ADDR") {
            config.addr = addr;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "HEARTBEAT_SECS") {
            if secs > 0 {
                config.heartbeat_interval = Duration::from_secs(secs);
            }
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "HEARTBEAT_TIMEOUT_SECS") {
            config.heartbeat_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(dir) = lookup("STATIC_DIR") {
            config.static_dir = PathBuf::from(dir);
        }
        if let (Some(cert), Some(key)) = (lookup("TLS_CERT"), lookup("TLS_KEY")) {
            config.tls = Some((PathBuf::from(cert), PathBuf::from(key)));
        }

        config
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Env: `RELAY_URL`, default `ws://127.0.0.1:3001/ws`.
    pub url: String,
    /// Fixed delay between reconnect attempts.
    /// Env: `RECONNECT_SECS`, default 3.
    pub reconnect_delay: Duration,
    /// Env: `SESSION_DIR`, default `./sessions`.
    pub session_dir: PathBuf,
    /// Env: `MAX_IMAGE_BYTES`, default 5 MiB.
    pub max_image_bytes: usize,
    /// Used when no password is given on the command line.
    /// Env: `RELAY_PASSWORD`.
    pub password: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3001/ws".to_string(),
            reconnect_delay: Duration::from_secs(3),
            session_dir: PathBuf::from("./sessions"),
            max_image_bytes: 5 * 1024 * 1024,
            password: None,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("RELAY_URL") {
            config.url = url;
        }
        if let Some(secs) = parse_var(&lookup, "RECONNECT_SECS") {
            config.reconnect_delay = Duration::from_secs(secs);
        }
        if let Some(dir) = lookup("SESSION_DIR") {
            config.session_dir = PathBuf::from(dir);
        }
        if let Some(bytes) = parse_var(&lookup, "MAX_IMAGE_BYTES") {
            config.max_image_bytes = bytes;
        }
        if let Some(password) = lookup("RELAY_PASSWORD").filter(|p| !p.is_empty()) {
            config.password = Some(password);
        }

        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let value = lookup(name)?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Invalid {}={:?}, using default", name, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn server_defaults() {
        let config = ServerConfig::from_lookup(env(&[]));
        assert_eq!(config.addr, ([0, 0, 0, 0], 3001).into());
        assert_eq!(config.heartbeat_timeout, Some(Duration::from_secs(90)));
        assert!(config.tls.is_none());
    }

    #[test]
    fn server_overrides_and_bad_values() {
        let config = ServerConfig::from_lookup(env(&[
            ("RELAY_ADDR", "127.0.0.1:9000"),
            ("HEARTBEAT_SECS", "abc"),
            ("HEARTBEAT_TIMEOUT_SECS", "0"),
            ("TLS_CERT", "cert.pem"),
        ]));
        assert_eq!(config.addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat_timeout, None);
        assert!(config.tls.is_none());
    }

    #[test]
    fn client_overrides() {
        let config = ClientConfig::from_lookup(env(&[
            ("RELAY_URL", "wss://chat.example/ws"),
            ("RECONNECT_SECS", "1"),
            ("MAX_IMAGE_BYTES", "1024"),
            ("RELAY_PASSWORD", "hunter2"),
        ]));
        assert_eq!(config.password.as_deref(), Some("hunter2"));
        assert_eq!(config.url, "wss://chat.example/ws");
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_image_bytes, 1024);
        assert_eq!(config.session_dir, PathBuf::from("./sessions"));
        assert!(ClientConfig::from_lookup(env(&[("RELAY_PASSWORD", "")])).password.is_none());
    }
}
