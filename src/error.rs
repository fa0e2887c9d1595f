use thiserror::Error;

use crate::registry::ConnectionId;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{0} is already online")]
    AlreadyOnline(String),
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Binary frames are not supported")]
    Binary,
}

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Unsupported export format: {0}")]
    UnsupportedVersion(String),
    #[error("Export file is not valid: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt session record: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Bundle(#[from] BundleError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("Username and password must not be empty")]
    MissingCredentials,
    #[error("Wrong password")]
    WrongPassword,
}

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("Failed to read TLS file: {0}")]
    Io(#[from] std::io::Error),
    #[error("No certificate found in PEM file")]
    NoCertificate,
    #[error("No private key found in PEM file")]
    NoPrivateKey,
    #[error("Invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Image rejected: {0}")]
    Image(String),
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("Login request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Login rejected: {0}")]
    Auth(String),
    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),
}
