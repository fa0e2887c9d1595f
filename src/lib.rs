pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod presence;
pub mod registry;
pub mod router;
pub mod routes;
pub mod server;
pub mod session_key;
pub mod tls;
