//! Terminal chat client: local session history plus the relay connection.

pub mod bundle;
pub mod catalog;
pub mod connection;
pub mod dispatcher;
pub mod login;
pub mod store;
pub mod terminal;
