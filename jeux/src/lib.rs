use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod client_registry;
pub mod config;
pub mod player;
pub mod server;
pub mod service;
pub mod shutdown;

pub use client_registry::*;
pub use config::ServerConfig;
pub use player::*;
pub use server::Server;

/// Messages sent by a client, one JSON document per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    Login { username: String },
    Users,
}

/// Messages sent by the server, one JSON document per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    Welcome { session_id: String },
    LoggedIn { username: String, rating: i32 },
    Users { players: Vec<UserInfo> },
    Nack { reason: String },
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    pub rating: i32,
}

/// Admission failure reported by [`ClientRegistry::register`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("client registry is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoginError {
    #[error("username must not be empty")]
    EmptyName,
    #[error("already logged in as {0}")]
    AlreadyLoggedIn(String),
    #[error("{0} is logged in on another connection")]
    NameInUse(String),
}
