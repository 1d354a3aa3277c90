//! Error types shared across the grid

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unauthorized: invalid privileged token")]
    Unauthorized,

    #[error("Role violation: {0}")]
    RoleViolation(String),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("RPC transport error: {0}")]
    RpcTransport(String),

    #[error("Scan is already running")]
    AlreadyRunning,

    #[error("Scan has already been cleaned up")]
    AlreadyCleanedUp,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn role_violation(message: impl Into<String>) -> Self {
        Self::RoleViolation(message.into())
    }

    pub fn rpc_transport(message: impl Into<String>) -> Self {
        Self::RpcTransport(message.into())
    }
}
