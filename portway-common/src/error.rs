//! Error types for Portway

use thiserror::Error;

/// Main error type for Portway operations
#[derive(Error, Debug)]
pub enum TunnelError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error (decode failure, truncated frame); terminal for the
    /// physical connection it occurred on
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A live stream already exists under this id
    #[error("Stream {0} already exists")]
    DuplicateStream(u32),

    /// Stream id allocation gave up after repeated collisions
    #[error("Stream id space exhausted after {0} attempts")]
    StreamIdExhausted(u32),

    /// Stream not found
    #[error("Stream {0} not found")]
    StreamNotFound(u32),

    /// A session already exists under this id
    #[error("Session '{0}' already exists")]
    DuplicateSession(String),

    /// Session not found
    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    /// Illegal state transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Connection error
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TunnelError>;
