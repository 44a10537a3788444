//! Error types for taskmail.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Mail transport, protocol and parsing errors.
///
/// These never leave the fetch surface as errors: the IMAP and POP3 state
/// machines fold them into placeholder records. The SMTP path reports them
/// in its `SendOutcome`.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Connection to {host}:{port} failed: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server rejected {command}: {response}")]
    Rejected { command: String, response: String },

    #[error("Command {command} issued in invalid protocol state")]
    InvalidState { command: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Failed to parse message: {0}")]
    Parse(String),

    #[error("Failed to send email: {0}")]
    Send(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
