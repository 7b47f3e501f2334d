//! Error types for every stage of the ingestion path.
//!
//! Scope matters more than kind here: a `FrameError` ends one connection,
//! the message-level errors (`AuthError`, `NormalizeError`, `PersistError`)
//! drop one message, and only `ConfigError`/`ServerError` can stop the
//! process, and only at startup.

use std::net::SocketAddr;

/// Failures while pulling a message off the socket
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("payload is not valid UTF-8: {0}")]
    Decode(#[from] std::str::Utf8Error),
    #[error("line exceeds {limit} bytes without a delimiter")]
    Oversized { limit: usize },
}

impl FrameError {
    /// Only an oversized line is survivable; everything else tears the connection down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::Oversized { .. })
    }
}

/// Reasons a message is rejected by the authenticator
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("top-level document is not an object")]
    NotAnObject,
    #[error("missing meta.hmac digest")]
    MissingDigest,
    #[error("no signed fragment found in raw text")]
    NoSignedFragment,
    #[error("digest is not valid hex: {0}")]
    DigestEncoding(#[from] hex::FromHexError),
    #[error("digest mismatch")]
    DigestMismatch,
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("cannot format receipt timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// Failures while appending to the output file; the record is lost
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Anything that can drop a single message inside the pipeline
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("rejected: {0}")]
    Auth(#[from] AuthError),
    #[error("normalization failed: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("persistence failed: {0}")]
    Persist(#[from] PersistError),
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("secret_key is not set (STATION_SECRET_KEY)")]
    MissingSecret,
    #[error("invalid UTC offset: {0} hours")]
    InvalidOffset(i8),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid bind address {0:?}")]
    Address(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot open output file: {0}")]
    Output(#[from] PersistError),
}
