use thiserror::Error;

pub use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("transport closed: {0}")]
    Closed(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unsupported pattern flag '{flag}' in '{flags}'")]
    UnsupportedFlag { flag: char, flags: String },
}

/// Failures that end a session. Everything else is logged and absorbed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport lost: {0}")]
    TransportLost(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("event stream ended")]
    EventStreamClosed,
}

impl SessionError {
    pub fn is_fatal_config(&self) -> bool {
        matches!(self, SessionError::Config(_))
    }
}
