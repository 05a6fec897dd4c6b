//! Error types for trainwatch stream
//!
//! Transport failures are never fatal: they are carried inside
//! `SessionState::Closed` and rendered as the status reason while the
//! session waits to reconnect. Configuration errors are the only ones that
//! reach a caller.

use std::path::PathBuf;
use trainwatch_core::AxisError;

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Initial connect failed
    #[error("connection failed: {0}")]
    Connect(String),

    /// Error on an open connection
    #[error("connection lost: {0}")]
    Runtime(String),

    /// Orderly or abrupt close from the far end
    #[error("closed by server{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    RemoteClosed {
        /// Close reason sent by the server, if any
        reason: Option<String>,
    },
}

impl TransportError {
    /// Check if the connection was never established
    #[inline]
    #[must_use]
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect(_))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    /// Origin is not an http(s)/ws(s) URL with a host
    #[error("invalid origin `{origin}`: {reason}")]
    InvalidOrigin {
        /// Offending value
        origin: String,
        /// What is wrong with it
        reason: String,
    },

    /// Axis configuration rejected
    #[error("invalid axes: {0}")]
    Axis(#[from] AxisError),

    /// Any other invalid setting
    #[error("invalid config: {0}")]
    Invalid(String),
}
