//! Error types for live-poll
//!
//! `PollError` is the taxonomy every request handler speaks. It is converted
//! into the wire error shape by [`PollError::name`] and
//! [`PollError::public_message`]; internal causes never leave the process.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for polling operations
#[derive(Error, Debug)]
pub enum PollError {
    /// Bad or missing credential. Terminal for the connection.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Authenticated, but the access level or voter status is insufficient.
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Invariant violation, e.g. publishing a second event.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Malformed payload or illegal state transition.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl PollError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Error name as sent on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "Unauthorized",
            Self::Forbidden { .. } => "Forbidden",
            Self::NotFound { .. } => "NotFound",
            Self::Conflict { .. } => "Conflict",
            Self::Validation { .. } => "Validation",
            Self::Store(_) => "ServerError",
        }
    }

    /// Message safe to transmit. Store faults are reduced to a generic text.
    pub fn public_message(&self) -> String {
        match self {
            Self::Unauthorized { message }
            | Self::Forbidden { message }
            | Self::Conflict { message }
            | Self::Validation { message } => message.clone(),
            Self::NotFound { entity, id } => format!("{entity} {id} not found"),
            Self::Store(_) => "Internal server error".to_string(),
        }
    }
}

/// Faults raised by a persistence backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("Record {id} is missing")]
    Missing { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type alias for polling operations
pub type Result<T> = std::result::Result<T, PollError>;
