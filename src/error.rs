//! Error types for the input.
//!
//! Only `Configuration` and `InvalidState` ever reach the caller of a
//! lifecycle hook. Retrieval, stream and reporting failures are converted into
//! failure events (or logged and swallowed) where they occur.

use thiserror::Error;

use crate::client::ClientError;
use crate::config::ConfigurationError;
use crate::events::SinkError;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Retrieval error for query '{query}': {source}")]
    Retrieval {
        query: String,
        #[source]
        source: ClientError,
    },
    #[error("Stream error for query '{query}': {source}")]
    Stream {
        query: String,
        #[source]
        source: ClientError,
    },
    #[error("Failure reporting error: {0}")]
    Reporting(String),
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl InputError {
    pub fn retrieval(query: impl Into<String>, source: ClientError) -> Self {
        Self::Retrieval {
            query: query.into(),
            source,
        }
    }

    pub fn stream(query: impl Into<String>, source: ClientError) -> Self {
        Self::Stream {
            query: query.into(),
            source,
        }
    }

    /// Whether this error must stop the input from starting
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::InvalidState(_))
    }
}

pub type Result<T> = std::result::Result<T, InputError>;
