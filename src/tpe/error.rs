//! Error taxonomy for the TPE adapter.

use std::time::Duration;
use thiserror::Error;

/// Every way a terminal exchange (or adapter setup) can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TpeError {
    /// Outgoing request failed a structural, type or value check.
    #[error("validation error: {0}")]
    Validation(String),

    /// Inbound frame is not well-formed JSON (or not a JSON object).
    #[error("parse error: {0}")]
    Parse(String),

    /// A new exchange was submitted while another is outstanding.
    #[error("state error: {0}")]
    State(String),

    /// Send attempted while disconnected, the write failed, or the link dropped
    /// mid-exchange.
    #[error("transport error: {0}")]
    Transport(String),

    /// No resolving response arrived in time.
    #[error("response timeout after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The caller aborted the exchange.
    #[error("exchange cancelled")]
    Cancelled,

    /// Invalid adapter configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl TpeError {
    /// Stable snake_case tag, for hosts that forward errors as plain strings.
    pub fn kind(&self) -> &'static str {
        match self {
            TpeError::Validation(_) => "validation",
            TpeError::Parse(_) => "parse",
            TpeError::State(_) => "state",
            TpeError::Transport(_) => "transport",
            TpeError::Timeout(_) => "timeout",
            TpeError::Cancelled => "cancelled",
            TpeError::Config(_) => "config",
        }
    }

    pub(crate) fn busy() -> Self {
        TpeError::State("busy".into())
    }

    pub(crate) fn not_connected() -> Self {
        TpeError::Transport("not connected".into())
    }
}

pub type Result<T> = std::result::Result<T, TpeError>;
