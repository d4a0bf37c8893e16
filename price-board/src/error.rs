use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `price-board`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum PipelineError {
    #[error("TransportError: {0}")]
    Transport(String),

    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error("failed to resolve symbols for board {board}: {reason}")]
    SymbolSource { board: String, reason: String },

    #[error("local cache error: {0}")]
    Cache(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
}

impl PipelineError {
    /// Determine if an error requires the transport connection to be re-established.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_terminal(&self) -> bool {
        match self {
            PipelineError::Transport(error_msg) => {
                let error_lower = error_msg.to_lowercase();
                error_lower.contains("connectionclosed")
                    || error_lower.contains("alreadyclosed")
                    || error_lower.contains("io(")
                    || error_lower.contains("timeout")
            }
            PipelineError::ChannelClosed(_) => true,
            _ => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for PipelineError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(format!("{value:?}"))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

/// Error returned by a [`CellSink`](crate::registry::CellSink) that can no longer be written to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum SinkError {
    #[error("cell detached from its view")]
    Detached,
}
