//! Error types for the agent.

use std::time::Duration;

use pulse_core::SecurityError;
use thiserror::Error;

/// Result type alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur while delivering a batch.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to seal batch: {0}")]
    Seal(#[from] SecurityError),

    #[error("invalid server address {address:?}: {reason}")]
    Address { address: String, reason: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rpc failed with {code:?}: {message}")]
    Rpc { code: tonic::Code, message: String },

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        last: Box<TransportError>,
    },
}

impl TransportError {
    /// Whether another attempt may succeed.
    ///
    /// Connection failures, timeouts, HTTP 5xx and RPC `Internal` /
    /// `Unavailable` are transient; everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Request(_) | TransportError::Timeout(_) => true,
            TransportError::Status { status, .. } => *status >= 500,
            TransportError::Rpc { code, .. } => {
                matches!(code, tonic::Code::Internal | tonic::Code::Unavailable)
            }
            TransportError::Encode(_)
            | TransportError::Seal(_)
            | TransportError::Address { .. }
            | TransportError::Exhausted { .. } => false,
        }
    }
}

impl From<tonic::Status> for TransportError {
    fn from(status: tonic::Status) -> Self {
        TransportError::Rpc {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}
