//! Error types shared by agent and server.

use thiserror::Error;

use crate::metric::MetricKind;

/// A wire record or path segment that cannot become a metric update.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown metric type: {0:?}")]
    UnknownType(String),

    #[error("metric name is empty")]
    EmptyName,

    #[error("{kind} metric {name:?} carries no {field}")]
    MissingValue {
        kind: MetricKind,
        name: String,
        field: &'static str,
    },

    #[error("invalid {kind} value {raw:?}")]
    InvalidValue { kind: MetricKind, raw: String },

    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Failures of the signing, encryption and compression layers.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("invalid signing key: {0}")]
    Key(String),

    #[error("signature header is not valid hex: {0}")]
    SignatureEncoding(String),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),

    #[error("failed to read key file {path}: {reason}")]
    KeyFile { path: String, reason: String },
}
