//! pulse-core: shared types for the Pulse metrics pipeline.
//!
//! Holds everything the agent and the server must agree on:
//!
//! - the metric model ([`MetricKind`], [`Gauge`], [`Counter`], [`Update`])
//! - the wire form ([`MetricRecord`]) and its validation rules
//! - request security primitives ([`security`]): HMAC-SHA256 signatures,
//!   chunked RSA-OAEP, gzip, PKCS#1 key files
//! - the trusted-subnet matcher ([`TrustedSubnet`])

pub mod error;
pub mod metric;
pub mod record;
pub mod security;
pub mod subnet;

pub use error::{SecurityError, ValidationError};
pub use metric::{Counter, Gauge, MetricKind, Update};
pub use record::MetricRecord;
pub use subnet::{InvalidCidr, TrustedSubnet};
