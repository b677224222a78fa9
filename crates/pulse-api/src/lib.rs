//! pulse-api: the Pulse aggregation server surfaces.
//!
//! [`AggregationService`] validates inbound metric records and routes them to
//! the configured [`pulse_store::MetricStore`]. Two transports sit on top:
//! an axum router ([`build_router`]) and the `MetricsApi` gRPC service
//! ([`MetricsRpc`]).
//!
//! # HTTP Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | HTML listing of every metric |
//! | POST | `/updates/` | Apply a JSON batch of records |
//! | POST | `/update/` | Apply one JSON record |
//! | POST | `/update/{type}/{name}/{value}` | Apply one path-encoded update |
//! | POST | `/value/` | Read one metric as a JSON record |
//! | GET | `/value/{type}/{name}` | Read one metric as plain text |
//! | GET | `/ping` | Store health |
//!
//! # Request pipeline
//!
//! ```text
//! trace → 5s deadline → trusted subnet → gzip → RSA decrypt → HMAC verify → handler
//! ```

pub mod grpc;
pub mod handlers;
pub mod middleware;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use pulse_core::TrustedSubnet;
use pulse_core::security::RsaPrivateKey;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use grpc::MetricsRpc;
pub use service::{AggregationService, ServiceError, ServiceResult};

/// Per-request handler deadline.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Optional request security, each layer disabled when its field is `None`.
#[derive(Clone, Default)]
pub struct SecurityConfig {
    /// Shared HMAC-SHA256 key.
    pub key: Option<Vec<u8>>,
    /// Private key for chunked RSA-OAEP request bodies.
    pub private_key: Option<Arc<RsaPrivateKey>>,
    /// Allowed sender network, matched against `X-Real-IP`.
    pub trusted_subnet: Option<TrustedSubnet>,
}

/// Shared state for handlers and middleware.
#[derive(Clone)]
pub struct ApiState {
    pub service: AggregationService,
    pub security: Arc<SecurityConfig>,
}

/// Build the HTTP router with the full request pipeline.
pub fn build_router(service: AggregationService, security: SecurityConfig) -> Router {
    let state = ApiState {
        service,
        security: Arc::new(security),
    };

    Router::new()
        .route("/", get(handlers::index))
        .route("/updates/", post(handlers::update_batch))
        .route("/update/", post(handlers::update_json))
        .route("/update/{kind}/{name}/{value}", post(handlers::update_path))
        .route("/value/", post(handlers::value_json))
        .route("/value/{kind}/{name}", get(handlers::value_path))
        .route("/ping", get(handlers::ping))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::verify_signature,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::decrypt_body,
        ))
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::trusted_subnet,
        ))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
