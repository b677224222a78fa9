//! Request security middleware.
//!
//! Each layer is a pass-through when its part of [`crate::SecurityConfig`]
//! is unset. Bodies are buffered only by the layers that need them.

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use pulse_core::security::{self, REAL_IP_HEADER, SIGNATURE_HEADER};
use tracing::warn;

use crate::ApiState;
use crate::handlers::error_response;

/// Upper bound on a buffered request body.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Reject senders outside the trusted subnet, judged by `X-Real-IP`.
pub async fn trusted_subnet(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let Some(subnet) = state.security.trusted_subnet.as_ref() else {
        return next.run(req).await;
    };

    let real_ip = req
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let Some(real_ip) = real_ip else {
        warn!(%subnet, "request without X-Real-IP");
        return error_response("missing X-Real-IP header", StatusCode::BAD_REQUEST);
    };

    if subnet.contains_str(real_ip) {
        next.run(req).await
    } else {
        warn!(%subnet, real_ip, "sender outside trusted subnet");
        error_response("sender not in trusted subnet", StatusCode::FORBIDDEN)
    }
}

/// Decrypt a chunked RSA-OAEP body with the server's private key.
pub async fn decrypt_body(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let Some(private_key) = state.security.private_key.clone() else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let ciphertext = match buffer(body).await {
        Ok(bytes) => bytes,
        Err(resp) => return resp,
    };
    if ciphertext.is_empty() {
        return next.run(Request::from_parts(parts, Body::empty())).await;
    }

    let plaintext = match security::decrypt_chunked(&private_key, &ciphertext) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            warn!(error = %e, "rejecting undecryptable body");
            return error_response("undecryptable body", StatusCode::BAD_REQUEST);
        }
    };
    next.run(rebuild(parts, plaintext.into())).await
}

/// Verify `HashSHA256` over the plaintext body.
///
/// Unsigned requests pass even when a key is configured.
pub async fn verify_signature(
    State(state): State<ApiState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(key) = state.security.key.as_deref() else {
        return next.run(req).await;
    };
    let Some(signature) = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let body = match buffer(body).await {
        Ok(bytes) => bytes,
        Err(resp) => return resp,
    };
    if let Err(e) = security::verify(key, &body, &signature) {
        warn!(error = %e, uri = %parts.uri, "rejecting request signature");
        return error_response("signature mismatch", StatusCode::BAD_REQUEST);
    }
    next.run(rebuild(parts, body)).await
}

async fn buffer(body: Body) -> Result<Bytes, Response> {
    axum::body::to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        warn!(error = %e, "failed to read request body");
        error_response("unreadable body", StatusCode::BAD_REQUEST)
    })
}

fn rebuild(mut parts: axum::http::request::Parts, body: Bytes) -> Request {
    parts.headers.remove(header::CONTENT_LENGTH);
    Request::from_parts(parts, Body::from(body))
}
