//! HTTP handlers.
//!
//! Bodies are read as raw bytes and decoded here, so any malformed JSON is
//! a plain 400 regardless of the `Content-Type` the sender used.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use pulse_core::{MetricKind, MetricRecord, Update, ValidationError};
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use crate::ApiState;
use crate::service::{ServiceError, counter_line, gauge_line};

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

#[derive(serde::Serialize)]
struct BatchApplied {
    applied: usize,
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "rejecting malformed json body");
        error_response(&format!("malformed json: {e}"), StatusCode::BAD_REQUEST)
    })
}

fn write_error(e: ServiceError) -> Response {
    match e {
        ServiceError::Validation(e) => error_response(&e.to_string(), StatusCode::BAD_REQUEST),
        ServiceError::NotFound { .. } => error_response(&e.to_string(), StatusCode::NOT_FOUND),
        ServiceError::Write(_) | ServiceError::Read(_) => {
            error!(error = %e, "metric write failed");
            error_response(&e.to_string(), StatusCode::UNPROCESSABLE_ENTITY)
        }
    }
}

fn read_error(e: ServiceError) -> Response {
    match e {
        ServiceError::Validation(e) => error_response(&e.to_string(), StatusCode::BAD_REQUEST),
        ServiceError::NotFound { .. } => error_response(&e.to_string(), StatusCode::NOT_FOUND),
        ServiceError::Write(_) | ServiceError::Read(_) => {
            error!(error = %e, "metric read failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// ── Writes ─────────────────────────────────────────────────────

/// POST /updates/
pub async fn update_batch(State(state): State<ApiState>, body: Bytes) -> Response {
    let records: Vec<MetricRecord> = match parse_json(&body) {
        Ok(records) => records,
        Err(resp) => return resp,
    };
    match state.service.update_batch(&records).await {
        Ok(applied) => ApiResponse::ok(BatchApplied { applied }).into_response(),
        Err(e) => write_error(e),
    }
}

/// POST /update/
pub async fn update_json(State(state): State<ApiState>, body: Bytes) -> Response {
    let record: MetricRecord = match parse_json(&body) {
        Ok(record) => record,
        Err(resp) => return resp,
    };
    match state.service.update_record(&record).await {
        Ok(stored) => Json(stored).into_response(),
        Err(e) => write_error(e),
    }
}

/// POST /update/{type}/{name}/{value}
pub async fn update_path(
    State(state): State<ApiState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Response {
    let update = match Update::from_path(&kind, &name, &value) {
        Ok(update) => update,
        Err(e) => return write_error(e.into()),
    };
    match state.service.apply(update).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => write_error(e),
    }
}

// ── Reads ──────────────────────────────────────────────────────

/// POST /value/
pub async fn value_json(State(state): State<ApiState>, body: Bytes) -> Response {
    let query: MetricRecord = match parse_json(&body) {
        Ok(query) => query,
        Err(resp) => return resp,
    };
    let kind = match query.kind() {
        Ok(kind) => kind,
        Err(e) => return read_error(e.into()),
    };
    if query.id.is_empty() {
        return read_error(ValidationError::EmptyName.into());
    }
    match state.service.get_record(kind, &query.id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => read_error(e),
    }
}

/// GET /value/{type}/{name}
pub async fn value_path(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
) -> Response {
    let kind: MetricKind = match kind.parse() {
        Ok(kind) => kind,
        Err(e) => return read_error(ServiceError::Validation(e)),
    };
    let text = match kind {
        MetricKind::Gauge => state.service.get_gauge(&name).await.map(|v| v.to_string()),
        MetricKind::Counter => state.service.get_counter(&name).await.map(|v| v.to_string()),
    };
    match text {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response(),
        Err(e) => read_error(e),
    }
}

/// GET /
pub async fn index(State(state): State<ApiState>) -> Response {
    let set = match state.service.list_all().await {
        Ok(set) => set,
        Err(e) => return read_error(e),
    };
    let mut page = String::new();
    for line in set
        .gauges
        .iter()
        .map(gauge_line)
        .chain(set.counters.iter().map(counter_line))
    {
        page.push_str(&line);
        page.push('\n');
    }
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], page).into_response()
}

/// GET /ping
pub async fn ping(State(state): State<ApiState>) -> Response {
    match state.service.ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            error!(error = %e, "store ping failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
