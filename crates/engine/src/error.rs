use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Request-level failures. Every variant maps to HTTP 400; no error here is
/// fatal to the process, each request fails on its own.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The dataset URL could not be parsed.
    #[error("failed to parse banquet url: {0}")]
    Parse(#[from] banquet_parser::ParseError),

    /// The store could not be opened or failed its liveness probe.
    #[error("failed to open database: {0}")]
    Connection(sqlx::Error),

    /// The store rejected the compiled statement.
    #[error("query failed: {0}")]
    Query(sqlx::Error),

    /// A required request field is missing or malformed.
    #[error("{0}")]
    Validation(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!("request failed: {}", self);
        let body = Json(json!({ "error": self.to_string() }));
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}
