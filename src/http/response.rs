//! Client-facing error responses.
//!
//! # Responsibilities
//! - Render denials and failures as `{"success": false, "message": ...}`
//! - Map gateway errors to stable status classes
//!
//! # Design Decisions
//! - Messages are generic; no backend addresses or internal errors leak
//! - Rate limit denials carry a fixed `Retry-After` hint

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Seconds suggested to a throttled client.
pub const RETRY_AFTER_SECS: u64 = 60;

pub const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

/// JSON error response with the given status.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        success: false,
        message: message.into(),
    };
    (status, Json(body)).into_response()
}

/// 429 response sent when a client exhausts its token bucket.
pub fn rate_limited() -> Response {
    let mut response = json_error(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE);
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
    response
}

pub fn no_route() -> Response {
    json_error(StatusCode::NOT_FOUND, "No route matches the requested path")
}
