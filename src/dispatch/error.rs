//! Dispatch failures and their client-facing mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::http::response::json_error;
use crate::resilience::{BreakerRejection, RetryError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("circuit open")]
    CircuitOpen,

    #[error("too many half-open probes in flight")]
    ProbeLimitExceeded,

    #[error("service discovery failed: {0}")]
    DiscoveryFailed(#[from] DiscoveryError),

    #[error("transport failed: {0}")]
    TransportFailed(String),

    #[error("backend returned transient status {0}")]
    RetryableStatus(StatusCode),

    #[error("backend returned status {0}")]
    TerminalStatus(StatusCode),

    #[error("response body exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last_error: Box<DispatchError>,
    },

    #[error("deadline exceeded after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request body not received before the deadline")]
    RequestBodyTimeout,
}

impl DispatchError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::DiscoveryFailed(_)
                | DispatchError::TransportFailed(_)
                | DispatchError::RetryableStatus(_)
        )
    }

    /// Whether the breaker should count this as a backend failure.
    ///
    /// Oversized responses and malformed requests say nothing about the
    /// backend's health.
    pub fn is_backend_failure(&self) -> bool {
        !matches!(
            self,
            DispatchError::ResponseTooLarge { .. }
                | DispatchError::InvalidRequest(_)
                | DispatchError::RequestBodyTimeout
        )
    }

    /// Status returned to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::CircuitOpen | DispatchError::ProbeLimitExceeded => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DispatchError::Cancelled { .. } => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DispatchError::RequestBodyTimeout => StatusCode::REQUEST_TIMEOUT,
            DispatchError::DiscoveryFailed(_)
            | DispatchError::TransportFailed(_)
            | DispatchError::RetryableStatus(_)
            | DispatchError::TerminalStatus(_)
            | DispatchError::ResponseTooLarge { .. }
            | DispatchError::RetryExhausted { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            DispatchError::CircuitOpen | DispatchError::ProbeLimitExceeded => {
                "Service temporarily unavailable"
            }
            DispatchError::Cancelled { .. } => "Service did not respond in time",
            DispatchError::InvalidRequest(_) => "Invalid request",
            DispatchError::RequestBodyTimeout => "Request body not received in time",
            _ => "Service error",
        }
    }
}

impl From<BreakerRejection> for DispatchError {
    fn from(rejection: BreakerRejection) -> Self {
        match rejection {
            BreakerRejection::Open => DispatchError::CircuitOpen,
            BreakerRejection::TooManyProbes => DispatchError::ProbeLimitExceeded,
        }
    }
}

impl From<RetryError<DispatchError>> for DispatchError {
    fn from(error: RetryError<DispatchError>) -> Self {
        match error {
            RetryError::Terminal(error) => error,
            RetryError::Exhausted {
                attempts,
                last_error,
            } => DispatchError::RetryExhausted {
                attempts,
                last_error: Box::new(last_error),
            },
            RetryError::Cancelled { attempts } => DispatchError::Cancelled { attempts },
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        json_error(self.status(), self.public_message())
    }
}
