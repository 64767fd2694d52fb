use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::payment_processors::service::ProcessorId;

/// Failures talking to the shared state store or the relational ledger.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("redis error: {0}")]
    Redis(#[from] bb8_redis::redis::RedisError),
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("malformed record {key}: {reason}")]
    Malformed { key: String, reason: String },
}

/// Outcome of a single failed call to one upstream processor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("processor timed out")]
    Timeout,
    #[error("processor rejected the payment with status {0}")]
    Rejected(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

impl DeliveryError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DeliveryError::Timeout)
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeliveryError::Timeout
        } else if let Some(status) = err.status() {
            DeliveryError::Rejected(status.as_u16())
        } else {
            DeliveryError::Transport(err.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("both processors failed ({primary}: {primary_error}; {secondary}: {secondary_error})")]
    BothFailed {
        primary: ProcessorId,
        primary_error: DeliveryError,
        secondary: ProcessorId,
        secondary_error: DeliveryError,
    },
}

impl RouterError {
    /// A cycle is worth repeating in place when at least one processor was
    /// merely slow rather than actively refusing the payment.
    pub fn retryable(&self) -> bool {
        match self {
            RouterError::BothFailed {
                primary_error,
                secondary_error,
                ..
            } => primary_error.is_timeout() || secondary_error.is_timeout(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Errors surfaced by the HTTP handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            ApiError::Store(err) => internal_error(err).into_response(),
        }
    }
}

/// Maps any error into a `500 Internal Server Error` response, logging it on the way.
pub fn internal_error<E>(err: E) -> (StatusCode, String)
where
    E: std::error::Error,
{
    tracing::error!(error = %err, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
