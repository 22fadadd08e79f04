//! error types for the gateway, the readings store and the http api
//!
//! the api error is the only one that reaches a client. store errors are
//! logged and swallowed by the handlers; gateway errors either fall back to
//! the sensor cache (fetch) or surface as an upstream error (toggle).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// failures talking to the cloud broker
#[derive(Error, Debug)]
pub enum GatewayError {
    /// request never produced a response (dns, connect, timeout)
    #[error("broker request failed: {0}")]
    Transport(String),

    /// broker answered with a non-success status
    #[error("broker returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// batch reply was not a channel -> value object
    #[error("malformed batch reply: {0}")]
    MalformedBatch(String),

    /// neither the batch request nor any per-channel request got through
    #[error("broker unreachable")]
    Unreachable,
}

/// failures in the sqlite readings log
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// errors returned to http clients
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid device: {0}")]
    InvalidDevice(String),

    #[error("No data received")]
    EmptyReport,

    #[error("{0}")]
    Upstream(#[from] GatewayError),

    #[error("Failed to get data from the broker and no cached reading is available")]
    Unavailable,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidDevice(_) | ApiError::EmptyReport => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            // the field device expects the status/message shape
            ApiError::EmptyReport => json!({ "status": "error", "message": self.to_string() }),
            _ => json!({ "error": self.to_string() }),
        };
        (self.status(), Json(body)).into_response()
    }
}
