//! Error types surfaced to HTTP callers.
//!
//! The body shape `{type, title, invalid-params}` is what existing clients of
//! the listing API already parse, so every error response keeps it.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::coordinator::ReservationError;
use crate::store::StoreError;

/// One rejected request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidParam {
    pub name: String,
    pub reason: String,
}

impl InvalidParam {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorModel {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(rename = "invalid-params", default, skip_serializing_if = "Vec::is_empty")]
    pub invalid_params: Vec<InvalidParam>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request parameters did not validate")]
    BadRequest(Vec<InvalidParam>),

    #[error("requested resource not found")]
    NotFound,

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ApiError::BadRequest(vec![InvalidParam::new(name, reason)])
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, title, invalid_params) = match self {
            ApiError::BadRequest(params) => (
                StatusCode::BAD_REQUEST,
                "Bad request",
                "Your request parameters didn't validate.",
                params,
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "Not found",
                "Requested resource not found",
                Vec::new(),
            ),
            ApiError::Unavailable(detail) => {
                tracing::warn!("responding 503: {}", detail);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service unavailable",
                    "Reservations are temporarily unavailable, retry with the same Idempotency-Key",
                    Vec::new(),
                )
            }
            ApiError::Internal(detail) => {
                tracing::error!("responding 500: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Server error",
                    "Internal server error",
                    Vec::new(),
                )
            }
        };

        let body = ErrorModel {
            kind: kind.to_string(),
            title: title.to_string(),
            invalid_params,
        };
        (status, Json(body)).into_response()
    }
}

impl From<ReservationError> for ApiError {
    fn from(err: ReservationError) -> Self {
        match err {
            ReservationError::Unavailable { .. } | ReservationError::ListingSuspended { .. } => {
                ApiError::Unavailable(err.to_string())
            }
            ReservationError::Internal(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            ApiError::Unavailable(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}
