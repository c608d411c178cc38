//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps dispute-service errors to HTTP status codes and returns JSON error
//! bodies with a machine-readable code, a message and optional details.
//! Internal error details are never exposed in responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use market_disputes::{DisputeError, EscrowError, StoreError};

/// Structured JSON error response body.
///
/// All error responses use this format across the API surface.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "CONFLICT").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details, present only for client errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid token (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller lacks the role or party membership (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Conflict with the current state of the record (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An external collaborator (escrow) failed (502).
    #[error("upstream failure: {0}")]
    BadGateway(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::BadGateway(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        if matches!(&self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal server error");
        } else if matches!(&self, Self::BadGateway(_)) {
            tracing::warn!(error = %self, "upstream collaborator failed");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Convert market-core validation errors to API errors.
impl From<market_core::ValidationError> for AppError {
    fn from(err: market_core::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Convert dispute-service errors to API errors.
///
/// Authorization failures map to 403, lifecycle preconditions to 409,
/// missing records to 404, bad input to 422, and collaborator failures
/// to 502 (escrow unreachable) or 500 (store, outbox).
impl From<DisputeError> for AppError {
    fn from(err: DisputeError) -> Self {
        match &err {
            DisputeError::NotAParty { .. } | DisputeError::Forbidden(_) => {
                Self::Forbidden(err.to_string())
            }
            DisputeError::InvalidTransition { .. }
            | DisputeError::TerminalState { .. }
            | DisputeError::ProposalClosed { .. }
            | DisputeError::DecisionAlreadyRecorded { .. } => Self::Conflict(err.to_string()),
            DisputeError::DisputeNotFound(_) | DisputeError::ProposalNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            DisputeError::Validation(_)
            | DisputeError::InvalidFiling(_)
            | DisputeError::InvalidTerms(_) => Self::Validation(err.to_string()),
            DisputeError::Escrow(EscrowError::Unavailable(_)) => Self::BadGateway(err.to_string()),
            DisputeError::Escrow(EscrowError::InvalidAmount(_)) => {
                Self::Validation(err.to_string())
            }
            DisputeError::Escrow(_) => Self::Conflict(err.to_string()),
            DisputeError::Store(StoreError::Conflict(_)) => Self::Conflict(err.to_string()),
            DisputeError::Store(_) | DisputeError::Outbox(_) => Self::Internal(err.to_string()),
        }
    }
}

/// Database write-through failures surface as 500.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(format!("database error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::DisputeId;

    fn status_of(err: DisputeError) -> StatusCode {
        AppError::from(err).status_and_code().0
    }

    #[test]
    fn not_found_status_code() {
        let err = AppError::NotFound("missing dispute".to_string());
        let (status, code) = err.status_and_code();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "NOT_FOUND");
    }

    #[test]
    fn bad_gateway_status_code() {
        let err = AppError::BadGateway("escrow down".to_string());
        let (status, code) = err.status_and_code();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(code, "UPSTREAM_ERROR");
    }

    #[test]
    fn internal_status_code() {
        let err = AppError::Internal("db connection failed".to_string());
        let (status, code) = err.status_and_code();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, "INTERNAL_ERROR");
    }

    #[test]
    fn authorization_errors_are_forbidden() {
        assert_eq!(
            status_of(DisputeError::Forbidden("admin only".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(DisputeError::NotAParty {
                user_id: "u".into(),
                dispute_id: "d".into(),
            }),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn preconditions_are_conflicts() {
        assert_eq!(
            status_of(DisputeError::TerminalState {
                dispute_id: DisputeId::new().to_string(),
                state: "resolved".into(),
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(DisputeError::InvalidTransition {
                from: "resolution".into(),
                to: "under_review".into(),
                reason: "stage cannot regress".into(),
            }),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn external_failures_map_to_gateway_or_internal() {
        assert_eq!(
            status_of(DisputeError::Escrow(EscrowError::Unavailable("timeout".into()))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(DisputeError::Store(StoreError::Unavailable("down".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn bad_terms_are_validation_errors() {
        assert_eq!(
            status_of(DisputeError::InvalidTerms("shares exceed held amount".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[tokio::test]
    async fn internal_message_is_hidden() {
        use http_body_util::BodyExt;

        let response = AppError::Internal("password=hunter2".into()).into_response();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error.message, "An internal error occurred");
    }
}
