//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Workflow refusals keep their stable machine-readable codes; only the
//! HTTP status is chosen here. Internal details never reach the client.
//!
//! | Code | Status |
//! |------|--------|
//! | `SESSION_NOT_FOUND` | 404 |
//! | `SESSION_TERMINAL`, `SESSION_SUPERSEDED`, `STEP_IN_FLIGHT`, `STALE_SESSION_VERSION`, `ALREADY_VERIFIED`, `RESERVATION_LOST` | 409 |
//! | `STEP_NOT_ELIGIBLE`, `INVALID_INPUT` | 422 |
//! | `ATTEMPTS_EXHAUSTED` | 423 |
//! | `PROVIDER_ERROR`, `DOMAIN_REJECTION` | 502 |
//! | `PROVIDER_UNAVAILABLE` | 503 |
//! | `STORE_ERROR` | 500 |

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use avs_workflow::WorkflowError;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "ATTEMPTS_EXHAUSTED").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details, present only for some client errors.
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

    /// Insufficient role (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Refusal from the verification workflow, status by code.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status and machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Workflow(err) => (workflow_status(err), err.code()),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Internal(_) | Self::Workflow(WorkflowError::Store(_))
        )
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Workflow(WorkflowError::AttemptsExhausted {
                step,
                attempts_used,
                max_attempts,
            }) => Some(json!({
                "step_id": step,
                "attempts_used": attempts_used,
                "max_attempts": max_attempts,
            })),
            Self::Workflow(WorkflowError::StaleSessionVersion {
                expected, actual, ..
            }) => Some(json!({
                "expected_version": expected,
                "current_version": actual,
            })),
            Self::Workflow(WorkflowError::SessionSuperseded { superseded_by, .. }) => {
                Some(json!({ "superseded_by": superseded_by }))
            }
            _ => None,
        }
    }
}

fn workflow_status(err: &WorkflowError) -> StatusCode {
    match err {
        WorkflowError::SessionNotFound(_) | WorkflowError::SubjectNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        WorkflowError::SessionTerminal { .. }
        | WorkflowError::SessionSuperseded { .. }
        | WorkflowError::StepInFlight(_)
        | WorkflowError::StaleSessionVersion { .. }
        | WorkflowError::AlreadyVerified { .. }
        | WorkflowError::ReservationLost { .. } => StatusCode::CONFLICT,
        WorkflowError::StepNotEligible(_) | WorkflowError::InvalidInput(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        WorkflowError::AttemptsExhausted { .. } => StatusCode::LOCKED,
        WorkflowError::ProviderError { .. } | WorkflowError::DomainRejection { .. } => {
            StatusCode::BAD_GATEWAY
        }
        WorkflowError::ProviderUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        WorkflowError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Never expose internal error messages to clients.
        let message = if self.is_internal() {
            tracing::error!(error = %self, "internal server error");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: self.details(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<avs_core::ValidationError> for AppError {
    fn from(err: avs_core::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avs_core::{SessionId, StepId, SubjectId};
    use avs_gateway::{Capability, ProviderError};
    use http_body_util::BodyExt;

    fn status_of(err: WorkflowError) -> (StatusCode, &'static str) {
        AppError::from(err).status_and_code()
    }

    #[test]
    fn plain_status_codes() {
        assert_eq!(
            AppError::NotFound("x".into()).status_and_code(),
            (StatusCode::NOT_FOUND, "NOT_FOUND")
        );
        assert_eq!(
            AppError::Validation("x".into()).status_and_code(),
            (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR")
        );
        assert_eq!(
            AppError::Forbidden("x".into()).status_and_code(),
            (StatusCode::FORBIDDEN, "FORBIDDEN")
        );
        assert_eq!(
            AppError::Internal("x".into()).status_and_code(),
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        );
    }

    #[test]
    fn workflow_errors_keep_their_codes() {
        let id = SessionId::new();
        assert_eq!(
            status_of(WorkflowError::SessionNotFound(id)),
            (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND")
        );
        assert_eq!(
            status_of(WorkflowError::StaleSessionVersion {
                session_id: id,
                expected: 1,
                actual: 2
            }),
            (StatusCode::CONFLICT, "STALE_SESSION_VERSION")
        );
        assert_eq!(
            status_of(WorkflowError::AlreadyVerified {
                subject_id: SubjectId::new("a-1").unwrap(),
                session_id: id
            }),
            (StatusCode::CONFLICT, "ALREADY_VERIFIED")
        );
        assert_eq!(
            status_of(WorkflowError::AttemptsExhausted {
                step: StepId::Document,
                attempts_used: 3,
                max_attempts: 3
            }),
            (StatusCode::LOCKED, "ATTEMPTS_EXHAUSTED")
        );
        assert_eq!(
            status_of(WorkflowError::InvalidInput("x".into())),
            (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_INPUT")
        );
        let timeout = ProviderError::Timeout {
            capability: Capability::SubmitDocument,
            elapsed_ms: 30_000,
        };
        assert_eq!(
            status_of(WorkflowError::from_provider(StepId::Document, timeout)),
            (StatusCode::SERVICE_UNAVAILABLE, "PROVIDER_UNAVAILABLE")
        );
        let rejected = ProviderError::RequestRejected {
            capability: Capability::SubmitDocument,
            status: 400,
            body: String::new(),
        };
        assert_eq!(
            status_of(WorkflowError::from_provider(StepId::Document, rejected)),
            (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR")
        );
    }

    #[tokio::test]
    async fn store_errors_are_not_leaked() {
        let response =
            AppError::from(WorkflowError::Store("connection refused to 10.0.0.7".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.error.code, "STORE_ERROR");
        assert!(!body.error.message.contains("10.0.0.7"));
    }

    #[tokio::test]
    async fn exhaustion_carries_attempt_details() {
        let response = AppError::from(WorkflowError::AttemptsExhausted {
            step: StepId::RegistryNtra,
            attempts_used: 10,
            max_attempts: 10,
        })
        .into_response();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&body).unwrap();
        let details = body.error.details.unwrap();
        assert_eq!(details["step_id"], "registry_ntra");
        assert_eq!(details["max_attempts"], 10);
    }
}
