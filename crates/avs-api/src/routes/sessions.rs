//! # Verification Session Routes
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | POST | `/v1/verification/sessions` | create or resume the subject's session |
//! | POST | `/v1/verification/sessions/:id/steps` | submit one step |
//! | GET | `/v1/verification/sessions/:id` | session status and derived result |

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use avs_core::{SessionId, StepId, SubjectId};
use avs_workflow::{SessionSnapshot, StepOutcome};

use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/verification/sessions", post(create_session))
        .route("/v1/verification/sessions/:id", get(get_session))
        .route("/v1/verification/sessions/:id/steps", post(submit_step))
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Start or resume verification for an appraiser.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CreateSessionRequest {
    /// Marketplace identifier of the appraiser.
    pub subject_id: String,
}

/// Submit one verification step.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct SubmitStepRequest {
    /// Step name, e.g. `document` or `registry_ntra`.
    pub step_id: String,
    /// Step payload. Its shape depends on the step.
    #[schema(value_type = Object)]
    pub provider_input: serde_json::Value,
    /// Session version the caller last saw. A mismatch is refused with
    /// `STALE_SESSION_VERSION`.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl Validate for CreateSessionRequest {
    fn validate(&self) -> Result<(), String> {
        SubjectId::new(self.subject_id.as_str())
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

impl Validate for SubmitStepRequest {
    fn validate(&self) -> Result<(), String> {
        self.step_id
            .parse::<StepId>()
            .map(|_| ())
            .map_err(|e| e.to_string())?;
        if !self.provider_input.is_object() {
            return Err("provider_input must be a JSON object".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/verification/sessions — Create or resume a session.
///
/// Returns the subject's in-progress or failed session unchanged when one
/// exists; a verified subject is refused.
#[utoipa::path(
    post,
    path = "/v1/verification/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "New or resumed verification session"),
        (status = 409, description = "Subject already verified", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid subject id", body = crate::error::ErrorBody),
    ),
    tag = "verification"
)]
pub(crate) async fn create_session(
    State(state): State<AppState>,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let req = extract_validated_json(body)?;
    let subject_id = SubjectId::new(req.subject_id)?;
    let snapshot = state.manager.initiate(subject_id).await?;
    Ok(Json(snapshot))
}

/// GET /v1/verification/sessions/{id} — Session status.
#[utoipa::path(
    get,
    path = "/v1/verification/sessions/:id",
    params(("id" = Uuid, Path, description = "Session UUID")),
    responses(
        (status = 200, description = "Session status with per-step progress and derived result"),
        (status = 404, description = "Session not found", body = crate::error::ErrorBody),
    ),
    tag = "verification"
)]
pub(crate) async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let snapshot = state.manager.get_status(SessionId::from_uuid(id)).await?;
    Ok(Json(snapshot))
}

/// POST /v1/verification/sessions/{id}/steps — Submit one step.
///
/// Domain rejections, hard failures and inconclusive results are recorded
/// attempts and return 200 with an `outcome_code`. Provider outages return
/// 503 and charge no attempt.
#[utoipa::path(
    post,
    path = "/v1/verification/sessions/:id/steps",
    params(("id" = Uuid, Path, description = "Session UUID")),
    request_body = SubmitStepRequest,
    responses(
        (status = 200, description = "Attempt recorded"),
        (status = 404, description = "Session not found", body = crate::error::ErrorBody),
        (status = 409, description = "Session terminal, superseded, stale or step in flight", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid input or step not eligible", body = crate::error::ErrorBody),
        (status = 423, description = "Step attempts exhausted", body = crate::error::ErrorBody),
        (status = 502, description = "Provider error", body = crate::error::ErrorBody),
        (status = 503, description = "Provider unavailable", body = crate::error::ErrorBody),
    ),
    tag = "verification"
)]
pub(crate) async fn submit_step(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Result<Json<SubmitStepRequest>, JsonRejection>,
) -> Result<Json<StepOutcome>, AppError> {
    let req = extract_validated_json(body)?;
    let step_id: StepId = req.step_id.parse()?;
    let outcome = state
        .manager
        .submit_step(
            SessionId::from_uuid(id),
            step_id,
            &req.provider_input,
            req.expected_version,
        )
        .await?;
    Ok(Json(outcome))
}
