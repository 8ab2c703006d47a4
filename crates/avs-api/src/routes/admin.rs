//! # Administrative Routes
//!
//! Support-staff operations. Every handler requires the admin role.
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | POST | `/v1/admin/sessions/:id/steps/:step/review` | approve or reject a step in manual review |
//! | POST | `/v1/admin/sessions/:id/steps/:step/reset` | reopen a locked or failed step |
//! | POST | `/v1/admin/subjects/:subject_id/reset` | retire the latest session and start over |

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use avs_core::{SessionId, StepId, SubjectId};
use avs_workflow::SessionSnapshot;

use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/admin/sessions/:id/steps/:step/review",
            post(resolve_review),
        )
        .route("/v1/admin/sessions/:id/steps/:step/reset", post(reset_step))
        .route("/v1/admin/subjects/:subject_id/reset", post(reset_subject))
}

/// Manual review decision.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct ReviewDecisionRequest {
    /// `true` marks the step successful, `false` counts as a rejection.
    pub approved: bool,
    /// Reviewer note, logged with the decision.
    #[serde(default)]
    pub note: Option<String>,
}

impl Validate for ReviewDecisionRequest {
    fn validate(&self) -> Result<(), String> {
        match &self.note {
            Some(note) if note.len() > 2000 => Err("note must not exceed 2000 characters".into()),
            _ => Ok(()),
        }
    }
}

/// POST /v1/admin/sessions/{id}/steps/{step}/review — Resolve a manual review.
#[utoipa::path(
    post,
    path = "/v1/admin/sessions/:id/steps/:step/review",
    params(
        ("id" = Uuid, Path, description = "Session UUID"),
        ("step" = String, Path, description = "Step name"),
    ),
    request_body = ReviewDecisionRequest,
    responses(
        (status = 200, description = "Review resolved; updated session"),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 404, description = "Session not found", body = crate::error::ErrorBody),
        (status = 422, description = "Step is not in manual review", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub(crate) async fn resolve_review(
    caller: CallerIdentity,
    State(state): State<AppState>,
    Path((id, step)): Path<(Uuid, String)>,
    body: Result<Json<ReviewDecisionRequest>, JsonRejection>,
) -> Result<Json<SessionSnapshot>, AppError> {
    require_role(&caller, Role::Admin)?;
    let req = extract_validated_json(body)?;
    let step_id: StepId = step.parse()?;
    if let Some(note) = &req.note {
        tracing::info!(session_id = %id, step = %step_id, approved = req.approved, note = %note, "review note");
    }
    let snapshot = state
        .manager
        .resolve_review(SessionId::from_uuid(id), step_id, req.approved)
        .await?;
    Ok(Json(snapshot))
}

/// POST /v1/admin/sessions/{id}/steps/{step}/reset — Reopen a step.
#[utoipa::path(
    post,
    path = "/v1/admin/sessions/:id/steps/:step/reset",
    params(
        ("id" = Uuid, Path, description = "Session UUID"),
        ("step" = String, Path, description = "Step name"),
    ),
    responses(
        (status = 200, description = "Step reopened with a fresh attempt budget"),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 404, description = "Session not found", body = crate::error::ErrorBody),
        (status = 409, description = "Session verified or superseded", body = crate::error::ErrorBody),
        (status = 422, description = "Step is neither locked nor failed", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub(crate) async fn reset_step(
    caller: CallerIdentity,
    State(state): State<AppState>,
    Path((id, step)): Path<(Uuid, String)>,
) -> Result<Json<SessionSnapshot>, AppError> {
    require_role(&caller, Role::Admin)?;
    let step_id: StepId = step.parse()?;
    let snapshot = state
        .manager
        .reset_step(SessionId::from_uuid(id), step_id)
        .await?;
    Ok(Json(snapshot))
}

/// POST /v1/admin/subjects/{subject_id}/reset — Start the subject over.
#[utoipa::path(
    post,
    path = "/v1/admin/subjects/:subject_id/reset",
    params(("subject_id" = String, Path, description = "Appraiser identifier")),
    responses(
        (status = 200, description = "Fresh session; the previous one is superseded"),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 404, description = "Subject has no session", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub(crate) async fn reset_subject(
    caller: CallerIdentity,
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    require_role(&caller, Role::Admin)?;
    let subject_id = SubjectId::new(subject_id)?;
    let snapshot = state.manager.reset_subject(subject_id).await?;
    Ok(Json(snapshot))
}
