//! # OpenAPI Specification Assembly
//!
//! Assembles the utoipa-documented routes into one OpenAPI document served
//! at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Appraiser Verification Service",
        version = "0.1.0",
        description = "Multi-step identity verification for appraisers: OTP, document, biometrics, registry validation and headshot generation.",
        license(name = "BUSL-1.1")
    ),
    paths(
        crate::routes::sessions::create_session,
        crate::routes::sessions::get_session,
        crate::routes::sessions::submit_step,
        crate::routes::admin::resolve_review,
        crate::routes::admin::reset_step,
        crate::routes::admin::reset_subject,
    ),
    components(schemas(
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        crate::auth::Role,
        crate::routes::sessions::CreateSessionRequest,
        crate::routes::sessions::SubmitStepRequest,
        crate::routes::admin::ReviewDecisionRequest,
    )),
    tags(
        (name = "verification", description = "Session lifecycle and step submission"),
        (name = "admin", description = "Manual review and resets"),
    )
)]
pub struct ApiDoc;

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json — Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
