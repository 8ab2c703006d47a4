//! # avs-api — HTTP Surface of the Verification Service
//!
//! ## API Surface
//!
//! | Prefix | Module | Access |
//! |--------|--------|--------|
//! | `/v1/verification/sessions*` | [`routes::sessions`] | service, admin |
//! | `/v1/admin/*` | [`routes::admin`] | admin |
//! | `/openapi.json` | [`openapi`] | service, admin |
//! | `/health/*` | this module | unauthenticated |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → AuthMiddleware → Handler
//! ```

pub mod auth;
pub mod bootstrap;
pub mod db;
pub mod error;
pub mod extractors;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes (`/health/*`) are mounted outside the auth middleware
/// so they remain accessible without credentials.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        service_token: state.config.auth_token.clone(),
        admin_token: state.config.admin_token.clone(),
    };

    let api = Router::new()
        .merge(routes::sessions::router())
        .merge(routes::admin::router())
        .merge(openapi::router())
        .layer(from_fn(auth::auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(axum::Extension(auth_config))
        .with_state(state.clone());

    let health = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .with_state(state);

    Router::new().merge(health).merge(api)
}

/// Liveness probe. Always 200 while the process runs.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe. 503 while a configured database is unreachable.
async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match &state.db_pool {
        Some(pool) => match db::ping(pool).await {
            Ok(()) => (StatusCode::OK, "ready"),
            Err(e) => {
                tracing::warn!(error = %e, "readiness check failed: database unreachable");
                (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
            }
        },
        None => (StatusCode::OK, "ready"),
    }
}
