//! # Authentication & Authorization Middleware
//!
//! Static bearer tokens with two roles:
//!
//! ```text
//! Bearer {AUTH_TOKEN}    → service  (session and step endpoints)
//! Bearer {ADMIN_TOKEN}   → admin    (everything, including /v1/admin/*)
//! ```
//!
//! When neither token is configured, authentication is disabled and every
//! request runs as admin (local development).
//!
//! Every authenticated request gets a [`CallerIdentity`] injected into the
//! request extensions. Handlers extract it via the `FromRequestParts` impl.

use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use utoipa::ToSchema;

use crate::error::{AppError, ErrorBody, ErrorDetail};

// ── Role ────────────────────────────────────────────────────────────────────

/// Caller roles, ordered by privilege: `Service < Admin`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The marketplace backend acting for an appraiser.
    Service,
    /// Support staff: manual review and resets.
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Admin => "admin",
        }
    }
}

// ── CallerIdentity ──────────────────────────────────────────────────────────

/// Identity of the authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity {
    pub role: Role,
}

impl CallerIdentity {
    /// Check if the caller has at least the given minimum role.
    pub fn has_role(&self, minimum: Role) -> bool {
        self.role >= minimum
    }
}

#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .copied()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

/// Returns 403 Forbidden if the caller's role is insufficient.
pub fn require_role(caller: &CallerIdentity, minimum: Role) -> Result<(), AppError> {
    if caller.has_role(minimum) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "role '{}' required, caller has '{}'",
            minimum.as_str(),
            caller.role.as_str()
        )))
    }
}

// ── Auth Configuration ──────────────────────────────────────────────────────

/// Auth configuration injected into request extensions.
///
/// Custom `Debug` redacts the token values to prevent credential leakage in logs.
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub service_token: Option<String>,
    pub admin_token: Option<String>,
}

impl AuthConfig {
    pub fn is_disabled(&self) -> bool {
        self.service_token.is_none() && self.admin_token.is_none()
    }

    /// Role granted to a presented token, if any. Both tokens are always
    /// compared.
    fn authenticate(&self, provided: &str) -> Option<Role> {
        let admin = self
            .admin_token
            .as_deref()
            .is_some_and(|expected| constant_time_token_eq(provided, expected));
        let service = self
            .service_token
            .as_deref()
            .is_some_and(|expected| constant_time_token_eq(provided, expected));
        match (admin, service) {
            (true, _) => Some(Role::Admin),
            (false, true) => Some(Role::Service),
            (false, false) => None,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("service_token", &self.service_token.as_ref().map(|_| "[REDACTED]"))
            .field("admin_token", &self.admin_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ── Token Validation ────────────────────────────────────────────────────────

/// Constant-time comparison of bearer tokens.
///
/// When lengths differ, performs a dummy comparison to avoid leaking length
/// information through timing variance.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Validate the bearer token and inject the caller's [`CallerIdentity`].
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let config = request
        .extensions()
        .get::<AuthConfig>()
        .cloned()
        .unwrap_or_default();

    if config.is_disabled() {
        request
            .extensions_mut()
            .insert(CallerIdentity { role: Role::Admin });
        return next.run(request).await;
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(value) => match value.strip_prefix("Bearer ") {
            Some(provided) => match config.authenticate(provided) {
                Some(role) => {
                    request.extensions_mut().insert(CallerIdentity { role });
                    next.run(request).await
                }
                None => {
                    tracing::warn!("authentication failed: invalid bearer token");
                    unauthorized_response("invalid bearer token")
                }
            },
            None => {
                tracing::warn!("authentication failed: non-Bearer authorization scheme");
                unauthorized_response("authorization header must use Bearer scheme")
            }
        },
        None => {
            tracing::warn!("authentication failed: missing authorization header");
            unauthorized_response("missing authorization header")
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
            details: None,
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn whoami(caller: CallerIdentity) -> &'static str {
        caller.role.as_str()
    }

    fn test_app(config: AuthConfig) -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .layer(from_fn(auth_middleware))
            .layer(axum::Extension(config))
    }

    fn tokens() -> AuthConfig {
        AuthConfig {
            service_token: Some("svc-secret".into()),
            admin_token: Some("admin-secret".into()),
        }
    }

    async fn call(app: Router, authorization: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri("/whoami");
        if let Some(value) = authorization {
            builder = builder.header("Authorization", value);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn tokens_map_to_roles() {
        assert_eq!(
            call(test_app(tokens()), Some("Bearer svc-secret")).await,
            (StatusCode::OK, "service".to_string())
        );
        assert_eq!(
            call(test_app(tokens()), Some("Bearer admin-secret")).await,
            (StatusCode::OK, "admin".to_string())
        );
    }

    #[tokio::test]
    async fn bad_credentials_are_rejected() {
        let (status, body) = call(test_app(tokens()), Some("Bearer svc-secre")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("UNAUTHORIZED"));

        let (status, _) = call(test_app(tokens()), Some("Basic svc-secret")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(test_app(tokens()), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn disabled_auth_runs_as_admin() {
        assert_eq!(
            call(test_app(AuthConfig::default()), None).await,
            (StatusCode::OK, "admin".to_string())
        );
    }

    #[tokio::test]
    async fn admin_only_config_rejects_service_callers() {
        let config = AuthConfig {
            service_token: None,
            admin_token: Some("admin-secret".into()),
        };
        let (status, _) = call(test_app(config), Some("Bearer svc-secret")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn require_role_orders_privileges() {
        let service = CallerIdentity { role: Role::Service };
        let admin = CallerIdentity { role: Role::Admin };
        assert!(require_role(&admin, Role::Service).is_ok());
        assert!(require_role(&admin, Role::Admin).is_ok());
        assert!(matches!(
            require_role(&service, Role::Admin),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn debug_redacts_tokens() {
        let rendered = format!("{:?}", tokens());
        assert!(!rendered.contains("svc-secret"));
        assert!(!rendered.contains("admin-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
