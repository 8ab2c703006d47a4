//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor. Session state itself lives behind the
//! manager's [`SessionStore`](avs_workflow::SessionStore); nothing here is
//! mutable.

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::PgPool;

use avs_workflow::VerificationSessionManager;

/// Application configuration.
///
/// Custom `Debug` redacts the tokens to prevent credential leakage in logs.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Bearer token for service callers. `None` with no admin token
    /// disables authentication.
    pub auth_token: Option<String>,
    /// Bearer token for administrative callers.
    pub admin_token: Option<String>,
    /// Workflow YAML overriding the standard graph, quotas and policies.
    pub workflow_config: Option<PathBuf>,
}

impl AppConfig {
    /// Read `PORT`, `AUTH_TOKEN`, `ADMIN_TOKEN` and `WORKFLOW_CONFIG`.
    /// `DATABASE_URL` is read by [`crate::db::init_pool`].
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            port: non_empty("PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(8080),
            auth_token: non_empty("AUTH_TOKEN"),
            admin_token: non_empty("ADMIN_TOKEN"),
            workflow_config: non_empty("WORKFLOW_CONFIG").map(PathBuf::from),
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("admin_token", &self.admin_token.as_ref().map(|_| "[REDACTED]"))
            .field("workflow_config", &self.workflow_config)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
            admin_token: None,
            workflow_config: None,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub manager: Arc<VerificationSessionManager>,
    /// PostgreSQL pool when `DATABASE_URL` is set.
    pub db_pool: Option<PgPool>,
}

impl AppState {
    pub fn new(config: AppConfig, manager: VerificationSessionManager, db_pool: Option<PgPool>) -> Self {
        Self {
            config,
            manager: Arc::new(manager),
            db_pool,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .field("db_pool", &self.db_pool.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "9090"),
            ("AUTH_TOKEN", "svc"),
            ("ADMIN_TOKEN", ""),
            ("WORKFLOW_CONFIG", "/etc/avs/workflow.yaml"),
        ]
        .into_iter()
        .collect();
        let config = AppConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.port, 9090);
        assert_eq!(config.auth_token.as_deref(), Some("svc"));
        assert_eq!(config.admin_token, None);
        assert_eq!(config.workflow_config, Some(PathBuf::from("/etc/avs/workflow.yaml")));
    }

    #[test]
    fn unparseable_port_falls_back() {
        let config = AppConfig::from_lookup(|k| (k == "PORT").then(|| "http".to_string()));
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn debug_redacts_tokens() {
        let config = AppConfig {
            auth_token: Some("svc-secret".into()),
            admin_token: Some("admin-secret".into()),
            ..AppConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
    }
}
