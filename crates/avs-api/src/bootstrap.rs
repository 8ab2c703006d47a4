//! # Service Bootstrap
//!
//! Assembles the application state at startup:
//!
//! 1. **Workflow**: `WORKFLOW_CONFIG` YAML, or the standard workflow.
//! 2. **Gateway**: provider URLs from `PROVIDER_*`, all required unless
//!    `PROVIDER_MODE=mock`. Wrapped with timeouts and retries.
//! 3. **Lease check**: the reservation lease must outlast the slowest
//!    possible gateway call, retries and backoff included.
//! 4. **Store**: PostgreSQL when a pool is given, in-memory otherwise.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use avs_gateway::{ConfigError, GatewayConfig, ProviderSuite, ResilientGateway};
use avs_workflow::{
    InMemorySessionStore, SessionStore, VerificationSessionManager, WorkflowConfig,
    WorkflowConfigError, WorkflowRuntime,
};

use crate::db::sessions::PgSessionStore;
use crate::state::{AppConfig, AppState};

/// Errors during service bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("workflow configuration: {0}")]
    Workflow(#[from] WorkflowConfigError),

    #[error("gateway configuration: {0}")]
    Gateway(#[from] ConfigError),

    #[error(
        "reservation lease {lease:?} does not outlast the worst-case provider call {worst_case:?}; \
         raise reservation_lease_secs or lower PROVIDER_MAX_RETRIES / timeouts"
    )]
    LeaseTooShort {
        lease: Duration,
        worst_case: Duration,
    },
}

/// Load the workflow named by the configuration.
pub fn load_workflow(config: &AppConfig) -> Result<WorkflowRuntime, WorkflowConfigError> {
    match &config.workflow_config {
        Some(path) => {
            let runtime = WorkflowConfig::from_path(path)?.build()?;
            tracing::info!(path = %path.display(), "workflow configuration loaded");
            Ok(runtime)
        }
        None => Ok(WorkflowRuntime::standard()),
    }
}

/// Build the application state.
pub fn bootstrap(
    config: AppConfig,
    gateway_config: &GatewayConfig,
    db_pool: Option<PgPool>,
) -> Result<AppState, BootstrapError> {
    let runtime = load_workflow(&config)?;

    let suite = ProviderSuite::from_config(gateway_config)?;
    let policy = gateway_config.retry_policy();
    let worst_case = policy.worst_case_duration();
    if runtime.lease <= worst_case {
        return Err(BootstrapError::LeaseTooShort {
            lease: runtime.lease,
            worst_case,
        });
    }
    let gateway = ResilientGateway::new(suite, policy);

    let store: Arc<dyn SessionStore> = match &db_pool {
        Some(pool) => Arc::new(PgSessionStore::new(pool.clone())),
        None => Arc::new(InMemorySessionStore::new()),
    };

    tracing::info!(
        steps = runtime.machine.graph().order().len(),
        lease_secs = runtime.lease.as_secs(),
        persistent = db_pool.is_some(),
        mock_providers = gateway_config.is_mock(),
        "verification service configured"
    );

    let manager = VerificationSessionManager::new(store, Arc::new(gateway), runtime);
    Ok(AppState::new(config, manager, db_pool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn standard_workflow_without_config() {
        let state = bootstrap(AppConfig::default(), &GatewayConfig::local_mock(), None).unwrap();
        assert_eq!(state.manager.machine().graph().order().len(), 8);
        assert!(state.db_pool.is_none());
    }

    #[test]
    fn workflow_file_is_applied() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "reservation_lease_secs: 150").unwrap();
        let config = AppConfig {
            workflow_config: Some(file.path().to_path_buf()),
            ..AppConfig::default()
        };
        let state = bootstrap(config, &GatewayConfig::local_mock(), None).unwrap();
        assert_eq!(state.manager.lease().as_secs(), 150);
    }

    #[test]
    fn lease_shorter_than_worst_case_call_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "reservation_lease_secs: 45").unwrap();
        let config = AppConfig {
            workflow_config: Some(file.path().to_path_buf()),
            ..AppConfig::default()
        };
        let err = bootstrap(config.clone(), &GatewayConfig::local_mock(), None).unwrap_err();
        match err {
            BootstrapError::LeaseTooShort { lease, worst_case } => {
                assert_eq!(lease, Duration::from_secs(45));
                assert_eq!(worst_case, Duration::from_millis(91_500));
            }
            other => panic!("expected LeaseTooShort, got {other:?}"),
        }

        // Without retries a 30s call fits inside 45s.
        let single_attempt = GatewayConfig {
            max_retries: 0,
            ..GatewayConfig::local_mock()
        };
        assert!(bootstrap(config, &single_attempt, None).is_ok());
    }

    #[test]
    fn partial_provider_configuration_fails() {
        let url = url::Url::parse("https://providers.example.com").unwrap();
        let gateway = GatewayConfig {
            endpoints: avs_core::ProviderCategory::ALL
                .into_iter()
                .filter(|c| *c != avs_core::ProviderCategory::Registry)
                .map(|c| (c, url.clone()))
                .collect(),
            ..GatewayConfig::default()
        };
        let err = bootstrap(AppConfig::default(), &gateway, None).unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Gateway(ConfigError::MissingEndpoint(
                avs_core::ProviderCategory::Registry
            ))
        ));
    }

    #[test]
    fn invalid_workflow_file_fails() {
        let config = AppConfig {
            workflow_config: Some("/nonexistent/workflow.yaml".into()),
            ..AppConfig::default()
        };
        let err = bootstrap(config, &GatewayConfig::local_mock(), None).unwrap_err();
        assert!(matches!(err, BootstrapError::Workflow(WorkflowConfigError::Io { .. })));
    }
}
