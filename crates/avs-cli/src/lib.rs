//! # avs-cli — Operator Tooling for the Verification Service
//!
//! Validates and inspects workflow configuration files before they are
//! handed to the API server through `WORKFLOW_CONFIG`.
//!
//! ## Subcommands
//!
//! - `avs config check <path>` — validate a workflow file.
//! - `avs config show [--config <path>]` — print the effective configuration.
//! - `avs graph [--config <path>]` — print the step graph with quotas.

pub mod config;
pub mod graph;

use std::path::Path;

use anyhow::{Context, Result};

use avs_workflow::{WorkflowConfig, WorkflowRuntime};

/// Load and validate the workflow at `path`, or the standard workflow.
pub fn load_runtime(path: Option<&Path>) -> Result<WorkflowRuntime> {
    match path {
        Some(path) => {
            let config = WorkflowConfig::from_path(path)?;
            let runtime = config
                .build()
                .with_context(|| format!("workflow config {} is invalid", path.display()))?;
            tracing::info!(path = %path.display(), "workflow configuration loaded");
            Ok(runtime)
        }
        None => {
            tracing::debug!("no workflow config given, using the standard workflow");
            Ok(WorkflowRuntime::standard())
        }
    }
}
