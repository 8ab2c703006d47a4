//! # Workflow Configuration
//!
//! YAML description of the step graph, attempt quotas, classification
//! tables and reservation lease. Every section is optional; anything left
//! out keeps the standard definition.
//!
//! ```yaml
//! quotas:
//!   registry_cso: 6
//! policies:
//!   registry_ntra:
//!     codes:
//!       NTRA_NOT_OWNER: rejected
//!       NTRA_UNABLE_TO_CONFIRM: ambiguous
//!     unknown_code: ambiguous
//! reservation_lease_secs: 90
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use avs_core::StepId;
use avs_state::{
    AttemptQuotas, GraphError, PolicyError, PolicyTable, StepDependencyGraph, StepNode,
    StepPolicy, StepStateMachine,
};

use crate::limiter::DEFAULT_RESERVATION_LEASE;

/// Errors loading or validating a workflow file.
#[derive(Error, Debug)]
pub enum WorkflowConfigError {
    #[error("cannot read workflow config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid workflow config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid step graph: {0}")]
    Graph(#[from] GraphError),

    #[error("invalid policy: {0}")]
    Policy(#[from] PolicyError),

    /// A quota or policy names a step the graph does not contain.
    #[error("{section} entry for {step}, which is not in the step graph")]
    StepNotInGraph { section: &'static str, step: StepId },

    #[error("reservation_lease_secs must be at least 1")]
    ZeroLease,
}

/// Workflow file contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Full replacement of the standard step graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<Vec<StepNode>>,
    /// Per-step attempt quota overrides.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub quotas: BTreeMap<StepId, u32>,
    /// Per-step classification table overrides. Each entry replaces the
    /// step's whole table.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub policies: BTreeMap<StepId, StepPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_lease_secs: Option<u64>,
}

/// Validated runtime parts of a workflow.
#[derive(Debug, Clone)]
pub struct WorkflowRuntime {
    pub machine: StepStateMachine,
    pub lease: Duration,
}

impl WorkflowConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, WorkflowConfigError> {
        // An empty document deserializes as unit; treat it as "all defaults".
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, WorkflowConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| WorkflowConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Validate and assemble the state machine.
    pub fn build(&self) -> Result<WorkflowRuntime, WorkflowConfigError> {
        let graph = match &self.graph {
            Some(nodes) => StepDependencyGraph::new(nodes.clone())?,
            None => StepDependencyGraph::standard(),
        };

        let mut quotas = AttemptQuotas::standard();
        for (step, quota) in &self.quotas {
            if !graph.contains(*step) {
                return Err(WorkflowConfigError::StepNotInGraph {
                    section: "quotas",
                    step: *step,
                });
            }
            quotas.set(*step, *quota)?;
        }

        let mut policies = PolicyTable::standard();
        for (step, policy) in &self.policies {
            if !graph.contains(*step) {
                return Err(WorkflowConfigError::StepNotInGraph {
                    section: "policies",
                    step: *step,
                });
            }
            policies.set(*step, policy.clone())?;
        }

        let lease = match self.reservation_lease_secs {
            Some(0) => return Err(WorkflowConfigError::ZeroLease),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_RESERVATION_LEASE,
        };

        Ok(WorkflowRuntime {
            machine: StepStateMachine::new(graph, policies, quotas),
            lease,
        })
    }
}

impl WorkflowRuntime {
    /// The standard workflow.
    pub fn standard() -> Self {
        Self {
            machine: StepStateMachine::standard(),
            lease: DEFAULT_RESERVATION_LEASE,
        }
    }

    /// Fully expanded configuration, every section explicit.
    pub fn effective_config(&self) -> WorkflowConfig {
        let graph = self.machine.graph();
        WorkflowConfig {
            graph: Some(graph.nodes().cloned().collect()),
            quotas: graph
                .order()
                .iter()
                .map(|step| (*step, self.machine.quotas().get(*step)))
                .collect(),
            policies: graph
                .order()
                .iter()
                .map(|step| (*step, self.machine.policies().get(*step).into_owned()))
                .collect(),
            reservation_lease_secs: Some(self.lease.as_secs()),
        }
    }
}
