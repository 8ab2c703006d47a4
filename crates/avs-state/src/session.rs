//! Verification session model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use avs_core::{SessionId, StepId, SubjectId, Timestamp};

use crate::step::StepRecord;

/// Aggregated status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Nothing has been attempted yet.
    Pending,
    /// At least one step has progressed; none blocks verification.
    InProgress,
    /// Every required step succeeded. Terminal.
    Verified,
    /// A required step is locked or hard-failed. Terminal.
    Failed,
    /// A required step awaits human adjudication.
    ManualReview,
}

impl OverallStatus {
    /// `verified` and `failed` accept no further submissions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Failed)
    }

    /// The snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Verified => "verified",
            Self::Failed => "failed",
            Self::ManualReview => "manual_review",
        }
    }
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OverallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Pending,
            Self::InProgress,
            Self::Verified,
            Self::Failed,
            Self::ManualReview,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
        .ok_or_else(|| format!("unknown overall status: {s}"))
    }
}

/// One subject's verification attempt.
///
/// The persisted record. `version` increases by exactly one with every
/// stored mutation and guards compare-and-swap writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSession {
    /// Session identifier.
    pub session_id: SessionId,
    /// The appraiser being verified.
    pub subject_id: SubjectId,
    /// Aggregated status, recomputed after every transition.
    pub overall_status: OverallStatus,
    /// Creation time.
    pub created_at: Timestamp,
    /// Time of the last stored mutation.
    pub updated_at: Timestamp,
    /// The step the subject should work on next.
    #[serde(default)]
    pub current_step: Option<StepId>,
    /// Optimistic concurrency version.
    pub version: u64,
    /// Step records keyed by step.
    pub steps: BTreeMap<StepId, StepRecord>,
    /// Set when an administrative reset replaced this session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<SessionId>,
}

impl VerificationSession {
    /// Whether the session accepts step submissions at all.
    pub fn is_active(&self) -> bool {
        !self.overall_status.is_terminal() && self.superseded_by.is_none()
    }

    /// Whether the session reached `verified` or `failed`.
    pub fn is_terminal(&self) -> bool {
        self.overall_status.is_terminal()
    }

    /// Record for `step`.
    pub fn step(&self, step: StepId) -> Option<&StepRecord> {
        self.steps.get(&step)
    }

    /// Mutable record for `step`.
    pub fn step_mut(&mut self, step: StepId) -> Option<&mut StepRecord> {
        self.steps.get_mut(&step)
    }

    /// Prepare the next stored version.
    pub fn bump_version(&mut self, now: Timestamp) {
        self.version += 1;
        self.updated_at = now;
    }
}
