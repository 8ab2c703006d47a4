//! # Step Record Lifecycle
//!
//! One record per step in a session. Records enforce the per-step
//! transition rules and the attempt invariant; guards that depend on other
//! steps (dependencies, session status) live in [`crate::StepStateMachine`].
//!
//! ## States
//!
//! ```text
//! Pending ──▶ AwaitingInput ──▶ Submitted ──┬──▶ Success
//!                  ▲                         ├──▶ Failed ──┬──▶ AwaitingInput (attempts remain)
//!                  │                         │             └──▶ Locked
//!                  │                         └──▶ ManualReview ──▶ Success | Failed
//!                  └────────────── release (transient failure, attempt refunded)
//! ```
//!
//! A `hard_fail` result leaves the record in `Failed` permanently. Only an
//! administrative reset moves a `Locked` or `Failed` record back to
//! `AwaitingInput`.
//!
//! ## Invariant
//!
//! `attempts_used <= max_attempts` after every method, successful or not.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use avs_core::{ProviderResult, ProviderStatus, StepId, Timestamp, TransactionId};

use crate::policy::Classification;

// ─── Step Status ─────────────────────────────────────────────────────

/// Lifecycle status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Dependencies not yet satisfied.
    Pending,
    /// Ready for a submission.
    AwaitingInput,
    /// A provider call is in flight under a reservation.
    Submitted,
    /// Completed successfully.
    Success,
    /// Definitively failed.
    Failed,
    /// Waiting for human adjudication.
    ManualReview,
    /// Attempt budget exhausted.
    Locked,
}

impl StepStatus {
    /// The snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingInput => "awaiting_input",
            Self::Submitted => "submitted",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::ManualReview => "manual_review",
            Self::Locked => "locked",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors from step transitions and submission guards.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// The step is not part of the session's dependency graph.
    #[error("step {0} is not part of this verification workflow")]
    UnknownStep(StepId),

    /// Dependencies of the step have not succeeded yet.
    #[error("step {step} is not eligible: waiting on {}", format_steps(.waiting_on))]
    DependenciesUnmet {
        /// The step that was submitted.
        step: StepId,
        /// Dependencies not yet in `success`.
        waiting_on: Vec<StepId>,
    },

    /// The step already succeeded.
    #[error("step {0} is already complete")]
    AlreadyComplete(StepId),

    /// The step is waiting for manual review.
    #[error("step {0} is under manual review")]
    UnderReview(StepId),

    /// The step failed with a non-retryable result.
    #[error("step {0} failed permanently")]
    HardFailed(StepId),

    /// No attempts left, or the step is locked.
    #[error("step {step} has used {attempts_used} of {max_attempts} attempts")]
    AttemptsExhausted {
        /// The exhausted step.
        step: StepId,
        /// Attempts consumed.
        attempts_used: u32,
        /// Attempt budget.
        max_attempts: u32,
    },

    /// A provider call for the step is already in flight.
    #[error("a submission for step {0} is already in flight")]
    InFlight(StepId),

    /// The reservation being committed or rolled back no longer owns the step.
    #[error("reservation {reservation_id} no longer holds step {step}")]
    ReservationMismatch {
        /// The step.
        step: StepId,
        /// The stale reservation.
        reservation_id: Uuid,
    },

    /// The requested transition is not valid from the current status.
    #[error("cannot {action} step {step} from status {from}")]
    InvalidTransition {
        /// The step.
        step: StepId,
        /// Current status.
        from: StepStatus,
        /// What was attempted.
        action: &'static str,
    },
}

fn format_steps(steps: &[StepId]) -> String {
    steps
        .iter()
        .map(StepId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

// ─── Record Parts ────────────────────────────────────────────────────

/// Normalized summary of the last classified provider result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    /// Provider verdict.
    pub provider_status: ProviderStatus,
    /// Bucket assigned by the step policy (or by a reviewer).
    pub classification: Classification,
    /// Score the policy used, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Provider error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Raw provider payload (scores, extracted fields, URLs).
    #[serde(default)]
    pub detail: serde_json::Value,
    /// When the result was recorded.
    pub recorded_at: Timestamp,
}

impl ResultSummary {
    /// Summarize a classified provider result.
    pub fn new(
        result: &ProviderResult,
        classification: Classification,
        confidence: Option<f64>,
        now: Timestamp,
    ) -> Self {
        Self {
            provider_status: result.status,
            classification,
            confidence,
            error_code: result.error_code.clone(),
            detail: result.raw.clone(),
            recorded_at: now,
        }
    }
}

/// Marker of an in-flight reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationMarker {
    /// Token returned to the reserving caller.
    pub id: Uuid,
    /// When the attempt was reserved.
    pub reserved_at: Timestamp,
}

/// Record of a step status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTransitionRecord {
    /// Status before the transition.
    pub from: StepStatus,
    /// Status after the transition.
    pub to: StepStatus,
    /// When the transition occurred.
    pub at: Timestamp,
    /// Reason for the transition.
    pub reason: String,
}

// ─── Step Record ─────────────────────────────────────────────────────

/// Durable state of one verification step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// The step.
    pub step_id: StepId,
    /// Current status.
    pub status: StepStatus,
    /// Attempts consumed so far.
    pub attempts_used: u32,
    /// Attempt budget.
    pub max_attempts: u32,
    /// Transaction reference of the last provider call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transaction_id: Option<TransactionId>,
    /// Last classified result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<ResultSummary>,
    /// When the step reached `success`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// In-flight reservation, while `Submitted`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation: Option<ReservationMarker>,
    /// Ordered log of status transitions.
    #[serde(default)]
    pub history: Vec<StepTransitionRecord>,
}

impl StepRecord {
    /// A fresh record in `Pending`.
    pub fn new(step_id: StepId, max_attempts: u32) -> Self {
        Self {
            step_id,
            status: StepStatus::Pending,
            attempts_used: 0,
            max_attempts,
            last_transaction_id: None,
            result_summary: None,
            completed_at: None,
            reservation: None,
            history: Vec::new(),
        }
    }

    /// Attempts left before the step locks.
    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts_used)
    }

    /// Whether the step failed with a `hard_fail` classification.
    pub fn is_hard_failed(&self) -> bool {
        self.status == StepStatus::Failed
            && self
                .result_summary
                .as_ref()
                .is_some_and(|s| s.classification == Classification::HardFail)
    }

    /// Whether a live (non-expired) reservation holds the step.
    pub fn in_flight(&self, now: Timestamp, lease: Duration) -> bool {
        self.status == StepStatus::Submitted
            && self
                .reservation
                .is_some_and(|r| !r.reserved_at.has_elapsed(lease, now))
    }

    /// Whether the subject has interacted with the step at all.
    pub fn has_progress(&self) -> bool {
        !matches!(self.status, StepStatus::Pending | StepStatus::AwaitingInput)
            || self.attempts_used > 0
            || self.last_transaction_id.is_some()
    }

    /// Open the step for input (PENDING → AWAITING_INPUT).
    pub fn open(&mut self, now: Timestamp) -> Result<(), StepError> {
        self.require(StepStatus::Pending, "open")?;
        self.transition(StepStatus::AwaitingInput, now, "dependencies satisfied");
        Ok(())
    }

    /// Reserve one attempt (AWAITING_INPUT → SUBMITTED).
    ///
    /// A `Submitted` step whose reservation is older than `lease` was
    /// orphaned by an interrupted call; it is taken over without charging
    /// another attempt. Refusals never mutate the record.
    pub fn reserve(
        &mut self,
        reservation_id: Uuid,
        now: Timestamp,
        lease: Duration,
    ) -> Result<u32, StepError> {
        match self.status {
            StepStatus::Locked => Err(self.exhausted()),
            StepStatus::AwaitingInput => {
                if self.attempts_used >= self.max_attempts {
                    return Err(self.exhausted());
                }
                self.attempts_used += 1;
                self.reservation = Some(ReservationMarker {
                    id: reservation_id,
                    reserved_at: now,
                });
                self.transition(StepStatus::Submitted, now, "attempt reserved");
                Ok(self.attempts_used)
            }
            StepStatus::Submitted if self.in_flight(now, lease) => {
                Err(StepError::InFlight(self.step_id))
            }
            StepStatus::Submitted => {
                self.reservation = Some(ReservationMarker {
                    id: reservation_id,
                    reserved_at: now,
                });
                self.transition(StepStatus::Submitted, now, "orphaned reservation reclaimed");
                Ok(self.attempts_used)
            }
            from => Err(StepError::InvalidTransition {
                step: self.step_id,
                from,
                action: "reserve",
            }),
        }
    }

    /// Roll back a reservation (SUBMITTED → AWAITING_INPUT), refunding the
    /// attempt.
    pub fn release(&mut self, reservation_id: Uuid, now: Timestamp) -> Result<(), StepError> {
        self.require_reservation(reservation_id)?;
        self.attempts_used = self.attempts_used.saturating_sub(1);
        self.reservation = None;
        self.transition(StepStatus::AwaitingInput, now, "provider unavailable, attempt refunded");
        Ok(())
    }

    /// Apply a classified provider result to a reserved attempt.
    ///
    /// | Classification | Outcome |
    /// |----------------|---------|
    /// | success | `Success` |
    /// | rejected | `Failed`, then `AwaitingInput` or `Locked` |
    /// | hard_fail | `Failed` (stays) |
    /// | ambiguous | `ManualReview`, attempt refunded |
    pub fn settle(
        &mut self,
        reservation_id: Uuid,
        transaction_id: TransactionId,
        summary: ResultSummary,
        now: Timestamp,
    ) -> Result<StepStatus, StepError> {
        self.require_reservation(reservation_id)?;
        self.reservation = None;
        self.last_transaction_id = Some(transaction_id);
        let classification = summary.classification;
        let code = summary.error_code.clone();
        self.result_summary = Some(summary);

        match classification {
            Classification::Success => {
                self.completed_at = Some(now);
                self.transition(StepStatus::Success, now, "provider result accepted");
            }
            Classification::Rejected => {
                let reason = match &code {
                    Some(code) => format!("rejected by provider: {code}"),
                    None => "rejected by provider".to_string(),
                };
                self.transition(StepStatus::Failed, now, &reason);
                self.after_failure(now);
            }
            Classification::HardFail => {
                let reason = match &code {
                    Some(code) => format!("hard failure: {code}"),
                    None => "hard failure".to_string(),
                };
                self.transition(StepStatus::Failed, now, &reason);
            }
            Classification::Ambiguous => {
                self.attempts_used = self.attempts_used.saturating_sub(1);
                self.transition(StepStatus::ManualReview, now, "indeterminate result, sent to review");
            }
        }
        Ok(self.status)
    }

    /// Record an OTP delivery. No attempt is charged and the status does
    /// not change.
    pub fn record_dispatch(&mut self, transaction_id: TransactionId) -> Result<(), StepError> {
        match self.status {
            StepStatus::AwaitingInput if self.attempts_used < self.max_attempts => {
                self.last_transaction_id = Some(transaction_id);
                Ok(())
            }
            StepStatus::AwaitingInput | StepStatus::Locked => Err(self.exhausted()),
            from => Err(StepError::InvalidTransition {
                step: self.step_id,
                from,
                action: "dispatch",
            }),
        }
    }

    /// Resolve a manual review. Rejection consumes the refunded attempt.
    pub fn resolve_review(&mut self, approved: bool, now: Timestamp) -> Result<StepStatus, StepError> {
        self.require(StepStatus::ManualReview, "resolve review of")?;
        let classification = if approved {
            Classification::Success
        } else {
            Classification::Rejected
        };
        if let Some(summary) = self.result_summary.as_mut() {
            summary.classification = classification;
            summary.recorded_at = now;
        }

        if approved {
            self.completed_at = Some(now);
            self.transition(StepStatus::Success, now, "approved in manual review");
        } else {
            self.attempts_used = (self.attempts_used + 1).min(self.max_attempts);
            self.transition(StepStatus::Failed, now, "rejected in manual review");
            self.after_failure(now);
        }
        Ok(self.status)
    }

    /// Administrative reset (LOCKED | FAILED → AWAITING_INPUT), zeroing the
    /// attempt counter.
    pub fn admin_reset(&mut self, now: Timestamp) -> Result<(), StepError> {
        if !matches!(self.status, StepStatus::Locked | StepStatus::Failed) {
            return Err(StepError::InvalidTransition {
                step: self.step_id,
                from: self.status,
                action: "reset",
            });
        }
        self.attempts_used = 0;
        self.reservation = None;
        self.completed_at = None;
        self.transition(StepStatus::AwaitingInput, now, "administrative reset");
        Ok(())
    }

    fn after_failure(&mut self, now: Timestamp) {
        if self.attempts_used < self.max_attempts {
            self.transition(StepStatus::AwaitingInput, now, "retry allowed");
        } else {
            self.transition(StepStatus::Locked, now, "attempts exhausted");
        }
    }

    fn exhausted(&self) -> StepError {
        StepError::AttemptsExhausted {
            step: self.step_id,
            attempts_used: self.attempts_used,
            max_attempts: self.max_attempts,
        }
    }

    fn require(&self, expected: StepStatus, action: &'static str) -> Result<(), StepError> {
        if self.status != expected {
            return Err(StepError::InvalidTransition {
                step: self.step_id,
                from: self.status,
                action,
            });
        }
        Ok(())
    }

    fn require_reservation(&self, reservation_id: Uuid) -> Result<(), StepError> {
        let held = self.status == StepStatus::Submitted
            && self.reservation.is_some_and(|r| r.id == reservation_id);
        if !held {
            return Err(StepError::ReservationMismatch {
                step: self.step_id,
                reservation_id,
            });
        }
        Ok(())
    }

    fn transition(&mut self, to: StepStatus, now: Timestamp, reason: &str) {
        self.history.push(StepTransitionRecord {
            from: self.status,
            to,
            at: now,
            reason: reason.to_string(),
        });
        self.status = to;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
