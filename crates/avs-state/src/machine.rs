//! # Step State Machine
//!
//! Session-level transitions: applies the dependency graph guards, the
//! per-step classification tables and the attempt quotas on top of
//! [`StepRecord`] transitions, then recomputes the aggregated status and the
//! current step.
//!
//! Every method takes `now` explicitly and never touches `version`; the
//! caller bumps the version when it stores the result.

use std::time::Duration;

use uuid::Uuid;

use avs_core::{ProviderResult, SessionId, StepId, SubjectId, Timestamp};

use crate::aggregate::{FinalVerificationResult, ResultAggregator};
use crate::graph::StepDependencyGraph;
use crate::policy::{AttemptQuotas, Classification, PolicyTable};
use crate::session::{OverallStatus, VerificationSession};
use crate::step::{ResultSummary, StepError, StepRecord, StepStatus};

/// Outcome of settling a provider result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    /// Bucket the result fell into.
    pub classification: Classification,
    /// Step status after the transition.
    pub status: StepStatus,
    /// Session status after the transition.
    pub overall_status: OverallStatus,
}

/// Graph, policies and quotas of one workflow definition.
#[derive(Debug, Clone)]
pub struct StepStateMachine {
    graph: StepDependencyGraph,
    policies: PolicyTable,
    quotas: AttemptQuotas,
    aggregator: ResultAggregator,
}

impl StepStateMachine {
    /// Machine over a validated graph with its policy tables and quotas.
    pub fn new(graph: StepDependencyGraph, policies: PolicyTable, quotas: AttemptQuotas) -> Self {
        let aggregator = ResultAggregator::new(&graph);
        Self {
            graph,
            policies,
            quotas,
            aggregator,
        }
    }

    /// Standard graph, policy tables and quotas.
    pub fn standard() -> Self {
        Self::new(
            StepDependencyGraph::standard(),
            PolicyTable::standard(),
            AttemptQuotas::standard(),
        )
    }

    /// The dependency graph sessions are created from.
    pub fn graph(&self) -> &StepDependencyGraph {
        &self.graph
    }

    /// Per-step classification tables.
    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Attempt budget per step.
    pub fn quotas(&self) -> &AttemptQuotas {
        &self.quotas
    }

    /// Aggregator deriving overall status and the final result.
    pub fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }

    /// A new session at version 1: every record `Pending` except steps
    /// without dependencies, which open immediately.
    pub fn new_session(
        &self,
        session_id: SessionId,
        subject_id: SubjectId,
        now: Timestamp,
    ) -> VerificationSession {
        let steps = self
            .graph
            .order()
            .iter()
            .map(|step| (*step, StepRecord::new(*step, self.quotas.get(*step))))
            .collect();
        let mut session = VerificationSession {
            session_id,
            subject_id,
            overall_status: OverallStatus::Pending,
            created_at: now,
            updated_at: now,
            current_step: None,
            version: 1,
            steps,
            superseded_by: None,
        };
        self.open_eligible(&mut session, now);
        self.refresh(&mut session, now);
        session
    }

    /// Whether every dependency of `step` is in `success`.
    pub fn dependencies_met(&self, session: &VerificationSession, step: StepId) -> bool {
        self.unmet_dependencies(session, step).is_empty()
    }

    fn unmet_dependencies(&self, session: &VerificationSession, step: StepId) -> Vec<StepId> {
        self.graph
            .dependencies(step)
            .filter(|dep| {
                session
                    .step(*dep)
                    .map_or(true, |r| r.status != StepStatus::Success)
            })
            .collect()
    }

    /// Guard a submission for `step`. Session-level guards (terminal,
    /// superseded) are the caller's concern.
    ///
    /// Lock and budget checks come first so an exhausted step reports
    /// exhaustion whatever else is true.
    pub fn check_submittable(
        &self,
        session: &VerificationSession,
        step: StepId,
        now: Timestamp,
        lease: Duration,
    ) -> Result<(), StepError> {
        let record = self.record(session, step)?;
        let exhausted = StepError::AttemptsExhausted {
            step,
            attempts_used: record.attempts_used,
            max_attempts: record.max_attempts,
        };
        match record.status {
            StepStatus::Locked => return Err(exhausted),
            StepStatus::Success => return Err(StepError::AlreadyComplete(step)),
            StepStatus::ManualReview => return Err(StepError::UnderReview(step)),
            StepStatus::Failed => return Err(StepError::HardFailed(step)),
            StepStatus::Submitted if record.in_flight(now, lease) => {
                return Err(StepError::InFlight(step))
            }
            StepStatus::AwaitingInput if record.attempts_used >= record.max_attempts => {
                return Err(exhausted)
            }
            StepStatus::Pending | StepStatus::AwaitingInput | StepStatus::Submitted => {}
        }

        let waiting_on = self.unmet_dependencies(session, step);
        if !waiting_on.is_empty() || record.status == StepStatus::Pending {
            return Err(StepError::DependenciesUnmet { step, waiting_on });
        }
        Ok(())
    }

    /// The step the subject should work on next.
    ///
    /// First step in topological order whose dependencies are met and which
    /// is awaiting input or in flight; otherwise the first dependency-met
    /// step not yet in `success`; `None` for terminal sessions.
    pub fn current_step(&self, session: &VerificationSession) -> Option<StepId> {
        if session.is_terminal() {
            return None;
        }
        let eligible: Vec<&StepRecord> = self
            .graph
            .order()
            .iter()
            .filter(|s| self.dependencies_met(session, **s))
            .filter_map(|s| session.step(*s))
            .collect();
        eligible
            .iter()
            .find(|r| matches!(r.status, StepStatus::AwaitingInput | StepStatus::Submitted))
            .or_else(|| eligible.iter().find(|r| r.status != StepStatus::Success))
            .map(|r| r.step_id)
    }

    /// Reserve one attempt for `step`.
    pub fn reserve(
        &self,
        session: &mut VerificationSession,
        step: StepId,
        reservation_id: Uuid,
        now: Timestamp,
        lease: Duration,
    ) -> Result<u32, StepError> {
        self.check_submittable(session, step, now, lease)?;
        let attempt = self.record_mut(session, step)?.reserve(reservation_id, now, lease)?;
        self.refresh(session, now);
        Ok(attempt)
    }

    /// Roll back a reservation after a transient provider failure.
    pub fn release(
        &self,
        session: &mut VerificationSession,
        step: StepId,
        reservation_id: Uuid,
        now: Timestamp,
    ) -> Result<(), StepError> {
        self.record_mut(session, step)?.release(reservation_id, now)?;
        self.refresh(session, now);
        Ok(())
    }

    /// Record an OTP delivery on an open step without charging an attempt.
    pub fn record_dispatch(
        &self,
        session: &mut VerificationSession,
        step: StepId,
        result: &ProviderResult,
        now: Timestamp,
        lease: Duration,
    ) -> Result<(), StepError> {
        self.check_submittable(session, step, now, lease)?;
        self.record_mut(session, step)?
            .record_dispatch(result.transaction_id.clone())?;
        self.refresh(session, now);
        Ok(())
    }

    /// Classify a provider result, apply it to the reserved attempt, open
    /// newly eligible dependents and recompute the session.
    pub fn settle(
        &self,
        session: &mut VerificationSession,
        step: StepId,
        reservation_id: Uuid,
        result: &ProviderResult,
        now: Timestamp,
    ) -> Result<Settlement, StepError> {
        let policy = self.policies.get(step);
        let classification = policy.classify(result);
        let summary = ResultSummary::new(result, classification, policy.score(result), now);
        let status = self.record_mut(session, step)?.settle(
            reservation_id,
            result.transaction_id.clone(),
            summary,
            now,
        )?;
        self.open_eligible(session, now);
        self.refresh(session, now);
        Ok(Settlement {
            classification,
            status,
            overall_status: session.overall_status,
        })
    }

    /// Resolve a manual review of `step`.
    pub fn resolve_review(
        &self,
        session: &mut VerificationSession,
        step: StepId,
        approved: bool,
        now: Timestamp,
    ) -> Result<StepStatus, StepError> {
        let status = self.record_mut(session, step)?.resolve_review(approved, now)?;
        self.open_eligible(session, now);
        self.refresh(session, now);
        Ok(status)
    }

    /// Administrative reset of a locked or failed step.
    pub fn reset_step(
        &self,
        session: &mut VerificationSession,
        step: StepId,
        now: Timestamp,
    ) -> Result<(), StepError> {
        self.record_mut(session, step)?.admin_reset(now)?;
        self.refresh(session, now);
        Ok(())
    }

    /// Derived result for `session`.
    pub fn final_result(&self, session: &VerificationSession, now: Timestamp) -> FinalVerificationResult {
        self.aggregator.final_result(session, now)
    }

    /// Recompute overall status and current step.
    pub fn refresh(&self, session: &mut VerificationSession, now: Timestamp) {
        session.overall_status = self.aggregator.compute(session);
        session.current_step = self.current_step(session);
        session.updated_at = now;
    }

    fn open_eligible(&self, session: &mut VerificationSession, now: Timestamp) {
        let ready: Vec<StepId> = self
            .graph
            .order()
            .iter()
            .copied()
            .filter(|s| session.step(*s).is_some_and(|r| r.status == StepStatus::Pending))
            .filter(|s| self.dependencies_met(session, *s))
            .collect();
        for step in ready {
            if let Some(record) = session.step_mut(step) {
                // Only pending records are selected above, so opening cannot fail.
                let _ = record.open(now);
            }
        }
    }

    fn record<'a>(
        &self,
        session: &'a VerificationSession,
        step: StepId,
    ) -> Result<&'a StepRecord, StepError> {
        if !self.graph.contains(step) {
            return Err(StepError::UnknownStep(step));
        }
        session.step(step).ok_or(StepError::UnknownStep(step))
    }

    fn record_mut<'a>(
        &self,
        session: &'a mut VerificationSession,
        step: StepId,
    ) -> Result<&'a mut StepRecord, StepError> {
        if !self.graph.contains(step) {
            return Err(StepError::UnknownStep(step));
        }
        session.step_mut(step).ok_or(StepError::UnknownStep(step))
    }
}

impl Default for StepStateMachine {
    fn default() -> Self {
        Self::standard()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
