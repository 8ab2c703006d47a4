//! # Result Aggregation
//!
//! Derives the overall session status from step records and the graph's
//! required flags. Pure: nothing here mutates a session.
//!
//! | Condition (required steps only) | Status |
//! |---------------------------------|--------|
//! | any `locked`, or `failed` with a hard-fail classification | `failed` |
//! | any `manual_review` | `manual_review` |
//! | all `success` | `verified` |
//! | no step has progressed | `pending` |
//! | otherwise | `in_progress` |

use serde::{Deserialize, Serialize};

use avs_core::{SessionId, StepId, SubjectId, Timestamp};

use crate::graph::StepDependencyGraph;
use crate::session::{OverallStatus, VerificationSession};
use crate::step::{StepRecord, StepStatus};

/// Derived verification result. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalVerificationResult {
    /// Session the result was computed for.
    pub session_id: SessionId,
    /// Subject of the session.
    pub subject_id: SubjectId,
    /// Aggregated status.
    pub status: OverallStatus,
    /// Whether every required step succeeded.
    pub verified: bool,
    /// Required steps in `success`.
    pub completed_steps: Vec<StepId>,
    /// Required steps the subject still has to complete.
    pub blocking_steps: Vec<StepId>,
    /// Required steps waiting for manual review.
    pub in_review_steps: Vec<StepId>,
    /// Required steps that are locked or hard-failed.
    pub failed_steps: Vec<StepId>,
    /// When the result was computed.
    pub computed_at: Timestamp,
}

/// Computes overall status from the required steps of a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultAggregator {
    required: Vec<StepId>,
}

impl ResultAggregator {
    /// An aggregator over the required steps of `graph`.
    pub fn new(graph: &StepDependencyGraph) -> Self {
        Self {
            required: graph.required_steps(),
        }
    }

    /// Required steps considered by this aggregator.
    pub fn required(&self) -> &[StepId] {
        &self.required
    }

    /// Overall status of `session`.
    pub fn compute(&self, session: &VerificationSession) -> OverallStatus {
        let records: Vec<Option<&StepRecord>> =
            self.required.iter().map(|s| session.step(*s)).collect();

        if records.iter().flatten().any(|r| is_blocking_failure(r)) {
            return OverallStatus::Failed;
        }
        if records
            .iter()
            .flatten()
            .any(|r| r.status == StepStatus::ManualReview)
        {
            return OverallStatus::ManualReview;
        }
        if records
            .iter()
            .all(|r| r.is_some_and(|r| r.status == StepStatus::Success))
        {
            return OverallStatus::Verified;
        }
        if !records.iter().flatten().any(|r| r.has_progress()) {
            return OverallStatus::Pending;
        }
        OverallStatus::InProgress
    }

    /// The derived result for `session`.
    pub fn final_result(&self, session: &VerificationSession, now: Timestamp) -> FinalVerificationResult {
        let status = self.compute(session);
        let mut result = FinalVerificationResult {
            session_id: session.session_id,
            subject_id: session.subject_id.clone(),
            status,
            verified: status == OverallStatus::Verified,
            completed_steps: Vec::new(),
            blocking_steps: Vec::new(),
            in_review_steps: Vec::new(),
            failed_steps: Vec::new(),
            computed_at: now,
        };
        for step in &self.required {
            match session.step(*step) {
                Some(r) if r.status == StepStatus::Success => result.completed_steps.push(*step),
                Some(r) if is_blocking_failure(r) => result.failed_steps.push(*step),
                Some(r) if r.status == StepStatus::ManualReview => {
                    result.in_review_steps.push(*step)
                }
                _ => result.blocking_steps.push(*step),
            }
        }
        result
    }
}

fn is_blocking_failure(record: &StepRecord) -> bool {
    record.status == StepStatus::Locked || record.is_hard_failed()
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StepNode;
    use crate::policy::Classification;
    use crate::step::ResultSummary;
    use avs_core::ProviderStatus;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn session_with(statuses: &[(StepId, StepStatus)]) -> VerificationSession {
        let now = Timestamp::now();
        let steps: BTreeMap<_, _> = StepId::ALL
            .iter()
            .map(|s| (*s, StepRecord::new(*s, 3)))
            .collect();
        let mut session = VerificationSession {
            session_id: SessionId::new(),
            subject_id: SubjectId::new("appraiser-1").unwrap(),
            overall_status: OverallStatus::Pending,
            created_at: now,
            updated_at: now,
            current_step: None,
            version: 1,
            steps,
            superseded_by: None,
        };
        for (step, status) in statuses {
            if let Some(r) = session.step_mut(*step) {
                r.status = *status;
            }
        }
        session
    }

    fn hard_fail(session: &mut VerificationSession, step: StepId) {
        if let Some(r) = session.step_mut(step) {
            r.status = StepStatus::Failed;
            r.result_summary = Some(ResultSummary {
                provider_status: ProviderStatus::Failed,
                classification: Classification::HardFail,
                confidence: None,
                error_code: Some("CSO_ID_REVOKED".into()),
                detail: serde_json::Value::Null,
                recorded_at: Timestamp::now(),
            });
        }
    }

    fn all(status: StepStatus) -> Vec<(StepId, StepStatus)> {
        StepId::ALL.iter().map(|s| (*s, status)).collect()
    }

    #[test]
    fn fresh_session_is_pending() {
        let agg = ResultAggregator::new(&StepDependencyGraph::standard());
        let s = session_with(&[(StepId::PhoneOtp, StepStatus::AwaitingInput)]);
        assert_eq!(agg.compute(&s), OverallStatus::Pending);
    }

    #[test]
    fn manual_review_without_failure() {
        let agg = ResultAggregator::new(&StepDependencyGraph::standard());
        let s = session_with(&[
            (StepId::PhoneOtp, StepStatus::Success),
            (StepId::RegistryCso, StepStatus::ManualReview),
        ]);
        assert_eq!(agg.compute(&s), OverallStatus::ManualReview);
    }

    #[test]
    fn locked_beats_review() {
        let agg = ResultAggregator::new(&StepDependencyGraph::standard());
        let s = session_with(&[
            (StepId::PhoneOtp, StepStatus::Locked),
            (StepId::RegistryCso, StepStatus::ManualReview),
        ]);
        assert_eq!(agg.compute(&s), OverallStatus::Failed);
        let result = agg.final_result(&s, Timestamp::now());
        assert_eq!(result.failed_steps, vec![StepId::PhoneOtp]);
        assert_eq!(result.in_review_steps, vec![StepId::RegistryCso]);
        assert!(!result.verified);
    }

    #[test]
    fn hard_fail_fails_session() {
        let agg = ResultAggregator::new(&StepDependencyGraph::standard());
        let mut s = session_with(&[(StepId::Document, StepStatus::Success)]);
        hard_fail(&mut s, StepId::RegistryCso);
        assert_eq!(agg.compute(&s), OverallStatus::Failed);
    }

    #[test]
    fn all_success_is_verified() {
        let agg = ResultAggregator::new(&StepDependencyGraph::standard());
        let s = session_with(&all(StepStatus::Success));
        assert_eq!(agg.compute(&s), OverallStatus::Verified);
        let result = agg.final_result(&s, Timestamp::now());
        assert!(result.verified);
        assert_eq!(result.completed_steps.len(), 8);
        assert!(result.blocking_steps.is_empty());
    }

    #[test]
    fn optional_steps_do_not_block() {
        let graph = StepDependencyGraph::new(vec![
            StepNode::new(StepId::SelfieLiveness, []),
            StepNode::new(StepId::Headshot, [StepId::SelfieLiveness]).optional(),
        ])
        .unwrap();
        let agg = ResultAggregator::new(&graph);
        let s = session_with(&[
            (StepId::SelfieLiveness, StepStatus::Success),
            (StepId::Headshot, StepStatus::Locked),
        ]);
        assert_eq!(agg.compute(&s), OverallStatus::Verified);
    }

    fn any_status() -> impl Strategy<Value = StepStatus> {
        prop_oneof![
            Just(StepStatus::Pending),
            Just(StepStatus::AwaitingInput),
            Just(StepStatus::Submitted),
            Just(StepStatus::Success),
            Just(StepStatus::Failed),
            Just(StepStatus::ManualReview),
            Just(StepStatus::Locked),
        ]
    }

    proptest! {
        #[test]
        fn verified_iff_every_required_step_succeeded(
            statuses in proptest::collection::vec(any_status(), 8)
        ) {
            let pairs: Vec<_> = StepId::ALL.iter().copied().zip(statuses.iter().copied()).collect();
            let s = session_with(&pairs);
            let agg = ResultAggregator::new(&StepDependencyGraph::standard());
            let all_success = statuses.iter().all(|st| *st == StepStatus::Success);
            prop_assert_eq!(agg.compute(&s) == OverallStatus::Verified, all_success);
        }
    }
}
