//! # Trial Limiter
//!
//! Attempt budgeting around provider calls.
//!
//! ```text
//! check_and_reserve ──▶ provider call ──┬──▶ commit   (classifiable result; attempt kept)
//!                                       └──▶ rollback (transport failure; attempt refunded)
//! ```
//!
//! The reservation is persisted before the provider is called, so two
//! racing submissions cannot both spend the last attempt. A reservation
//! abandoned by a crashed caller expires after the lease and the step can
//! be reserved again without charging a second attempt.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use avs_core::{ProviderResult, SessionId, StepId, Timestamp, TransactionId};
use avs_state::{OverallStatus, Settlement, StepError, StepStateMachine, VerificationSession};

use crate::error::WorkflowError;
use crate::store::{update_session, SessionStore};

/// Default lease of a reservation.
pub const DEFAULT_RESERVATION_LEASE: Duration = Duration::from_secs(120);

/// One reserved attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Uuid,
    pub session_id: SessionId,
    pub step_id: StepId,
    /// Attempt number this reservation consumes (1-based).
    pub attempt: u32,
    /// Session version at which the reservation was stored.
    pub version: u64,
}

/// Reserves, commits and rolls back attempts through the session store.
#[derive(Clone)]
pub struct TrialLimiter {
    store: Arc<dyn SessionStore>,
    machine: Arc<StepStateMachine>,
    lease: Duration,
}

impl std::fmt::Debug for TrialLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrialLimiter")
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl TrialLimiter {
    /// Limiter over `store` whose reservations expire after `lease`.
    pub fn new(store: Arc<dyn SessionStore>, machine: Arc<StepStateMachine>, lease: Duration) -> Self {
        Self {
            store,
            machine,
            lease,
        }
    }

    /// How long a reservation holds the step before it can be reclaimed.
    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Reserve one attempt of `step_id`.
    ///
    /// When `expected_version` is given the session must still be at that
    /// version; otherwise the reservation is re-evaluated against whatever
    /// the store holds. Refusals leave the stored session untouched.
    pub async fn check_and_reserve(
        &self,
        session_id: SessionId,
        step_id: StepId,
        expected_version: Option<u64>,
    ) -> Result<(Reservation, VerificationSession), WorkflowError> {
        self.check_and_reserve_citing(session_id, step_id, expected_version, None)
            .await
    }

    /// [`check_and_reserve`](Self::check_and_reserve) for a verification
    /// that cites a code delivery. The citation is checked in the same
    /// write as the reservation, so a code re-sent in between is refused.
    pub async fn check_and_reserve_citing(
        &self,
        session_id: SessionId,
        step_id: StepId,
        expected_version: Option<u64>,
        cited_transaction: Option<&TransactionId>,
    ) -> Result<(Reservation, VerificationSession), WorkflowError> {
        let id = Uuid::new_v4();
        let (session, attempt) =
            update_session(self.store.as_ref(), session_id, |session, now| {
                check_version(session, expected_version)?;
                guard_submission(&self.machine, session, step_id, now, self.lease)?;
                if let Some(cited) = cited_transaction {
                    check_latest_transaction(session, step_id, cited)?;
                }
                Ok::<_, WorkflowError>(self.machine.reserve(session, step_id, id, now, self.lease)?)
            })
            .await
            .map_err(|e| stale_if_pinned(e, session_id, expected_version))?;

        tracing::debug!(
            session_id = %session_id,
            step = %step_id,
            attempt,
            version = session.version,
            "attempt reserved"
        );
        let reservation = Reservation {
            id,
            session_id,
            step_id,
            attempt,
            version: session.version,
        };
        Ok((reservation, session))
    }

    /// Record the classified result of a reserved attempt.
    pub async fn commit(
        &self,
        reservation: &Reservation,
        result: &ProviderResult,
    ) -> Result<(VerificationSession, Settlement), WorkflowError> {
        update_session(self.store.as_ref(), reservation.session_id, |session, now| {
            Ok::<_, WorkflowError>(self.machine.settle(
                session,
                reservation.step_id,
                reservation.id,
                result,
                now,
            )?)
        })
        .await
    }

    /// Refund a reserved attempt after a transient failure.
    pub async fn rollback(&self, reservation: &Reservation) -> Result<VerificationSession, WorkflowError> {
        let (session, ()) = update_session(self.store.as_ref(), reservation.session_id, |session, now| {
            Ok::<_, WorkflowError>(self.machine.release(
                session,
                reservation.step_id,
                reservation.id,
                now,
            )?)
        })
        .await?;
        tracing::info!(
            session_id = %reservation.session_id,
            step = %reservation.step_id,
            attempt = reservation.attempt,
            "reservation rolled back, attempt refunded"
        );
        Ok(session)
    }
}

/// Refuse when the caller pinned a version the session has moved past.
pub(crate) fn check_version(
    session: &VerificationSession,
    expected_version: Option<u64>,
) -> Result<(), WorkflowError> {
    match expected_version {
        Some(expected) if expected != session.version => Err(WorkflowError::StaleSessionVersion {
            session_id: session.session_id,
            expected,
            actual: session.version,
        }),
        _ => Ok(()),
    }
}

/// Refuse a verification that does not cite the latest code sent for the step.
pub(crate) fn check_latest_transaction(
    session: &VerificationSession,
    step_id: StepId,
    cited: &TransactionId,
) -> Result<(), WorkflowError> {
    match session.step(step_id).and_then(|r| r.last_transaction_id.as_ref()) {
        Some(issued) if issued == cited => Ok(()),
        Some(_) => Err(WorkflowError::InvalidInput(format!(
            "transaction_id does not match the latest code sent for {step_id}"
        ))),
        None => Err(WorkflowError::InvalidInput(format!(
            "no code has been sent for {step_id}"
        ))),
    }
}

/// Session-level and step-level guards of a submission.
///
/// A superseded session refuses everything. A locked or exhausted step
/// reports exhaustion even when the lock already failed the session; only
/// then do terminal sessions refuse.
pub(crate) fn guard_submission(
    machine: &StepStateMachine,
    session: &VerificationSession,
    step_id: StepId,
    now: Timestamp,
    lease: Duration,
) -> Result<(), WorkflowError> {
    if let Some(superseded_by) = session.superseded_by {
        return Err(WorkflowError::SessionSuperseded {
            session_id: session.session_id,
            superseded_by,
        });
    }
    let step_check = machine.check_submittable(session, step_id, now, lease);
    if let Err(err @ StepError::AttemptsExhausted { .. }) = step_check {
        return Err(err.into());
    }
    match session.overall_status {
        OverallStatus::Verified => Err(WorkflowError::AlreadyVerified {
            subject_id: session.subject_id.clone(),
            session_id: session.session_id,
        }),
        status @ OverallStatus::Failed => Err(WorkflowError::SessionTerminal {
            session_id: session.session_id,
            status,
        }),
        _ => step_check.map_err(WorkflowError::from),
    }
}

/// A pinned caller sees a lost version race as a stale version, never as a
/// store failure.
fn stale_if_pinned(
    err: WorkflowError,
    session_id: SessionId,
    expected_version: Option<u64>,
) -> WorkflowError {
    match (err, expected_version) {
        (WorkflowError::StaleSessionVersion { actual, .. }, Some(expected)) => {
            WorkflowError::StaleSessionVersion {
                session_id,
                expected,
                actual,
            }
        }
        (err, _) => err,
    }
}
