//! # Verification Session Manager
//!
//! Entry point of the workflow engine. Owns the session lifecycle:
//!
//! - `initiate` creates a session or resumes the subject's current one.
//! - `submit_step` validates input, reserves an attempt, calls the provider
//!   through the gateway, and records the classified result.
//! - `get_status` reads the session and its derived result.
//!
//! Administrative operations (`resolve_review`, `reset_step`,
//! `reset_subject`) go through the same compare-and-swap path.
//!
//! Every mutation is persisted before the call returns. The only suspension
//! point that waits on the outside world is the provider call, and no
//! session state is held across it except the persisted reservation.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use avs_core::{
    ProviderResult, ProviderStatus, RegistryKind, SessionId, StepId, SubjectId, Timestamp,
    TransactionId,
};
use avs_gateway::{
    DocumentSubmission, ExternalVerificationGateway, HeadshotRequest, OtpChannel,
    OtpSendRequest, OtpVerifyRequest, ProviderError, RegistryQuery, SelfieSubmission,
};
use avs_state::{
    Classification, FinalVerificationResult, OverallStatus, StepRecord, StepStateMachine,
    StepStatus, VerificationSession,
};

use crate::config::WorkflowRuntime;
use crate::error::WorkflowError;
use crate::input::StepInput;
use crate::limiter::{
    check_latest_transaction, check_version, guard_submission, Reservation, TrialLimiter,
};
use crate::store::{update_session, SessionStore, StoreError};

// ─── Outcomes ────────────────────────────────────────────────────────

/// What the caller should offer the subject next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    /// Move on to the next step (or enter the code just delivered).
    Continue,
    /// Try the same step again.
    Retry,
    /// Wait for a human reviewer.
    AwaitReview,
    /// Nothing the subject can do will help.
    ContactSupport,
    /// Verification is complete.
    Done,
}

/// Machine-readable reason attached to an attempt that did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeCode {
    /// The provider rejected the attempt; it counted.
    DomainRejection,
    /// The provider reported a condition no retry can fix.
    HardFailure,
    /// The result was inconclusive and went to manual review.
    AmbiguousResult,
    /// The rejection spent the last attempt.
    AttemptsExhausted,
}

impl OutcomeCode {
    /// Wire form, e.g. `DOMAIN_REJECTION`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DomainRejection => "DOMAIN_REJECTION",
            Self::HardFailure => "HARD_FAILURE",
            Self::AmbiguousResult => "AMBIGUOUS_RESULT",
            Self::AttemptsExhausted => "ATTEMPTS_EXHAUSTED",
        }
    }
}

/// Result of one accepted `submit_step` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub session_id: SessionId,
    pub step_id: StepId,
    pub status: StepStatus,
    pub attempts_used: u32,
    pub attempts_remaining: u32,
    pub overall_status: OverallStatus,
    /// Bucket of the provider result. `None` for code delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_code: Option<OutcomeCode>,
    pub next_action: NextAction,
    /// Provider transaction. For code delivery this is the id to verify
    /// against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    pub current_step: Option<StepId>,
    /// Session version after the call.
    pub version: u64,
}

/// Per-step view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepView {
    pub step_id: StepId,
    pub status: StepStatus,
    pub attempts_used: u32,
    pub attempts_remaining: u32,
    pub max_attempts: u32,
    pub required: bool,
    pub depends_on: Vec<StepId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transaction_id: Option<TransactionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

/// Session state as returned by `initiate` and `get_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub subject_id: SubjectId,
    pub overall_status: OverallStatus,
    pub current_step: Option<StepId>,
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Steps in topological order.
    pub steps: Vec<StepView>,
    pub result: FinalVerificationResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<SessionId>,
}

// ─── Manager ─────────────────────────────────────────────────────────

/// Orchestrates verification sessions over a store and a gateway.
#[derive(Clone)]
pub struct VerificationSessionManager {
    store: Arc<dyn SessionStore>,
    gateway: Arc<dyn ExternalVerificationGateway>,
    machine: Arc<StepStateMachine>,
    limiter: TrialLimiter,
}

impl std::fmt::Debug for VerificationSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationSessionManager")
            .field("machine", &self.machine)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl VerificationSessionManager {
    /// Manager over `store` and `gateway`, running the workflow in `runtime`.
    pub fn new(
        store: Arc<dyn SessionStore>,
        gateway: Arc<dyn ExternalVerificationGateway>,
        runtime: WorkflowRuntime,
    ) -> Self {
        let machine = Arc::new(runtime.machine);
        let limiter = TrialLimiter::new(store.clone(), machine.clone(), runtime.lease);
        Self {
            store,
            gateway,
            machine,
            limiter,
        }
    }

    /// The state machine every session transition goes through.
    pub fn machine(&self) -> &StepStateMachine {
        &self.machine
    }

    /// Lease of an attempt reservation.
    pub fn lease(&self) -> Duration {
        self.limiter.lease()
    }

    /// Start verification for a subject, or resume where they left off.
    ///
    /// A verified subject is refused. A subject whose latest session failed
    /// gets that session back unchanged; only an administrative reset
    /// starts a new attempt cycle. Resuming never mutates the session.
    pub async fn initiate(&self, subject_id: SubjectId) -> Result<SessionSnapshot, WorkflowError> {
        if let Some(existing) = self.resumable(&subject_id).await? {
            return Ok(existing);
        }

        let session = self
            .machine
            .new_session(SessionId::new(), subject_id.clone(), Timestamp::now());
        match self.store.insert(&session).await {
            Ok(()) => {
                tracing::info!(
                    session_id = %session.session_id,
                    subject_id = %subject_id,
                    "verification session created"
                );
                Ok(self.snapshot(&session))
            }
            // Lost a race against a concurrent initiate for the same subject.
            Err(StoreError::ActiveSessionExists { .. }) => self
                .resumable(&subject_id)
                .await?
                .ok_or(WorkflowError::SubjectNotFound(subject_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn resumable(&self, subject_id: &SubjectId) -> Result<Option<SessionSnapshot>, WorkflowError> {
        let Some(latest) = self.store.latest_for_subject(subject_id).await? else {
            return Ok(None);
        };
        if latest.superseded_by.is_some() {
            return Ok(None);
        }
        match latest.overall_status {
            OverallStatus::Verified => Err(WorkflowError::AlreadyVerified {
                subject_id: subject_id.clone(),
                session_id: latest.session_id,
            }),
            _ => {
                tracing::debug!(
                    session_id = %latest.session_id,
                    current_step = ?latest.current_step,
                    "resuming verification session"
                );
                Ok(Some(self.snapshot(&latest)))
            }
        }
    }

    /// Submit one step.
    ///
    /// Input is validated before anything is reserved. Provider failures
    /// roll the reservation back and surface as errors; classified results,
    /// including rejections, come back as a [`StepOutcome`].
    pub async fn submit_step(
        &self,
        session_id: SessionId,
        step_id: StepId,
        provider_input: &Value,
        expected_version: Option<u64>,
    ) -> Result<StepOutcome, WorkflowError> {
        let input = StepInput::parse(step_id, provider_input)?;
        match input {
            StepInput::OtpSend { destination } => {
                self.send_code(session_id, step_id, destination, expected_version)
                    .await
            }
            input => {
                self.attempt(session_id, step_id, input, expected_version)
                    .await
            }
        }
    }

    /// Deliver a one-time code. Charges no attempt; the step must still
    /// have attempts left to verify against.
    async fn send_code(
        &self,
        session_id: SessionId,
        step_id: StepId,
        destination: String,
        expected_version: Option<u64>,
    ) -> Result<StepOutcome, WorkflowError> {
        let session = self.load(session_id).await?;
        check_version(&session, expected_version)?;
        guard_submission(&self.machine, &session, step_id, Timestamp::now(), self.lease())?;

        let request = OtpSendRequest {
            channel: otp_channel(step_id),
            destination,
        };
        let result = self
            .gateway
            .send_otp(&request)
            .await
            .map_err(|e| self.provider_failure(session_id, step_id, e))?;
        if result.status != ProviderStatus::Passed {
            let code = result
                .error_code
                .clone()
                .unwrap_or_else(|| result.status.to_string());
            tracing::warn!(session_id = %session_id, step = %step_id, code = %code, "code delivery declined");
            return Err(WorkflowError::DomainRejection { step: step_id, code });
        }

        let (session, ()) = update_session(self.store.as_ref(), session_id, |s, now| {
            check_version(s, expected_version.map(|_| session.version))?;
            Ok::<_, WorkflowError>(self.machine.record_dispatch(s, step_id, &result, now, self.lease())?)
        })
        .await?;
        tracing::info!(session_id = %session_id, step = %step_id, transaction_id = %result.transaction_id, "one-time code sent");
        Ok(self.outcome(&session, step_id, None, Some(result.transaction_id)))
    }

    async fn attempt(
        &self,
        session_id: SessionId,
        step_id: StepId,
        input: StepInput,
        expected_version: Option<u64>,
    ) -> Result<StepOutcome, WorkflowError> {
        // Checks that need the current record happen before reserving.
        let session = self.load(session_id).await?;
        check_version(&session, expected_version)?;
        guard_submission(&self.machine, &session, step_id, Timestamp::now(), self.lease())?;
        let call = ProviderCall::prepare(&session, step_id, input)?;

        let (reservation, _) = self
            .limiter
            .check_and_reserve_citing(session_id, step_id, expected_version, call.cited_transaction())
            .await?;

        match call.dispatch(self.gateway.as_ref()).await {
            Ok(result) => self.record(&reservation, &result).await,
            Err(error) => {
                if let Err(rollback) = self.limiter.rollback(&reservation).await {
                    // The lease will release the step; the caller still gets
                    // the provider failure.
                    tracing::error!(
                        session_id = %session_id,
                        step = %step_id,
                        error = %rollback,
                        "reservation rollback failed"
                    );
                }
                Err(self.provider_failure(session_id, step_id, error))
            }
        }
    }

    async fn record(
        &self,
        reservation: &Reservation,
        result: &ProviderResult,
    ) -> Result<StepOutcome, WorkflowError> {
        let (session, settlement) = self.limiter.commit(reservation, result).await?;
        tracing::info!(
            session_id = %reservation.session_id,
            step = %reservation.step_id,
            attempt = reservation.attempt,
            classification = settlement.classification.as_str(),
            status = %settlement.status,
            overall_status = %settlement.overall_status,
            "step result recorded"
        );
        Ok(self.outcome(
            &session,
            reservation.step_id,
            Some(settlement.classification),
            Some(result.transaction_id.clone()),
        ))
    }

    fn provider_failure(&self, session_id: SessionId, step_id: StepId, error: ProviderError) -> WorkflowError {
        tracing::warn!(
            session_id = %session_id,
            step = %step_id,
            error = %error,
            "provider call failed, no attempt charged"
        );
        WorkflowError::from_provider(step_id, error)
    }

    /// Current state of a session.
    pub async fn get_status(&self, session_id: SessionId) -> Result<SessionSnapshot, WorkflowError> {
        let session = self.load(session_id).await?;
        Ok(self.snapshot(&session))
    }

    /// Adjudicate a step in manual review.
    pub async fn resolve_review(
        &self,
        session_id: SessionId,
        step_id: StepId,
        approved: bool,
    ) -> Result<SessionSnapshot, WorkflowError> {
        let (session, status) = update_session(self.store.as_ref(), session_id, |s, now| {
            reject_superseded(s)?;
            Ok::<_, WorkflowError>(self.machine.resolve_review(s, step_id, approved, now)?)
        })
        .await?;
        tracing::info!(
            session_id = %session_id,
            step = %step_id,
            approved,
            status = %status,
            overall_status = %session.overall_status,
            "manual review resolved"
        );
        Ok(self.snapshot(&session))
    }

    /// Reopen a locked or failed step with a fresh attempt budget.
    ///
    /// Allowed on failed sessions, which return to `in_progress` once no
    /// other required step blocks them.
    pub async fn reset_step(
        &self,
        session_id: SessionId,
        step_id: StepId,
    ) -> Result<SessionSnapshot, WorkflowError> {
        let (session, ()) = update_session(self.store.as_ref(), session_id, |s, now| {
            reject_superseded(s)?;
            if s.overall_status == OverallStatus::Verified {
                return Err(WorkflowError::AlreadyVerified {
                    subject_id: s.subject_id.clone(),
                    session_id: s.session_id,
                });
            }
            Ok::<_, WorkflowError>(self.machine.reset_step(s, step_id, now)?)
        })
        .await?;
        tracing::info!(
            session_id = %session_id,
            step = %step_id,
            overall_status = %session.overall_status,
            "step reset by administrator"
        );
        Ok(self.snapshot(&session))
    }

    /// Retire the subject's latest session and start a fresh one.
    pub async fn reset_subject(&self, subject_id: SubjectId) -> Result<SessionSnapshot, WorkflowError> {
        let latest = self
            .store
            .latest_for_subject(&subject_id)
            .await?
            .ok_or_else(|| WorkflowError::SubjectNotFound(subject_id.clone()))?;

        let fresh = self
            .machine
            .new_session(SessionId::new(), subject_id.clone(), Timestamp::now());
        if latest.superseded_by.is_none() {
            update_session(self.store.as_ref(), latest.session_id, |s, _| {
                reject_superseded(s)?;
                s.superseded_by = Some(fresh.session_id);
                Ok::<_, WorkflowError>(())
            })
            .await?;
        }
        self.store.insert(&fresh).await?;
        tracing::info!(
            subject_id = %subject_id,
            previous_session_id = %latest.session_id,
            session_id = %fresh.session_id,
            "subject reset by administrator"
        );
        Ok(self.snapshot(&fresh))
    }

    async fn load(&self, session_id: SessionId) -> Result<VerificationSession, WorkflowError> {
        self.store
            .get(session_id)
            .await?
            .ok_or(WorkflowError::SessionNotFound(session_id))
    }

    fn outcome(
        &self,
        session: &VerificationSession,
        step_id: StepId,
        classification: Option<Classification>,
        transaction_id: Option<TransactionId>,
    ) -> StepOutcome {
        let (status, attempts_used, attempts_remaining) = match session.step(step_id) {
            Some(r) => (r.status, r.attempts_used, r.attempts_remaining()),
            None => (StepStatus::Pending, 0, 0),
        };
        let outcome_code = match (classification, status) {
            (Some(Classification::Rejected), StepStatus::Locked) => Some(OutcomeCode::AttemptsExhausted),
            (Some(Classification::Rejected), _) => Some(OutcomeCode::DomainRejection),
            (Some(Classification::HardFail), _) => Some(OutcomeCode::HardFailure),
            (Some(Classification::Ambiguous), _) => Some(OutcomeCode::AmbiguousResult),
            _ => None,
        };
        StepOutcome {
            session_id: session.session_id,
            step_id,
            status,
            attempts_used,
            attempts_remaining,
            overall_status: session.overall_status,
            classification,
            outcome_code,
            next_action: next_action(session.overall_status, status, classification),
            transaction_id,
            current_step: session.current_step,
            version: session.version,
        }
    }

    fn snapshot(&self, session: &VerificationSession) -> SessionSnapshot {
        let graph = self.machine.graph();
        let steps = graph
            .order()
            .iter()
            .filter_map(|step| session.step(*step))
            .map(|record| step_view(record, graph.is_required(record.step_id), graph.dependencies(record.step_id).collect()))
            .collect();
        SessionSnapshot {
            session_id: session.session_id,
            subject_id: session.subject_id.clone(),
            overall_status: session.overall_status,
            current_step: session.current_step,
            version: session.version,
            created_at: session.created_at,
            updated_at: session.updated_at,
            steps,
            result: self.machine.final_result(session, Timestamp::now()),
            superseded_by: session.superseded_by,
        }
    }
}

/// A provider request ready to send once an attempt is reserved.
enum ProviderCall {
    VerifyOtp(OtpVerifyRequest),
    Document(DocumentSubmission),
    Selfie(SelfieSubmission),
    Registry(RegistryKind, RegistryQuery),
    Headshot(HeadshotRequest),
}

impl ProviderCall {
    fn prepare(
        session: &VerificationSession,
        step_id: StepId,
        input: StepInput,
    ) -> Result<Self, WorkflowError> {
        match input {
            StepInput::OtpVerify {
                transaction_id,
                code,
            } => {
                check_latest_transaction(session, step_id, &transaction_id)?;
                Ok(Self::VerifyOtp(OtpVerifyRequest {
                    channel: otp_channel(step_id),
                    transaction_id,
                    code,
                }))
            }
            StepInput::Document(submission) => Ok(Self::Document(submission)),
            StepInput::Selfie(submission) => Ok(Self::Selfie(submission)),
            StepInput::Registry { identity_fields } => {
                let kind = step_id.registry().ok_or_else(|| {
                    WorkflowError::InvalidInput(format!("{step_id} is not a registry step"))
                })?;
                Ok(Self::Registry(
                    kind,
                    RegistryQuery {
                        subject_id: session.subject_id.clone(),
                        identity_fields: registry_fields(session, identity_fields)?,
                    },
                ))
            }
            StepInput::Headshot(request) => Ok(Self::Headshot(request)),
            StepInput::OtpSend { .. } => Err(WorkflowError::InvalidInput(
                "code delivery does not consume an attempt".into(),
            )),
        }
    }

    /// Code delivery a verification must still match when reserving.
    fn cited_transaction(&self) -> Option<&TransactionId> {
        match self {
            Self::VerifyOtp(request) => Some(&request.transaction_id),
            _ => None,
        }
    }

    async fn dispatch(
        &self,
        gateway: &dyn ExternalVerificationGateway,
    ) -> Result<ProviderResult, ProviderError> {
        match self {
            Self::VerifyOtp(request) => gateway.verify_otp(request).await,
            Self::Document(submission) => gateway.submit_document(submission).await,
            Self::Selfie(submission) => gateway.submit_selfie(submission).await,
            Self::Registry(kind, query) => gateway.validate_registry(*kind, query).await,
            Self::Headshot(request) => gateway.generate_headshot(request).await,
        }
    }
}

fn step_view(record: &StepRecord, required: bool, depends_on: Vec<StepId>) -> StepView {
    let summary = record.result_summary.as_ref();
    StepView {
        step_id: record.step_id,
        status: record.status,
        attempts_used: record.attempts_used,
        attempts_remaining: record.attempts_remaining(),
        max_attempts: record.max_attempts,
        required,
        depends_on,
        last_transaction_id: record.last_transaction_id.clone(),
        classification: summary.map(|s| s.classification),
        error_code: summary.and_then(|s| s.error_code.clone()),
        completed_at: record.completed_at,
    }
}

fn next_action(
    overall: OverallStatus,
    status: StepStatus,
    classification: Option<Classification>,
) -> NextAction {
    match (overall, status) {
        (OverallStatus::Verified, _) => NextAction::Done,
        (OverallStatus::Failed, _) | (_, StepStatus::Locked | StepStatus::Failed) => {
            NextAction::ContactSupport
        }
        (_, StepStatus::ManualReview) => NextAction::AwaitReview,
        (_, StepStatus::AwaitingInput) if classification == Some(Classification::Rejected) => {
            NextAction::Retry
        }
        _ => NextAction::Continue,
    }
}

fn otp_channel(step_id: StepId) -> OtpChannel {
    match step_id {
        StepId::EmailOtp => OtpChannel::Email,
        _ => OtpChannel::Sms,
    }
}

fn reject_superseded(session: &VerificationSession) -> Result<(), WorkflowError> {
    match session.superseded_by {
        Some(superseded_by) => Err(WorkflowError::SessionSuperseded {
            session_id: session.session_id,
            superseded_by,
        }),
        None => Ok(()),
    }
}

/// Identity fields for a registry query: the caller's, or those the
/// document step extracted.
fn registry_fields(
    session: &VerificationSession,
    provided: Option<Map<String, Value>>,
) -> Result<Map<String, Value>, WorkflowError> {
    if let Some(fields) = provided.filter(|f| !f.is_empty()) {
        return Ok(fields);
    }
    session
        .step(StepId::Document)
        .filter(|r| r.status == StepStatus::Success)
        .and_then(|r| r.result_summary.as_ref())
        .and_then(|s| s.detail.get("extracted_fields"))
        .and_then(Value::as_object)
        .filter(|f| !f.is_empty())
        .cloned()
        .ok_or_else(|| {
            WorkflowError::InvalidInput(
                "extracted_identity_fields is required when the document step has none".into(),
            )
        })
}
