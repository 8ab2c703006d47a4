//! # Workflow Errors
//!
//! Every refusal the session manager can return, each with a stable
//! machine-readable code. The codes are part of the external contract:
//! callers branch on them to offer "retry" versus "contact support".
//!
//! Domain rejections, hard failures and ambiguous results of a verification
//! attempt are not errors. They come back inside a successful
//! [`StepOutcome`](crate::StepOutcome) with an outcome code, because the
//! attempt itself was recorded.

use thiserror::Error;

use avs_core::{SessionId, StepId, SubjectId, ValidationError};
use avs_gateway::ProviderError;
use avs_state::{OverallStatus, StepError};

use crate::input::InputError;
use crate::store::StoreError;

/// Errors surfaced by [`VerificationSessionManager`](crate::VerificationSessionManager).
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// No session with this identifier.
    #[error("verification session {0} not found")]
    SessionNotFound(SessionId),

    /// The subject has never started a verification session.
    #[error("no verification session exists for subject {0}")]
    SubjectNotFound(SubjectId),

    /// The session reached `failed` and accepts no submissions.
    #[error("verification session {session_id} is {status}")]
    SessionTerminal {
        session_id: SessionId,
        status: OverallStatus,
    },

    /// An administrative reset replaced the session.
    #[error("verification session {session_id} was superseded by {superseded_by}")]
    SessionSuperseded {
        session_id: SessionId,
        superseded_by: SessionId,
    },

    /// The step cannot take a submission in its current state.
    #[error(transparent)]
    StepNotEligible(StepError),

    /// Another submission for the step is still waiting on its provider.
    #[error("a submission for step {0} is already in flight")]
    StepInFlight(StepId),

    /// The step's attempt budget is spent. Only an administrative reset
    /// reopens it.
    #[error("step {step} has used {attempts_used} of {max_attempts} attempts")]
    AttemptsExhausted {
        step: StepId,
        attempts_used: u32,
        max_attempts: u32,
    },

    /// The session changed since the caller last read it.
    #[error("verification session {session_id} is at version {actual}, not {expected}")]
    StaleSessionVersion {
        session_id: SessionId,
        expected: u64,
        actual: u64,
    },

    /// The subject is already verified.
    #[error("subject {subject_id} is already verified by session {session_id}")]
    AlreadyVerified {
        subject_id: SubjectId,
        session_id: SessionId,
    },

    /// The provider could not be reached within the retry budget. No attempt
    /// was charged.
    #[error("provider for step {step} is unavailable: {source}")]
    ProviderUnavailable {
        step: StepId,
        #[source]
        source: ProviderError,
    },

    /// The provider answered outside its contract. No attempt was charged.
    #[error("provider for step {step} failed: {source}")]
    ProviderError {
        step: StepId,
        #[source]
        source: ProviderError,
    },

    /// The provider refused to start the step, e.g. to deliver a code.
    /// No attempt was charged.
    #[error("provider declined step {step}: {code}")]
    DomainRejection { step: StepId, code: String },

    /// The step payload is malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The reservation was reclaimed before its result could be recorded.
    #[error("reservation for step {step} was lost before its result was recorded")]
    ReservationLost { step: StepId },

    /// The session store failed.
    #[error("session store error: {0}")]
    Store(String),
}

impl WorkflowError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) | Self::SubjectNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionTerminal { .. } => "SESSION_TERMINAL",
            Self::SessionSuperseded { .. } => "SESSION_SUPERSEDED",
            Self::StepNotEligible(_) => "STEP_NOT_ELIGIBLE",
            Self::StepInFlight(_) => "STEP_IN_FLIGHT",
            Self::AttemptsExhausted { .. } => "ATTEMPTS_EXHAUSTED",
            Self::StaleSessionVersion { .. } => "STALE_SESSION_VERSION",
            Self::AlreadyVerified { .. } => "ALREADY_VERIFIED",
            Self::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            Self::ProviderError { .. } => "PROVIDER_ERROR",
            Self::DomainRejection { .. } => "DOMAIN_REJECTION",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ReservationLost { .. } => "RESERVATION_LOST",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// Wrap a provider failure, keeping transient and contract failures apart.
    pub fn from_provider(step: StepId, source: ProviderError) -> Self {
        if source.is_unavailable() {
            Self::ProviderUnavailable { step, source }
        } else {
            Self::ProviderError { step, source }
        }
    }
}

impl From<StepError> for WorkflowError {
    fn from(err: StepError) -> Self {
        match err {
            StepError::AttemptsExhausted {
                step,
                attempts_used,
                max_attempts,
            } => Self::AttemptsExhausted {
                step,
                attempts_used,
                max_attempts,
            },
            StepError::InFlight(step) => Self::StepInFlight(step),
            StepError::ReservationMismatch { step, .. } => Self::ReservationLost { step },
            other => Self::StepNotEligible(other),
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::SessionNotFound(id),
            StoreError::VersionConflict {
                session_id,
                expected,
                found,
            } => Self::StaleSessionVersion {
                session_id,
                expected,
                actual: found,
            },
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<InputError> for WorkflowError {
    fn from(err: InputError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<ValidationError> for WorkflowError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}
