//! # avs-workflow — Verification Session Orchestration
//!
//! Ties the pure state machine of `avs-state` to persistence and to the
//! external providers of `avs-gateway`.
//!
//! ## Submission Path
//!
//! ```text
//! submit_step
//!   ├─ StepInput::parse            (no state touched)
//!   ├─ TrialLimiter::check_and_reserve   ── CAS write: attempt reserved
//!   ├─ ExternalVerificationGateway call  (timeouts, retries)
//!   └─ TrialLimiter::commit | rollback   ── CAS write: result or refund
//! ```
//!
//! ## Concurrency
//!
//! Each session is single-writer through its `version`. Sessions are
//! independent of each other; nothing in this crate serializes across
//! sessions.

pub mod config;
pub mod error;
pub mod input;
pub mod limiter;
pub mod manager;
pub mod store;

pub use config::{WorkflowConfig, WorkflowConfigError, WorkflowRuntime};
pub use error::WorkflowError;
pub use input::{InputError, StepInput};
pub use limiter::{Reservation, TrialLimiter, DEFAULT_RESERVATION_LEASE};
pub use manager::{
    NextAction, OutcomeCode, SessionSnapshot, StepOutcome, StepView, VerificationSessionManager,
};
pub use store::{update_session, InMemorySessionStore, SessionStore, StoreError, MAX_CAS_ROUNDS};
