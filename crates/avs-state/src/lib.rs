//! # avs-state — Verification Step State Machine
//!
//! The pure, synchronous core of the verification workflow. Nothing in this
//! crate performs I/O or reads the clock; every transition takes `now`
//! explicitly.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`graph`] | Step dependency DAG with topological ordering |
//! | [`policy`] | Per-step classification tables and attempt quotas |
//! | [`step`] | Step record lifecycle and the attempt invariant |
//! | [`session`] | The persisted session model |
//! | [`machine`] | Session-level transitions over the above |
//! | [`aggregate`] | Derived overall status and final result |
//!
//! ## Invariants
//!
//! - `attempts_used <= max_attempts` for every step, always.
//! - A step leaves `Pending` only once all of its dependencies are in
//!   `success`.
//! - Refused transitions never mutate the session.

pub mod aggregate;
pub mod graph;
pub mod machine;
pub mod policy;
pub mod session;
pub mod step;

pub use aggregate::{FinalVerificationResult, ResultAggregator};
pub use graph::{GraphError, StepDependencyGraph, StepNode};
pub use machine::{Settlement, StepStateMachine};
pub use policy::{
    AttemptQuotas, Classification, ConfidenceBand, PolicyError, PolicyTable, StepPolicy,
};
pub use session::{OverallStatus, VerificationSession};
pub use step::{
    ReservationMarker, ResultSummary, StepError, StepRecord, StepStatus, StepTransitionRecord,
};
