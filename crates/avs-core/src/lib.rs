#![deny(missing_docs)]

//! # avs-core — Foundational Types for the Appraiser Verification Service
//!
//! Every other crate in the workspace depends on this one. It has no internal
//! crate dependencies; externally it uses `serde`, `serde_json`, `thiserror`,
//! `chrono` and `uuid`.
//!
//! ## Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** A [`SessionId`] cannot be passed
//!    where a [`SubjectId`] is expected, and string identifiers validate their
//!    format at construction time.
//!
//! 2. **Single [`StepId`] enum.** The eight verification steps are one
//!    definition with exhaustive `match` everywhere. Graphs, quotas and policy
//!    tables key on it instead of on free-form strings.
//!
//! 3. **One normalized [`ProviderResult`].** Every external provider, whatever
//!    its wire format, is reduced to the same shape before the workflow engine
//!    sees it.

pub mod error;
pub mod identity;
pub mod provider;
pub mod step;
pub mod temporal;

pub use error::ValidationError;
pub use identity::{SessionId, SubjectId, TransactionId};
pub use provider::{ProviderResult, ProviderStatus};
pub use step::{ProviderCategory, RegistryKind, StepId};
pub use temporal::Timestamp;
