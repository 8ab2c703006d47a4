//! # avs-gateway — External Verification Gateway
//!
//! Uniform async interface to the five external provider categories the
//! verification workflow depends on: OTP delivery, document OCR, biometrics,
//! government registries, and headshot generation.
//!
//! ## Layers
//!
//! ```text
//! VerificationSessionManager
//!         │ ExternalVerificationGateway
//!         ▼
//! ResilientGateway        per-operation timeout, 2 retries, backoff
//!         │
//!         ▼
//! ProviderSuite           routes each capability to its category provider
//!    │    │    │    │    │
//!   otp  doc  bio  reg  headshot   HttpProvider or MockProvider
//! ```
//!
//! Providers normalize every response into [`avs_core::ProviderResult`].
//! A provider saying "no" (wrong code, registry mismatch) is an `Ok` result
//! with `status = failed`; only transport-level trouble and malformed
//! exchanges are [`ProviderError`]s.

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod mock;
pub mod resilient;

pub use config::{ConfigError, GatewayConfig, ProviderMode};
pub use error::ProviderError;
pub use gateway::{
    BiometricCheck, BiometricProvider, Capability, DocumentProvider, DocumentSubmission,
    ExternalVerificationGateway, HeadshotProvider, HeadshotRequest, OtpChannel, OtpProvider,
    OtpSendRequest, OtpVerifyRequest, ProviderSuite, RegistryProvider, RegistryQuery,
    SelfieSubmission,
};
pub use http::HttpProvider;
pub use mock::{MockProvider, Scripted};
pub use resilient::{ResilientGateway, RetryPolicy};
