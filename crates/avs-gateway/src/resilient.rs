//! Timeout and retry wrapper for any gateway.
//!
//! Every operation runs under the per-category timeout. Transient failures
//! (timeouts, transport errors, 408/429/5xx) are retried up to
//! `max_retries` times with exponential backoff; once the budget is spent
//! the last error is wrapped in [`ProviderError::Exhausted`]. Non-transient
//! errors are returned immediately without retry.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use avs_core::{ProviderCategory, ProviderResult, RegistryKind};

use crate::error::ProviderError;
use crate::gateway::{
    Capability, DocumentSubmission, ExternalVerificationGateway, HeadshotRequest,
    OtpSendRequest, OtpVerifyRequest, RegistryQuery, SelfieSubmission,
};

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default base delay between retries (doubles each retry: 500ms, 1s).
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Timeout and retry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Per-category timeout overrides. Categories not listed use
    /// [`ProviderCategory::default_timeout`].
    pub timeouts: BTreeMap<ProviderCategory, Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            timeouts: BTreeMap::new(),
        }
    }
}

impl RetryPolicy {
    pub fn timeout_for(&self, category: ProviderCategory) -> Duration {
        self.timeouts
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_timeout())
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry))
    }

    /// Longest wall-clock time one gateway call can take: every attempt
    /// runs to the slowest category timeout, plus the full backoff.
    pub fn worst_case_duration(&self) -> Duration {
        let slowest = ProviderCategory::ALL
            .iter()
            .map(|c| self.timeout_for(*c))
            .max()
            .unwrap_or_default();
        let backoff = (0..self.max_retries)
            .fold(Duration::ZERO, |acc, retry| acc.saturating_add(self.delay_for(retry)));
        slowest
            .saturating_mul(self.max_retries.saturating_add(1))
            .saturating_add(backoff)
    }
}

/// Gateway decorator adding timeouts and retries.
#[derive(Debug, Clone)]
pub struct ResilientGateway<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: ExternalVerificationGateway> ResilientGateway<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run<F, Fut>(&self, capability: Capability, op: F) -> Result<ProviderResult, ProviderError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<ProviderResult, ProviderError>> + Send,
    {
        let timeout = self.policy.timeout_for(capability.category());
        let mut retries = 0u32;
        loop {
            let outcome = match tokio::time::timeout(timeout, op()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Timeout {
                    capability,
                    elapsed_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            };

            let error = match outcome {
                Ok(result) => return Ok(result),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            if retries >= self.policy.max_retries {
                tracing::warn!(
                    %capability,
                    attempts = retries + 1,
                    error = %error,
                    "provider call failed, retries exhausted"
                );
                return Err(ProviderError::Exhausted {
                    capability,
                    attempts: retries + 1,
                    last: Box::new(error),
                });
            }

            let delay = self.policy.delay_for(retries);
            retries += 1;
            tracing::warn!(
                %capability,
                attempt = retries,
                max_retries = self.policy.max_retries,
                "provider call failed, retrying in {delay:?}: {error}"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl<G: ExternalVerificationGateway> ExternalVerificationGateway for ResilientGateway<G> {
    async fn send_otp(&self, request: &OtpSendRequest) -> Result<ProviderResult, ProviderError> {
        self.run(Capability::SendOtp, || self.inner.send_otp(request))
            .await
    }

    async fn verify_otp(
        &self,
        request: &OtpVerifyRequest,
    ) -> Result<ProviderResult, ProviderError> {
        self.run(Capability::VerifyOtp, || self.inner.verify_otp(request))
            .await
    }

    async fn submit_document(
        &self,
        submission: &DocumentSubmission,
    ) -> Result<ProviderResult, ProviderError> {
        self.run(Capability::SubmitDocument, || {
            self.inner.submit_document(submission)
        })
        .await
    }

    async fn submit_selfie(
        &self,
        submission: &SelfieSubmission,
    ) -> Result<ProviderResult, ProviderError> {
        self.run(Capability::SubmitSelfie, || self.inner.submit_selfie(submission))
            .await
    }

    async fn validate_registry(
        &self,
        registry: RegistryKind,
        query: &RegistryQuery,
    ) -> Result<ProviderResult, ProviderError> {
        self.run(Capability::ValidateRegistry, || {
            self.inner.validate_registry(registry, query)
        })
        .await
    }

    async fn generate_headshot(
        &self,
        request: &HeadshotRequest,
    ) -> Result<ProviderResult, ProviderError> {
        self.run(Capability::GenerateHeadshot, || {
            self.inner.generate_headshot(request)
        })
        .await
    }
}
