//! # Mock Provider
//!
//! Deterministic in-process provider implementing every category trait.
//! Used for local development when no provider URLs are configured, and by
//! tests to script specific provider behaviour.
//!
//! ## Default behaviour
//!
//! | Capability | Result |
//! |------------|--------|
//! | `send_otp` | passed; issues code [`MockProvider::DEFAULT_OTP_CODE`] under a fresh transaction |
//! | `verify_otp` | passed on matching code, `OTP_MISMATCH` otherwise, `OTP_EXPIRED` for unknown transactions |
//! | `submit_document` | passed, confidence 0.97, with extracted identity fields |
//! | `submit_selfie` | passed, `liveness_score` 0.98 or `match_score` 0.95 |
//! | `validate_registry` | passed, `matched: true` |
//! | `generate_headshot` | passed, with an image URL |
//!
//! Scripted entries queued with [`MockProvider::script`] take precedence
//! over the defaults, one entry per call, in FIFO order.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use avs_core::{ProviderResult, ProviderStatus, RegistryKind, TransactionId};

use crate::error::ProviderError;
use crate::gateway::{
    BiometricCheck, BiometricProvider, Capability, DocumentProvider, DocumentSubmission,
    HeadshotProvider, HeadshotRequest, OtpProvider, OtpSendRequest, OtpVerifyRequest,
    RegistryProvider, RegistryQuery, SelfieSubmission,
};

/// One scripted reaction to a provider call.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Return this result.
    Respond(ProviderResult),
    /// Return this error.
    Fail(ProviderError),
    /// Sleep, then fall through to the default behaviour.
    Hang(Duration),
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<Capability, VecDeque<Scripted>>,
    calls: HashMap<Capability, u32>,
    issued_codes: HashMap<String, String>,
    sequence: u64,
}

/// Deterministic provider for development and tests.
#[derive(Debug)]
pub struct MockProvider {
    otp_code: String,
    state: Mutex<MockState>,
}

impl MockProvider {
    /// Code issued by `send_otp` unless overridden.
    pub const DEFAULT_OTP_CODE: &'static str = "123456";

    pub fn new() -> Self {
        Self::with_otp_code(Self::DEFAULT_OTP_CODE)
    }

    /// A mock that issues `code` for every OTP delivery.
    pub fn with_otp_code(code: impl Into<String>) -> Self {
        Self {
            otp_code: code.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Queue a scripted reaction for the next unscripted call of `capability`.
    pub fn script(&self, capability: Capability, entry: Scripted) {
        self.state
            .lock()
            .scripts
            .entry(capability)
            .or_default()
            .push_back(entry);
    }

    /// Drop every queued script entry.
    pub fn clear_scripts(&self) {
        self.state.lock().scripts.clear();
    }

    /// Number of calls received for `capability`, scripted or not.
    pub fn calls(&self, capability: Capability) -> u32 {
        self.state
            .lock()
            .calls
            .get(&capability)
            .copied()
            .unwrap_or(0)
    }

    /// Code issued for an OTP transaction that has not been verified yet.
    pub fn issued_code(&self, transaction_id: &TransactionId) -> Option<String> {
        self.state
            .lock()
            .issued_codes
            .get(transaction_id.as_str())
            .cloned()
    }

    /// Record the call and pop the next script entry. The lock is released
    /// before any await.
    fn begin(&self, capability: Capability) -> Option<Scripted> {
        let mut state = self.state.lock();
        *state.calls.entry(capability).or_insert(0) += 1;
        state
            .scripts
            .get_mut(&capability)
            .and_then(VecDeque::pop_front)
    }

    /// Apply the scripted entry, if any. `Some` short-circuits the default.
    async fn scripted(
        &self,
        capability: Capability,
    ) -> Option<Result<ProviderResult, ProviderError>> {
        match self.begin(capability)? {
            Scripted::Respond(result) => Some(Ok(result)),
            Scripted::Fail(error) => Some(Err(error)),
            Scripted::Hang(duration) => {
                tokio::time::sleep(duration).await;
                None
            }
        }
    }

    fn next_transaction(
        &self,
        prefix: &str,
        capability: Capability,
    ) -> Result<TransactionId, ProviderError> {
        let sequence = {
            let mut state = self.state.lock();
            state.sequence += 1;
            state.sequence
        };
        TransactionId::new(format!("mock-{prefix}-{sequence}")).map_err(|e| {
            ProviderError::InvalidResponse {
                capability,
                reason: e.to_string(),
            }
        })
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OtpProvider for MockProvider {
    async fn send_otp(&self, request: &OtpSendRequest) -> Result<ProviderResult, ProviderError> {
        if let Some(outcome) = self.scripted(Capability::SendOtp).await {
            return outcome;
        }
        let txn = self.next_transaction("otp", Capability::SendOtp)?;
        self.state
            .lock()
            .issued_codes
            .insert(txn.as_str().to_string(), self.otp_code.clone());
        Ok(ProviderResult::passed(txn).with_raw(json!({
            "channel": request.channel,
            "expires_in_secs": 300,
        })))
    }

    async fn verify_otp(
        &self,
        request: &OtpVerifyRequest,
    ) -> Result<ProviderResult, ProviderError> {
        if let Some(outcome) = self.scripted(Capability::VerifyOtp).await {
            return outcome;
        }
        let txn = request.transaction_id.clone();
        let mut state = self.state.lock();
        let issued = state.issued_codes.get(txn.as_str()).cloned();
        let result = match issued {
            None => ProviderResult::failed(txn, "OTP_EXPIRED"),
            Some(code) if code == request.code => {
                state.issued_codes.remove(request.transaction_id.as_str());
                ProviderResult::passed(txn).with_confidence(1.0)
            }
            Some(_) => ProviderResult::failed(txn, "OTP_MISMATCH"),
        };
        Ok(result)
    }
}

#[async_trait]
impl DocumentProvider for MockProvider {
    async fn submit_document(
        &self,
        _submission: &DocumentSubmission,
    ) -> Result<ProviderResult, ProviderError> {
        if let Some(outcome) = self.scripted(Capability::SubmitDocument).await {
            return outcome;
        }
        let txn = self.next_transaction("doc", Capability::SubmitDocument)?;
        Ok(ProviderResult::passed(txn)
            .with_confidence(0.97)
            .with_raw(json!({
                "document_type": "national_id",
                "extracted_fields": {
                    "full_name": "Mock Appraiser",
                    "national_id": "29001011234567",
                    "date_of_birth": "1990-01-01",
                },
            })))
    }
}

#[async_trait]
impl BiometricProvider for MockProvider {
    async fn submit_selfie(
        &self,
        submission: &SelfieSubmission,
    ) -> Result<ProviderResult, ProviderError> {
        if let Some(outcome) = self.scripted(Capability::SubmitSelfie).await {
            return outcome;
        }
        let txn = self.next_transaction("bio", Capability::SubmitSelfie)?;
        let (confidence, raw) = match submission.check {
            BiometricCheck::Liveness => (0.98, json!({ "liveness_score": 0.98 })),
            BiometricCheck::FaceMatch => (0.95, json!({ "match_score": 0.95 })),
        };
        Ok(ProviderResult::passed(txn)
            .with_confidence(confidence)
            .with_raw(raw))
    }
}

#[async_trait]
impl RegistryProvider for MockProvider {
    async fn validate_registry(
        &self,
        registry: RegistryKind,
        _query: &RegistryQuery,
    ) -> Result<ProviderResult, ProviderError> {
        if let Some(outcome) = self.scripted(Capability::ValidateRegistry).await {
            return outcome;
        }
        let txn = self.next_transaction(registry.as_str(), Capability::ValidateRegistry)?;
        Ok(ProviderResult::passed(txn).with_raw(json!({
            "registry": registry,
            "matched": true,
        })))
    }
}

#[async_trait]
impl HeadshotProvider for MockProvider {
    async fn generate_headshot(
        &self,
        _request: &HeadshotRequest,
    ) -> Result<ProviderResult, ProviderError> {
        if let Some(outcome) = self.scripted(Capability::GenerateHeadshot).await {
            return outcome;
        }
        let txn = self.next_transaction("headshot", Capability::GenerateHeadshot)?;
        let image_url = format!("https://headshots.mock.invalid/{txn}.png");
        Ok(ProviderResult {
            status: ProviderStatus::Passed,
            confidence: None,
            error_code: None,
            transaction_id: txn,
            raw: json!({
                "image_url": image_url,
                "generation_time_ms": 1200,
                "cost_cents": 0,
            }),
        })
    }
}
