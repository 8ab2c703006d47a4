//! # Gateway Traits and Routing
//!
//! One trait per provider category, plus the combined
//! [`ExternalVerificationGateway`] that the workflow engine calls. The
//! [`ProviderSuite`] composes five category providers into a gateway.
//!
//! All traits are object-safe and `Send + Sync` so providers can be selected
//! at runtime and shared behind an `Arc`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use avs_core::{ProviderCategory, ProviderResult, RegistryKind, SubjectId, TransactionId};

use crate::error::ProviderError;

// ─── Capabilities ───────────────────────────────────────────────────────

/// One gateway operation. Used for timeouts, scripting and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SendOtp,
    VerifyOtp,
    SubmitDocument,
    SubmitSelfie,
    ValidateRegistry,
    GenerateHeadshot,
}

impl Capability {
    /// The provider category serving this operation.
    pub fn category(&self) -> ProviderCategory {
        match self {
            Self::SendOtp | Self::VerifyOtp => ProviderCategory::Otp,
            Self::SubmitDocument => ProviderCategory::DocumentOcr,
            Self::SubmitSelfie => ProviderCategory::Biometric,
            Self::ValidateRegistry => ProviderCategory::Registry,
            Self::GenerateHeadshot => ProviderCategory::Headshot,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendOtp => "send_otp",
            Self::VerifyOtp => "verify_otp",
            Self::SubmitDocument => "submit_document",
            Self::SubmitSelfie => "submit_selfie",
            Self::ValidateRegistry => "validate_registry",
            Self::GenerateHeadshot => "generate_headshot",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Requests ───────────────────────────────────────────────────────────

/// Delivery channel of a one-time code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpChannel {
    Sms,
    Email,
}

/// Request to deliver a one-time code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpSendRequest {
    pub channel: OtpChannel,
    /// Phone number or email address.
    pub destination: String,
}

/// Request to check a one-time code against an earlier delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpVerifyRequest {
    pub channel: OtpChannel,
    /// Transaction returned by the delivery call.
    pub transaction_id: TransactionId,
    pub code: String,
}

/// Government document images, base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSubmission {
    pub front_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_image: Option<String>,
}

/// Which biometric check a selfie submission asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiometricCheck {
    Liveness,
    FaceMatch,
}

/// Selfie images for a liveness or face-match check, base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfieSubmission {
    pub check: BiometricCheck,
    pub selfie_image: String,
    /// Portrait to compare against. Required for face matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<String>,
}

/// Identity fields to validate against a government registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryQuery {
    pub subject_id: SubjectId,
    pub identity_fields: serde_json::Map<String, serde_json::Value>,
}

/// Request to generate a professional headshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadshotRequest {
    pub source_image: String,
    #[serde(default)]
    pub style_params: serde_json::Value,
}

// ─── Category Traits ────────────────────────────────────────────────────

/// SMS and email one-time-code provider.
#[async_trait]
pub trait OtpProvider: Send + Sync {
    async fn send_otp(&self, request: &OtpSendRequest) -> Result<ProviderResult, ProviderError>;

    async fn verify_otp(&self, request: &OtpVerifyRequest)
        -> Result<ProviderResult, ProviderError>;
}

/// Document OCR provider.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn submit_document(
        &self,
        submission: &DocumentSubmission,
    ) -> Result<ProviderResult, ProviderError>;
}

/// Liveness and face-match provider.
#[async_trait]
pub trait BiometricProvider: Send + Sync {
    async fn submit_selfie(
        &self,
        submission: &SelfieSubmission,
    ) -> Result<ProviderResult, ProviderError>;
}

/// Government registry provider (CSO, NTRA).
#[async_trait]
pub trait RegistryProvider: Send + Sync {
    async fn validate_registry(
        &self,
        registry: RegistryKind,
        query: &RegistryQuery,
    ) -> Result<ProviderResult, ProviderError>;
}

/// AI headshot generation provider.
#[async_trait]
pub trait HeadshotProvider: Send + Sync {
    async fn generate_headshot(
        &self,
        request: &HeadshotRequest,
    ) -> Result<ProviderResult, ProviderError>;
}

// ─── Gateway ────────────────────────────────────────────────────────────

/// The full capability set the workflow engine depends on.
#[async_trait]
pub trait ExternalVerificationGateway: Send + Sync {
    async fn send_otp(&self, request: &OtpSendRequest) -> Result<ProviderResult, ProviderError>;

    async fn verify_otp(&self, request: &OtpVerifyRequest)
        -> Result<ProviderResult, ProviderError>;

    async fn submit_document(
        &self,
        submission: &DocumentSubmission,
    ) -> Result<ProviderResult, ProviderError>;

    async fn submit_selfie(
        &self,
        submission: &SelfieSubmission,
    ) -> Result<ProviderResult, ProviderError>;

    async fn validate_registry(
        &self,
        registry: RegistryKind,
        query: &RegistryQuery,
    ) -> Result<ProviderResult, ProviderError>;

    async fn generate_headshot(
        &self,
        request: &HeadshotRequest,
    ) -> Result<ProviderResult, ProviderError>;
}

/// Routes each gateway capability to the provider configured for its
/// category.
#[derive(Clone)]
pub struct ProviderSuite {
    otp: Arc<dyn OtpProvider>,
    document: Arc<dyn DocumentProvider>,
    biometric: Arc<dyn BiometricProvider>,
    registry: Arc<dyn RegistryProvider>,
    headshot: Arc<dyn HeadshotProvider>,
}

impl ProviderSuite {
    /// Build a suite where a single provider serves every category.
    pub fn uniform<P>(provider: Arc<P>) -> Self
    where
        P: OtpProvider
            + DocumentProvider
            + BiometricProvider
            + RegistryProvider
            + HeadshotProvider
            + 'static,
    {
        Self {
            otp: provider.clone(),
            document: provider.clone(),
            biometric: provider.clone(),
            registry: provider.clone(),
            headshot: provider,
        }
    }

    /// Replace the OTP provider.
    pub fn with_otp(mut self, provider: Arc<dyn OtpProvider>) -> Self {
        self.otp = provider;
        self
    }

    /// Replace the document OCR provider.
    pub fn with_document(mut self, provider: Arc<dyn DocumentProvider>) -> Self {
        self.document = provider;
        self
    }

    /// Replace the biometric provider.
    pub fn with_biometric(mut self, provider: Arc<dyn BiometricProvider>) -> Self {
        self.biometric = provider;
        self
    }

    /// Replace the registry provider.
    pub fn with_registry(mut self, provider: Arc<dyn RegistryProvider>) -> Self {
        self.registry = provider;
        self
    }

    /// Replace the headshot provider.
    pub fn with_headshot(mut self, provider: Arc<dyn HeadshotProvider>) -> Self {
        self.headshot = provider;
        self
    }
}

impl std::fmt::Debug for ProviderSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSuite").finish_non_exhaustive()
    }
}

#[async_trait]
impl ExternalVerificationGateway for ProviderSuite {
    async fn send_otp(&self, request: &OtpSendRequest) -> Result<ProviderResult, ProviderError> {
        self.otp.send_otp(request).await
    }

    async fn verify_otp(
        &self,
        request: &OtpVerifyRequest,
    ) -> Result<ProviderResult, ProviderError> {
        self.otp.verify_otp(request).await
    }

    async fn submit_document(
        &self,
        submission: &DocumentSubmission,
    ) -> Result<ProviderResult, ProviderError> {
        self.document.submit_document(submission).await
    }

    async fn submit_selfie(
        &self,
        submission: &SelfieSubmission,
    ) -> Result<ProviderResult, ProviderError> {
        self.biometric.submit_selfie(submission).await
    }

    async fn validate_registry(
        &self,
        registry: RegistryKind,
        query: &RegistryQuery,
    ) -> Result<ProviderResult, ProviderError> {
        self.registry.validate_registry(registry, query).await
    }

    async fn generate_headshot(
        &self,
        request: &HeadshotRequest,
    ) -> Result<ProviderResult, ProviderError> {
        self.headshot.generate_headshot(request).await
    }
}

#[async_trait]
impl<T: ExternalVerificationGateway + ?Sized> ExternalVerificationGateway for Arc<T> {
    async fn send_otp(&self, request: &OtpSendRequest) -> Result<ProviderResult, ProviderError> {
        (**self).send_otp(request).await
    }

    async fn verify_otp(
        &self,
        request: &OtpVerifyRequest,
    ) -> Result<ProviderResult, ProviderError> {
        (**self).verify_otp(request).await
    }

    async fn submit_document(
        &self,
        submission: &DocumentSubmission,
    ) -> Result<ProviderResult, ProviderError> {
        (**self).submit_document(submission).await
    }

    async fn submit_selfie(
        &self,
        submission: &SelfieSubmission,
    ) -> Result<ProviderResult, ProviderError> {
        (**self).submit_selfie(submission).await
    }

    async fn validate_registry(
        &self,
        registry: RegistryKind,
        query: &RegistryQuery,
    ) -> Result<ProviderResult, ProviderError> {
        (**self).validate_registry(registry, query).await
    }

    async fn generate_headshot(
        &self,
        request: &HeadshotRequest,
    ) -> Result<ProviderResult, ProviderError> {
        (**self).generate_headshot(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    #[test]
    fn capabilities_map_to_categories() {
        assert_eq!(Capability::VerifyOtp.category(), ProviderCategory::Otp);
        assert_eq!(
            Capability::SubmitSelfie.category(),
            ProviderCategory::Biometric
        );
        assert_eq!(
            Capability::GenerateHeadshot.to_string(),
            "generate_headshot"
        );
    }

    #[tokio::test]
    async fn suite_routes_to_replaced_category() {
        let primary = Arc::new(MockProvider::new());
        let registry = Arc::new(MockProvider::new());
        let suite = ProviderSuite::uniform(primary.clone()).with_registry(registry.clone());

        let query = RegistryQuery {
            subject_id: SubjectId::new("appraiser-1").unwrap(),
            identity_fields: serde_json::Map::new(),
        };
        suite
            .validate_registry(RegistryKind::Cso, &query)
            .await
            .unwrap();
        suite
            .submit_document(&DocumentSubmission {
                front_image: "aGVsbG8=".into(),
                back_image: None,
            })
            .await
            .unwrap();

        assert_eq!(registry.calls(Capability::ValidateRegistry), 1);
        assert_eq!(primary.calls(Capability::ValidateRegistry), 0);
        assert_eq!(primary.calls(Capability::SubmitDocument), 1);
    }
}
