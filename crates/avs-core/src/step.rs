//! # Verification Steps and Provider Categories
//!
//! The eight steps an appraiser completes on the way to "verified", and the
//! five external provider categories that perform them.
//!
//! ```text
//! phone_otp ─┐
//! email_otp  │            ┌─▶ registry_cso
//! document ──┼────────────┼─▶ registry_ntra (also needs phone_otp)
//!            │            └─▶ face_match (also needs selfie_liveness)
//! selfie_liveness ─────────▶ headshot
//! ```
//!
//! The arrows above are the standard dependency graph; the graph itself is
//! configuration and lives in `avs-state`.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// One discrete verification action, tracked as a step record.
///
/// Variant order is the canonical step order used for tie-breaking when
/// several steps are eligible at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    /// Phone number confirmation by one-time code.
    PhoneOtp,
    /// Email address confirmation by one-time code.
    EmailOtp,
    /// Government document capture with OCR extraction.
    Document,
    /// Selfie capture with liveness detection.
    SelfieLiveness,
    /// Biometric comparison of the selfie against the document portrait.
    FaceMatch,
    /// Civil registry (CSO) validation of the extracted identity.
    RegistryCso,
    /// Telecom regulator (NTRA) validation that the phone line belongs to the subject.
    RegistryNtra,
    /// AI-generated professional headshot for the public profile.
    Headshot,
}

impl StepId {
    /// All steps in canonical order.
    pub const ALL: [StepId; 8] = [
        Self::PhoneOtp,
        Self::EmailOtp,
        Self::Document,
        Self::SelfieLiveness,
        Self::FaceMatch,
        Self::RegistryCso,
        Self::RegistryNtra,
        Self::Headshot,
    ];

    /// The snake_case wire name of this step.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhoneOtp => "phone_otp",
            Self::EmailOtp => "email_otp",
            Self::Document => "document",
            Self::SelfieLiveness => "selfie_liveness",
            Self::FaceMatch => "face_match",
            Self::RegistryCso => "registry_cso",
            Self::RegistryNtra => "registry_ntra",
            Self::Headshot => "headshot",
        }
    }

    /// The provider category that performs this step.
    pub fn category(&self) -> ProviderCategory {
        match self {
            Self::PhoneOtp | Self::EmailOtp => ProviderCategory::Otp,
            Self::Document => ProviderCategory::DocumentOcr,
            Self::SelfieLiveness | Self::FaceMatch => ProviderCategory::Biometric,
            Self::RegistryCso | Self::RegistryNtra => ProviderCategory::Registry,
            Self::Headshot => ProviderCategory::Headshot,
        }
    }

    /// Whether this step is confirmed by a one-time code.
    pub fn is_otp(&self) -> bool {
        matches!(self, Self::PhoneOtp | Self::EmailOtp)
    }

    /// The registry validated by this step, if it is a registry step.
    pub fn registry(&self) -> Option<RegistryKind> {
        match self {
            Self::RegistryCso => Some(RegistryKind::Cso),
            Self::RegistryNtra => Some(RegistryKind::Ntra),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|step| step.as_str() == s.trim())
            .ok_or_else(|| ValidationError::UnknownStep(s.to_string()))
    }
}

/// External provider category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCategory {
    /// SMS / email one-time-code delivery and verification.
    Otp,
    /// Government document OCR extraction.
    DocumentOcr,
    /// Liveness detection and face matching.
    Biometric,
    /// Government registry validation.
    Registry,
    /// AI headshot generation.
    Headshot,
}

impl ProviderCategory {
    /// All categories.
    pub const ALL: [ProviderCategory; 5] = [
        Self::Otp,
        Self::DocumentOcr,
        Self::Biometric,
        Self::Registry,
        Self::Headshot,
    ];

    /// The snake_case name of this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Otp => "otp",
            Self::DocumentOcr => "document_ocr",
            Self::Biometric => "biometric",
            Self::Registry => "registry",
            Self::Headshot => "headshot",
        }
    }

    /// Default per-operation timeout for calls to this category.
    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::Otp => Duration::from_secs(10),
            Self::Registry => Duration::from_secs(20),
            Self::DocumentOcr | Self::Biometric | Self::Headshot => Duration::from_secs(30),
        }
    }
}

impl std::fmt::Display for ProviderCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Government registry consulted by a registry validation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    /// Civil status / national ID registry.
    Cso,
    /// Telecom regulator subscriber registry.
    Ntra,
}

impl RegistryKind {
    /// The snake_case name of this registry.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cso => "cso",
            Self::Ntra => "ntra",
        }
    }
}

impl std::fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_names_roundtrip() {
        for step in StepId::ALL {
            assert_eq!(step.as_str().parse::<StepId>().unwrap(), step);
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(json, format!("\"{}\"", step.as_str()));
        }
    }

    #[test]
    fn unknown_step_is_rejected() {
        assert!(matches!(
            "retina".parse::<StepId>(),
            Err(ValidationError::UnknownStep(_))
        ));
    }

    #[test]
    fn canonical_order_matches_all() {
        let mut sorted = StepId::ALL;
        sorted.sort();
        assert_eq!(sorted, StepId::ALL);
    }

    #[test]
    fn categories_cover_every_step() {
        assert_eq!(StepId::PhoneOtp.category(), ProviderCategory::Otp);
        assert_eq!(StepId::FaceMatch.category(), ProviderCategory::Biometric);
        assert_eq!(StepId::RegistryNtra.category(), ProviderCategory::Registry);
        assert_eq!(StepId::RegistryNtra.registry(), Some(RegistryKind::Ntra));
        assert_eq!(StepId::Document.registry(), None);
    }

    #[test]
    fn otp_timeouts_are_shortest() {
        let otp = ProviderCategory::Otp.default_timeout();
        for category in ProviderCategory::ALL {
            assert!(category.default_timeout() >= otp);
            assert!(category.default_timeout() <= Duration::from_secs(30));
        }
    }
}
