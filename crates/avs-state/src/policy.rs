//! # Classification Policy and Attempt Quotas
//!
//! Step-specific tables that turn a normalized provider result into one of
//! four buckets, and the per-step attempt budgets.
//!
//! ## Classification rule
//!
//! 1. A result carrying an `error_code` is classified by the step's code
//!    table; codes missing from the table use the step's `unknown_code`
//!    bucket.
//! 2. Otherwise `failed` is `rejected` and `inconclusive` is `ambiguous`.
//! 3. A `passed` result is checked against the confidence band, if the step
//!    has one. A missing score is `ambiguous`.
//!
//! The registry code maps below are defaults. Deployments replace them from
//! the workflow configuration file when a provider contract differs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use avs_core::{ProviderResult, ProviderStatus, StepId};

/// Bucket a provider result falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Definitive success.
    Success,
    /// Definitive failure; the subject may retry while attempts remain.
    Rejected,
    /// Definitive failure that ends the step regardless of remaining attempts.
    HardFail,
    /// Indeterminate; routed to manual review.
    Ambiguous,
}

impl Classification {
    /// The snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::HardFail => "hard_fail",
            Self::Ambiguous => "ambiguous",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score thresholds for a `passed` result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBand {
    /// Scores at or above this value are a success.
    pub pass_at: f64,
    /// Scores at or above this value (but below `pass_at`) go to review.
    /// Anything lower is rejected.
    pub review_at: f64,
}

impl ConfidenceBand {
    /// Build a band, checking `0 <= review_at <= pass_at <= 1`.
    pub fn new(pass_at: f64, review_at: f64) -> Result<Self, PolicyError> {
        let band = Self { pass_at, review_at };
        band.validate()?;
        Ok(band)
    }

    fn validate(&self) -> Result<(), PolicyError> {
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_range(self.pass_at) || !in_range(self.review_at) || self.review_at > self.pass_at {
            return Err(PolicyError::InvalidBand {
                pass_at: self.pass_at,
                review_at: self.review_at,
            });
        }
        Ok(())
    }

    /// Bucket a score.
    pub fn classify(&self, score: f64) -> Classification {
        if score >= self.pass_at {
            Classification::Success
        } else if score >= self.review_at {
            Classification::Ambiguous
        } else {
            Classification::Rejected
        }
    }
}

/// Classification table for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPolicy {
    /// Key in the raw payload holding the score. Falls back to the
    /// result's `confidence` when unset or absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_field: Option<String>,
    /// Thresholds applied to `passed` results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<ConfidenceBand>,
    /// Provider error code to bucket.
    #[serde(default)]
    pub codes: BTreeMap<String, Classification>,
    /// Bucket for error codes missing from `codes`.
    #[serde(default = "default_unknown_code")]
    pub unknown_code: Classification,
}

fn default_unknown_code() -> Classification {
    Classification::Ambiguous
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self {
            confidence_field: None,
            band: None,
            codes: BTreeMap::new(),
            unknown_code: default_unknown_code(),
        }
    }
}

impl StepPolicy {
    fn with_codes(
        mut self,
        bucket: Classification,
        codes: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        for code in codes {
            self.codes.insert(code.to_string(), bucket);
        }
        self
    }

    fn with_band(mut self, field: Option<&str>, pass_at: f64, review_at: f64) -> Self {
        self.confidence_field = field.map(str::to_string);
        self.band = Some(ConfidenceBand { pass_at, review_at });
        self
    }

    fn unknown(mut self, bucket: Classification) -> Self {
        self.unknown_code = bucket;
        self
    }

    /// Bucket a provider result.
    pub fn classify(&self, result: &ProviderResult) -> Classification {
        if let Some(code) = result.error_code.as_deref().filter(|c| !c.is_empty()) {
            return self.codes.get(code).copied().unwrap_or(self.unknown_code);
        }
        match result.status {
            ProviderStatus::Failed => Classification::Rejected,
            ProviderStatus::Inconclusive => Classification::Ambiguous,
            ProviderStatus::Passed => match &self.band {
                None => Classification::Success,
                Some(band) => match self.score(result) {
                    Some(score) => band.classify(score),
                    None => Classification::Ambiguous,
                },
            },
        }
    }

    /// The score the band is applied to.
    pub fn score(&self, result: &ProviderResult) -> Option<f64> {
        self.confidence_field
            .as_deref()
            .and_then(|field| result.metric(field))
            .or(result.confidence.filter(|c| c.is_finite()))
    }

    fn validate(&self, step: StepId) -> Result<(), PolicyError> {
        if let Some(band) = &self.band {
            band.validate().map_err(|_| PolicyError::InvalidStepBand {
                step,
                pass_at: band.pass_at,
                review_at: band.review_at,
            })?;
        }
        Ok(())
    }
}

/// Classification tables for every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyTable {
    policies: BTreeMap<StepId, StepPolicy>,
}

impl PolicyTable {
    /// Default tables for the eight standard steps.
    pub fn standard() -> Self {
        use Classification::*;
        let otp = StepPolicy::default()
            .with_codes(Rejected, ["OTP_MISMATCH", "OTP_EXPIRED"])
            .with_codes(HardFail, ["OTP_BLOCKED"])
            .unknown(Rejected);

        let mut policies = BTreeMap::new();
        policies.insert(StepId::PhoneOtp, otp.clone());
        policies.insert(StepId::EmailOtp, otp);
        policies.insert(
            StepId::Document,
            StepPolicy::default()
                .with_band(None, 0.85, 0.60)
                .with_codes(Rejected, ["DOC_UNREADABLE", "DOC_LOW_QUALITY"])
                .with_codes(HardFail, ["DOC_EXPIRED", "DOC_TAMPERED"]),
        );
        policies.insert(
            StepId::SelfieLiveness,
            StepPolicy::default()
                .with_band(Some("liveness_score"), 0.90, 0.70)
                .with_codes(Rejected, ["NO_FACE_DETECTED"])
                .with_codes(HardFail, ["LIVENESS_SPOOF"]),
        );
        policies.insert(
            StepId::FaceMatch,
            StepPolicy::default()
                .with_band(Some("match_score"), 0.85, 0.65)
                .with_codes(Rejected, ["FACE_MISMATCH", "NO_FACE_DETECTED"]),
        );
        policies.insert(
            StepId::RegistryCso,
            StepPolicy::default()
                .with_codes(Rejected, ["CSO_NO_RECORD", "CSO_DATA_MISMATCH"])
                .with_codes(HardFail, ["CSO_ID_REVOKED", "CSO_DECEASED"])
                .with_codes(Ambiguous, ["CSO_UNABLE_TO_CONFIRM"]),
        );
        policies.insert(
            StepId::RegistryNtra,
            StepPolicy::default()
                .with_codes(Rejected, ["NTRA_NOT_OWNER", "NTRA_NUMBER_INACTIVE"])
                .with_codes(HardFail, ["NTRA_LINE_BLACKLISTED"])
                .with_codes(Ambiguous, ["NTRA_UNABLE_TO_CONFIRM"]),
        );
        policies.insert(
            StepId::Headshot,
            StepPolicy::default()
                .with_codes(Rejected, ["HEADSHOT_NO_FACE", "HEADSHOT_POLICY_VIOLATION"])
                .unknown(Rejected),
        );
        Self { policies }
    }

    /// Replace the policy of one step after validating it.
    pub fn set(&mut self, step: StepId, policy: StepPolicy) -> Result<(), PolicyError> {
        policy.validate(step)?;
        self.policies.insert(step, policy);
        Ok(())
    }

    /// Policy for `step`. Steps without an entry use [`StepPolicy::default`].
    pub fn get(&self, step: StepId) -> std::borrow::Cow<'_, StepPolicy> {
        match self.policies.get(&step) {
            Some(policy) => std::borrow::Cow::Borrowed(policy),
            None => std::borrow::Cow::Owned(StepPolicy::default()),
        }
    }

    /// Bucket a provider result for `step`.
    pub fn classify(&self, step: StepId, result: &ProviderResult) -> Classification {
        self.get(step).classify(result)
    }

    /// Check every band.
    pub fn validate(&self) -> Result<(), PolicyError> {
        self.policies
            .iter()
            .try_for_each(|(step, policy)| policy.validate(*step))
    }

    /// Iterate over configured policies.
    pub fn iter(&self) -> impl Iterator<Item = (StepId, &StepPolicy)> {
        self.policies.iter().map(|(s, p)| (*s, p))
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Attempt budget per step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptQuotas {
    quotas: BTreeMap<StepId, u32>,
}

impl AttemptQuotas {
    /// Quota for steps without an explicit entry.
    pub const FALLBACK: u32 = 3;

    /// OTP 5, registry 10, everything else 3.
    pub fn standard() -> Self {
        let quotas = StepId::ALL
            .iter()
            .map(|step| {
                let quota = if step.is_otp() {
                    5
                } else if step.registry().is_some() {
                    10
                } else {
                    Self::FALLBACK
                };
                (*step, quota)
            })
            .collect();
        Self { quotas }
    }

    /// Override the quota of one step.
    pub fn set(&mut self, step: StepId, quota: u32) -> Result<(), PolicyError> {
        if quota == 0 {
            return Err(PolicyError::ZeroQuota(step));
        }
        self.quotas.insert(step, quota);
        Ok(())
    }

    /// Quota for `step`.
    pub fn get(&self, step: StepId) -> u32 {
        self.quotas.get(&step).copied().unwrap_or(Self::FALLBACK)
    }

    /// Reject zero quotas, e.g. after deserialization.
    pub fn validate(&self) -> Result<(), PolicyError> {
        match self.quotas.iter().find(|(_, q)| **q == 0) {
            Some((step, _)) => Err(PolicyError::ZeroQuota(*step)),
            None => Ok(()),
        }
    }
}

impl Default for AttemptQuotas {
    fn default() -> Self {
        Self::standard()
    }
}

/// Errors from policy or quota configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    /// Band thresholds out of range or inverted.
    #[error("invalid confidence band: pass_at={pass_at}, review_at={review_at} (need 0 <= review_at <= pass_at <= 1)")]
    InvalidBand {
        /// Success threshold.
        pass_at: f64,
        /// Review threshold.
        review_at: f64,
    },

    /// Band thresholds out of range or inverted for a specific step.
    #[error("invalid confidence band for {step}: pass_at={pass_at}, review_at={review_at}")]
    InvalidStepBand {
        /// The step whose policy is invalid.
        step: StepId,
        /// Success threshold.
        pass_at: f64,
        /// Review threshold.
        review_at: f64,
    },

    /// A step was given no attempts at all.
    #[error("attempt quota for {0} must be at least 1")]
    ZeroQuota(StepId),
}

// ─── Tests ───────────────────────────────────────────────────────────
