//! # Normalized Provider Result
//!
//! Every gateway operation, regardless of provider, returns a
//! [`ProviderResult`]. Domain-level rejections (wrong code, registry
//! mismatch) are results with [`ProviderStatus::Failed`] and an error code;
//! they are never transport errors.

use serde::{Deserialize, Serialize};

use crate::identity::TransactionId;

/// Outcome reported by the provider for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    /// The provider accepted the submission.
    Passed,
    /// The provider explicitly rejected the submission.
    Failed,
    /// The provider could not reach a determination.
    Inconclusive,
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Inconclusive => "inconclusive",
        };
        f.write_str(s)
    }
}

/// Provider-agnostic result of one gateway operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    /// Provider verdict.
    pub status: ProviderStatus,
    /// Overall confidence in `[0, 1]`, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Provider error code accompanying a rejection or indeterminate verdict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Provider transaction reference.
    pub transaction_id: TransactionId,
    /// Remaining provider payload (scores, extracted fields, URLs).
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl ProviderResult {
    /// A passing result with no score or payload.
    pub fn passed(transaction_id: TransactionId) -> Self {
        Self {
            status: ProviderStatus::Passed,
            confidence: None,
            error_code: None,
            transaction_id,
            raw: serde_json::Value::Null,
        }
    }

    /// A rejected result carrying a provider error code.
    pub fn failed(transaction_id: TransactionId, error_code: impl Into<String>) -> Self {
        Self {
            status: ProviderStatus::Failed,
            confidence: None,
            error_code: Some(error_code.into()),
            transaction_id,
            raw: serde_json::Value::Null,
        }
    }

    /// Attach a confidence score.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Attach the raw provider payload.
    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }

    /// Read a named numeric score from the raw payload.
    ///
    /// Returns `None` when the key is absent, not a number, or not finite.
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.raw
            .get(key)
            .and_then(serde_json::Value::as_f64)
            .filter(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn() -> TransactionId {
        TransactionId::new("txn-1").unwrap()
    }

    #[test]
    fn metric_reads_numeric_fields_only() {
        let result = ProviderResult::passed(txn()).with_raw(serde_json::json!({
            "liveness_score": 0.93,
            "match_score": "high",
        }));
        assert_eq!(result.metric("liveness_score"), Some(0.93));
        assert_eq!(result.metric("match_score"), None);
        assert_eq!(result.metric("absent"), None);
    }

    #[test]
    fn failed_carries_code() {
        let result = ProviderResult::failed(txn(), "OTP_MISMATCH");
        assert_eq!(result.status, ProviderStatus::Failed);
        assert_eq!(result.error_code.as_deref(), Some("OTP_MISMATCH"));
    }

    #[test]
    fn deserializes_with_missing_optionals() {
        let result: ProviderResult = serde_json::from_value(serde_json::json!({
            "status": "inconclusive",
            "transaction_id": "reg-77",
        }))
        .unwrap();
        assert_eq!(result.status, ProviderStatus::Inconclusive);
        assert!(result.confidence.is_none());
        assert!(result.raw.is_null());
    }
}
