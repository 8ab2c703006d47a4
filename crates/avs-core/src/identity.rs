//! # Identifier Newtypes
//!
//! Each identifier is a distinct type. UUID-based identifiers
//! ([`SessionId`]) are always valid by construction; string-based identifiers
//! ([`SubjectId`], [`TransactionId`]) validate their format in `new()` and on
//! deserialization.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Identifier of one verification session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parse a session identifier from its string form.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ValidationError::InvalidSessionId(s.to_string()))
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the appraiser being verified, as issued by the surrounding
/// marketplace application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    /// Maximum accepted length in characters.
    pub const MAX_LEN: usize = 128;

    /// Create a validated subject identifier.
    ///
    /// Leading and trailing whitespace is trimmed; the remainder must be
    /// non-empty, at most [`Self::MAX_LEN`] characters, and free of
    /// whitespace and control characters.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = s.into();
        let trimmed = raw.trim();
        let valid = !trimmed.is_empty()
            && trimmed.chars().count() <= Self::MAX_LEN
            && !trimmed.chars().any(|c| c.is_whitespace() || c.is_control());
        if !valid {
            return Err(ValidationError::InvalidSubjectId(raw));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SubjectId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SubjectId> for String {
    fn from(id: SubjectId) -> Self {
        id.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction reference returned by an external provider.
///
/// Opaque to the workflow engine; kept on the step record so a later
/// submission (OTP verification) and support staff can correlate calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(String);

impl TransactionId {
    /// Maximum accepted length in characters.
    pub const MAX_LEN: usize = 256;

    /// Create a validated transaction identifier.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = s.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().count() > Self::MAX_LEN {
            return Err(ValidationError::InvalidTransactionId(raw));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TransactionId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TransactionId> for String {
    fn from(id: TransactionId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_roundtrips_through_string() {
        let id = SessionId::new();
        let parsed = SessionId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn session_id_rejects_garbage() {
        assert!(matches!(
            SessionId::parse("not-a-uuid"),
            Err(ValidationError::InvalidSessionId(_))
        ));
    }

    #[test]
    fn subject_id_trims_and_validates() {
        let id = SubjectId::new("  appraiser-1042 ").unwrap();
        assert_eq!(id.as_str(), "appraiser-1042");

        assert!(SubjectId::new("").is_err());
        assert!(SubjectId::new("   ").is_err());
        assert!(SubjectId::new("two words").is_err());
        assert!(SubjectId::new("x".repeat(SubjectId::MAX_LEN + 1)).is_err());
        assert!(SubjectId::new("x".repeat(SubjectId::MAX_LEN)).is_ok());
    }

    #[test]
    fn subject_id_deserialization_validates() {
        let ok: SubjectId = serde_json::from_str("\"appraiser-7\"").unwrap();
        assert_eq!(ok.as_str(), "appraiser-7");
        let bad: Result<SubjectId, _> = serde_json::from_str("\"has space\"");
        assert!(bad.is_err());
    }

    #[test]
    fn transaction_id_rejects_empty() {
        assert!(TransactionId::new("").is_err());
        assert_eq!(TransactionId::new("otp-1").unwrap().as_str(), "otp-1");
    }
}
