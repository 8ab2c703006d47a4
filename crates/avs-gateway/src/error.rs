//! Provider call error types.

use avs_core::ProviderCategory;

use crate::gateway::Capability;

/// Errors from provider calls.
///
/// Domain-level rejections are not represented here; they arrive as
/// [`avs_core::ProviderResult`] values with `status = failed`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// The call did not complete within the per-operation timeout.
    #[error("{capability} timed out after {elapsed_ms}ms")]
    Timeout {
        capability: Capability,
        elapsed_ms: u64,
    },
    /// Connection-level failure (refused, reset, DNS).
    #[error("transport error calling {capability}: {reason}")]
    Transport {
        capability: Capability,
        reason: String,
    },
    /// Provider answered 408, 429 or 5xx.
    #[error("{capability} unavailable (HTTP {status}): {body}")]
    ServiceUnavailable {
        capability: Capability,
        status: u16,
        body: String,
    },
    /// Provider refused the request itself (4xx other than 408/429).
    #[error("{capability} rejected the request (HTTP {status}): {body}")]
    RequestRejected {
        capability: Capability,
        status: u16,
        body: String,
    },
    /// Provider answered 2xx with a body that is not a normalized result.
    #[error("invalid response from {capability}: {reason}")]
    InvalidResponse {
        capability: Capability,
        reason: String,
    },
    /// No provider is configured for the category.
    #[error("no provider configured for category {category}")]
    NotConfigured { category: ProviderCategory },
    /// Every attempt failed with a transient error.
    #[error("{capability} failed after {attempts} attempts: {last}")]
    Exhausted {
        capability: Capability,
        attempts: u32,
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Whether a retry of the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Transport { .. } | Self::ServiceUnavailable { .. }
        )
    }

    /// Whether the provider should be reported to callers as temporarily
    /// unavailable rather than as a hard integration error.
    pub fn is_unavailable(&self) -> bool {
        self.is_transient() || matches!(self, Self::Exhausted { .. })
    }
}
