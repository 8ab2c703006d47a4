//! Gateway configuration.
//!
//! Provider base URLs, credentials and retry settings come from environment
//! variables. In the default `http` mode every category needs a URL; the mock
//! provider only runs when `PROVIDER_MODE=mock` is set explicitly.

use std::collections::BTreeMap;
use std::time::Duration;

use url::Url;
use zeroize::Zeroizing;

use avs_core::ProviderCategory;

use crate::resilient::{RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_RETRIES};

/// How provider categories are served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProviderMode {
    /// Every category is served over HTTP and must have a base URL.
    #[default]
    Http,
    /// Categories without a base URL are served by the mock provider.
    /// Local development and tests only.
    Mock,
}

impl std::str::FromStr for ProviderMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "mock" => Ok(Self::Mock),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

/// Configuration for connecting to the external verification providers.
///
/// Custom `Debug` implementation redacts the `api_token` field
/// to prevent credential leakage in log output.
#[derive(Clone)]
pub struct GatewayConfig {
    pub mode: ProviderMode,
    /// Base URL per category.
    pub endpoints: BTreeMap<ProviderCategory, Url>,
    /// Bearer token sent to every provider.
    pub api_token: Option<Zeroizing<String>>,
    /// Retries after the initial attempt for transient failures.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds.
    pub base_delay_ms: u64,
    /// Per-category timeout overrides.
    pub timeouts: BTreeMap<ProviderCategory, Duration>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("mode", &self.mode)
            .field("endpoints", &self.endpoints)
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: ProviderMode::Http,
            endpoints: BTreeMap::new(),
            api_token: None,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            timeouts: BTreeMap::new(),
        }
    }
}

impl GatewayConfig {
    /// Mock-mode configuration for local development and tests. Endpoints
    /// added afterwards are still served over HTTP.
    pub fn local_mock() -> Self {
        Self {
            mode: ProviderMode::Mock,
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `PROVIDER_MODE`: `http` (default) or `mock`
    /// - `PROVIDER_OTP_URL`, `PROVIDER_DOCUMENT_OCR_URL`,
    ///   `PROVIDER_BIOMETRIC_URL`, `PROVIDER_REGISTRY_URL`,
    ///   `PROVIDER_HEADSHOT_URL` (all required in `http` mode)
    /// - `PROVIDER_API_TOKEN` (optional)
    /// - `PROVIDER_MAX_RETRIES` (default: 2)
    /// - `PROVIDER_BASE_DELAY_MS` (default: 500)
    /// - `PROVIDER_<CATEGORY>_TIMEOUT_SECS` (default: per category)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut endpoints = BTreeMap::new();
        let mut timeouts = BTreeMap::new();
        for category in ProviderCategory::ALL {
            let prefix = format!("PROVIDER_{}", category.as_str().to_ascii_uppercase());

            let url_var = format!("{prefix}_URL");
            if let Some(raw) = lookup(&url_var).filter(|v| !v.trim().is_empty()) {
                let url = Url::parse(raw.trim())
                    .map_err(|e| ConfigError::InvalidUrl(url_var.clone(), e.to_string()))?;
                endpoints.insert(category, url);
            }

            let timeout_var = format!("{prefix}_TIMEOUT_SECS");
            if let Some(secs) = parse_number::<u64, _>(&lookup, &timeout_var)? {
                if secs == 0 {
                    return Err(ConfigError::InvalidNumber(timeout_var, "must be > 0".into()));
                }
                timeouts.insert(category, Duration::from_secs(secs));
            }
        }

        let mode = match lookup("PROVIDER_MODE").filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw.parse()?,
            None => ProviderMode::Http,
        };

        Ok(Self {
            mode,
            endpoints,
            api_token: lookup("PROVIDER_API_TOKEN")
                .filter(|t| !t.is_empty())
                .map(Zeroizing::new),
            max_retries: parse_number(&lookup, "PROVIDER_MAX_RETRIES")?
                .unwrap_or(DEFAULT_MAX_RETRIES),
            base_delay_ms: parse_number(&lookup, "PROVIDER_BASE_DELAY_MS")?
                .unwrap_or(DEFAULT_BASE_DELAY_MS),
            timeouts,
        })
    }

    pub fn is_mock(&self) -> bool {
        self.mode == ProviderMode::Mock
    }

    /// Categories without a base URL.
    pub fn missing_endpoints(&self) -> Vec<ProviderCategory> {
        ProviderCategory::ALL
            .into_iter()
            .filter(|c| !self.endpoints.contains_key(c))
            .collect()
    }

    /// Refuse an `http` configuration that leaves any category without a URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_mock() {
            return Ok(());
        }
        match self.missing_endpoints().first() {
            Some(category) => Err(ConfigError::MissingEndpoint(*category)),
            None => Ok(()),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            timeouts: self.timeouts.clone(),
        }
    }
}

fn parse_number<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidNumber(var.to_string(), e.to_string())),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid URL for {0}: {1}")]
    InvalidUrl(String, String),
    #[error("invalid value for {0}: {1}")]
    InvalidNumber(String, String),
    #[error("PROVIDER_MODE must be \"http\" or \"mock\", got {0:?}")]
    InvalidMode(String),
    #[error("no provider URL configured for {0} (set PROVIDER_{upper}_URL or PROVIDER_MODE=mock)", upper = .0.as_str().to_ascii_uppercase())]
    MissingEndpoint(ProviderCategory),
    #[error("PROVIDER_API_TOKEN contains characters not allowed in an HTTP header")]
    InvalidToken,
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}
