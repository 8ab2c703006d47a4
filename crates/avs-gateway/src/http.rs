//! # HTTP Provider Client
//!
//! `reqwest` implementation of every category trait against the provider
//! integration layer. Each category has its own base URL; all categories
//! share one client, bearer token and normalized JSON envelope.
//!
//! ## Endpoints
//!
//! | Capability | Request |
//! |------------|---------|
//! | `send_otp` | `POST {otp}/v1/otp/send` |
//! | `verify_otp` | `POST {otp}/v1/otp/verify` |
//! | `submit_document` | `POST {document_ocr}/v1/documents` |
//! | `submit_selfie` | `POST {biometric}/v1/selfies` |
//! | `validate_registry` | `POST {registry}/v1/registries/{cso\|ntra}/validate` |
//! | `generate_headshot` | `POST {headshot}/v1/headshots` |
//!
//! ## Error Handling
//!
//! 2xx bodies must deserialize into [`avs_core::ProviderResult`]. 408, 429
//! and 5xx map to `ServiceUnavailable`, other 4xx to `RequestRejected`.
//! Retries are NOT built into this client; wrap it in
//! [`crate::ResilientGateway`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use avs_core::{ProviderCategory, ProviderResult, RegistryKind};

use crate::config::{ConfigError, GatewayConfig};
use crate::error::ProviderError;
use crate::gateway::{
    BiometricProvider, Capability, DocumentProvider, DocumentSubmission, HeadshotProvider,
    HeadshotRequest, OtpProvider, OtpSendRequest, OtpVerifyRequest, ProviderSuite,
    RegistryProvider, RegistryQuery, SelfieSubmission,
};
use crate::mock::MockProvider;

/// Longest response body excerpt kept in error values.
const BODY_EXCERPT_LEN: usize = 512;

/// HTTP client for the external verification providers.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    base_urls: BTreeMap<ProviderCategory, String>,
    /// Transport-level ceiling; the per-category timeout is enforced by the
    /// resilient wrapper.
    request_timeout: Duration,
}

impl HttpProvider {
    /// Build a client for every category that has a configured URL.
    pub fn new(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let request_timeout = ProviderCategory::ALL
            .iter()
            .map(|c| config.retry_policy().timeout_for(*c))
            .max()
            .unwrap_or(Duration::from_secs(30));

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        if let Some(token) = &config.api_token {
            let mut value =
                reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
                    .map_err(|_| ConfigError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        let base_urls = config
            .endpoints
            .iter()
            .map(|(category, url)| (*category, url.as_str().trim_end_matches('/').to_string()))
            .collect();

        Ok(Self {
            client,
            base_urls,
            request_timeout,
        })
    }

    /// Whether a base URL is configured for `category`.
    pub fn serves(&self, category: ProviderCategory) -> bool {
        self.base_urls.contains_key(&category)
    }

    async fn post<B: Serialize + Sync>(
        &self,
        capability: Capability,
        path: &str,
        body: &B,
    ) -> Result<ProviderResult, ProviderError> {
        let category = capability.category();
        let base = self
            .base_urls
            .get(&category)
            .ok_or(ProviderError::NotConfigured { category })?;
        let url = format!("{base}{path}");

        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        capability,
                        elapsed_ms: u64::try_from(self.request_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                    }
                } else {
                    ProviderError::Transport {
                        capability,
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = excerpt(resp.text().await.unwrap_or_default());
            let code = status.as_u16();
            let retryable = status.is_server_error()
                || status == reqwest::StatusCode::REQUEST_TIMEOUT
                || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
            return Err(if retryable {
                ProviderError::ServiceUnavailable {
                    capability,
                    status: code,
                    body,
                }
            } else {
                ProviderError::RequestRejected {
                    capability,
                    status: code,
                    body,
                }
            });
        }

        resp.json::<ProviderResult>()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                capability,
                reason: format!("response deserialization failed: {e}"),
            })
    }
}

impl ProviderSuite {
    /// Build a suite from configuration. Categories with a base URL are
    /// served over HTTP. In [`ProviderMode::Mock`](crate::ProviderMode) the
    /// rest fall back to a shared [`MockProvider`]; in `http` mode a missing
    /// URL is a [`ConfigError::MissingEndpoint`].
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mock = std::sync::Arc::new(MockProvider::new());
        let mut suite = ProviderSuite::uniform(mock);
        let missing = config.missing_endpoints();
        if config.is_mock() && !missing.is_empty() {
            tracing::warn!(
                categories = ?missing,
                "PROVIDER_MODE=mock, categories without a URL use the mock provider"
            );
        }
        if config.endpoints.is_empty() {
            return Ok(suite);
        }

        let http = std::sync::Arc::new(HttpProvider::new(config)?);
        for category in ProviderCategory::ALL {
            if !http.serves(category) {
                continue;
            }
            suite = match category {
                ProviderCategory::Otp => suite.with_otp(http.clone()),
                ProviderCategory::DocumentOcr => suite.with_document(http.clone()),
                ProviderCategory::Biometric => suite.with_biometric(http.clone()),
                ProviderCategory::Registry => suite.with_registry(http.clone()),
                ProviderCategory::Headshot => suite.with_headshot(http.clone()),
            };
        }
        Ok(suite)
    }
}

fn excerpt(mut body: String) -> String {
    if body.len() > BODY_EXCERPT_LEN {
        let mut cut = BODY_EXCERPT_LEN;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

#[async_trait]
impl OtpProvider for HttpProvider {
    async fn send_otp(&self, request: &OtpSendRequest) -> Result<ProviderResult, ProviderError> {
        self.post(Capability::SendOtp, "/v1/otp/send", request).await
    }

    async fn verify_otp(
        &self,
        request: &OtpVerifyRequest,
    ) -> Result<ProviderResult, ProviderError> {
        self.post(Capability::VerifyOtp, "/v1/otp/verify", request)
            .await
    }
}

#[async_trait]
impl DocumentProvider for HttpProvider {
    async fn submit_document(
        &self,
        submission: &DocumentSubmission,
    ) -> Result<ProviderResult, ProviderError> {
        self.post(Capability::SubmitDocument, "/v1/documents", submission)
            .await
    }
}

#[async_trait]
impl BiometricProvider for HttpProvider {
    async fn submit_selfie(
        &self,
        submission: &SelfieSubmission,
    ) -> Result<ProviderResult, ProviderError> {
        self.post(Capability::SubmitSelfie, "/v1/selfies", submission)
            .await
    }
}

#[async_trait]
impl RegistryProvider for HttpProvider {
    async fn validate_registry(
        &self,
        registry: RegistryKind,
        query: &RegistryQuery,
    ) -> Result<ProviderResult, ProviderError> {
        let path = format!("/v1/registries/{}/validate", registry.as_str());
        self.post(Capability::ValidateRegistry, &path, query).await
    }
}

#[async_trait]
impl HeadshotProvider for HttpProvider {
    async fn generate_headshot(
        &self,
        request: &HeadshotRequest,
    ) -> Result<ProviderResult, ProviderError> {
        self.post(Capability::GenerateHeadshot, "/v1/headshots", request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        let body = "é".repeat(BODY_EXCERPT_LEN);
        let cut = excerpt(body);
        assert!(cut.len() <= BODY_EXCERPT_LEN);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn token_with_newline_is_rejected() {
        let config = GatewayConfig {
            api_token: Some(zeroize::Zeroizing::new("bad\ntoken".to_string())),
            ..GatewayConfig::default()
        };
        assert!(matches!(
            HttpProvider::new(&config),
            Err(ConfigError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn unconfigured_category_is_reported() {
        let provider = HttpProvider::new(&GatewayConfig::default()).unwrap();
        assert!(!provider.serves(ProviderCategory::Headshot));
        let err = provider
            .generate_headshot(&HeadshotRequest {
                source_image: "aW1n".into(),
                style_params: serde_json::Value::Null,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::NotConfigured {
                category: ProviderCategory::Headshot
            }
        ));
    }
}
