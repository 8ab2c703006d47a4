//! # Integration Tests for the HTTP Provider
//!
//! Runs [`HttpProvider`] and [`ResilientGateway`] against wiremock servers
//! to verify request construction, envelope parsing, status mapping and
//! retry behaviour without live provider access.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use avs_core::{ProviderCategory, ProviderStatus, RegistryKind, SubjectId, TransactionId};
use avs_gateway::{
    Capability, ConfigError, ExternalVerificationGateway, GatewayConfig, HttpProvider,
    OtpChannel, OtpProvider, OtpSendRequest, OtpVerifyRequest, ProviderError, ProviderMode,
    ProviderSuite, RegistryProvider, RegistryQuery, ResilientGateway, RetryPolicy,
};
use url::Url;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zeroize::Zeroizing;

fn config_for(server: &MockServer, categories: &[ProviderCategory]) -> GatewayConfig {
    let url = Url::parse(&server.uri()).expect("server uri");
    GatewayConfig {
        endpoints: categories.iter().map(|c| (*c, url.clone())).collect(),
        api_token: Some(Zeroizing::new("test-api-key".to_string())),
        ..GatewayConfig::default()
    }
}

fn provider(server: &MockServer) -> HttpProvider {
    HttpProvider::new(&config_for(server, &ProviderCategory::ALL)).expect("provider build")
}

fn send_request() -> OtpSendRequest {
    OtpSendRequest {
        channel: OtpChannel::Sms,
        destination: "+201001234567".into(),
    }
}

// ── Envelope parsing ─────────────────────────────────────────────────────

#[tokio::test]
async fn send_otp_posts_with_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/otp/send"))
        .and(header("Authorization", "Bearer test-api-key"))
        .and(body_partial_json(serde_json::json!({
            "channel": "sms",
            "destination": "+201001234567",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "passed",
            "transaction_id": "otp-tx-1",
            "raw": { "expires_in_secs": 300 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = provider(&server).send_otp(&send_request()).await.expect("send");
    assert_eq!(result.status, ProviderStatus::Passed);
    assert_eq!(result.transaction_id.as_str(), "otp-tx-1");
}

#[tokio::test]
async fn verify_otp_domain_rejection_is_a_result() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/otp/verify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "failed",
            "error_code": "OTP_MISMATCH",
            "transaction_id": "otp-tx-1"
        })))
        .mount(&server)
        .await;

    let result = provider(&server)
        .verify_otp(&OtpVerifyRequest {
            channel: OtpChannel::Sms,
            transaction_id: TransactionId::new("otp-tx-1").unwrap(),
            code: "000000".into(),
        })
        .await
        .expect("verify");
    assert_eq!(result.status, ProviderStatus::Failed);
    assert_eq!(result.error_code.as_deref(), Some("OTP_MISMATCH"));
}

#[tokio::test]
async fn registry_path_includes_registry_kind() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/registries/ntra/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "inconclusive",
            "error_code": "NTRA_UNABLE_TO_CONFIRM",
            "transaction_id": "ntra-9"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = provider(&server)
        .validate_registry(
            RegistryKind::Ntra,
            &RegistryQuery {
                subject_id: SubjectId::new("appraiser-1").unwrap(),
                identity_fields: serde_json::Map::new(),
            },
        )
        .await
        .expect("validate");
    assert_eq!(result.status, ProviderStatus::Inconclusive);
}

// ── Status mapping ───────────────────────────────────────────────────────

#[tokio::test]
async fn server_error_is_service_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/otp/send"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = provider(&server)
        .send_otp(&send_request())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProviderError::ServiceUnavailable { status: 503, .. }
    ));
    assert!(err.is_transient());
}

#[tokio::test]
async fn rate_limit_is_service_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/otp/send"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = provider(&server)
        .send_otp(&send_request())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProviderError::ServiceUnavailable { status: 429, .. }
    ));
}

#[tokio::test]
async fn client_error_is_request_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/otp/send"))
        .respond_with(ResponseTemplate::new(422).set_body_string("destination malformed"))
        .mount(&server)
        .await;

    let err = provider(&server)
        .send_otp(&send_request())
        .await
        .unwrap_err();
    match err {
        ProviderError::RequestRejected { status, body, .. } => {
            assert_eq!(status, 422);
            assert!(body.contains("destination malformed"));
        }
        other => panic!("expected RequestRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_invalid_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/otp/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true
        })))
        .mount(&server)
        .await;

    let err = provider(&server)
        .send_otp(&send_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidResponse { .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn closed_port_is_transport_error() {
    let config = GatewayConfig {
        endpoints: [(
            ProviderCategory::Otp,
            Url::parse("http://127.0.0.1:1").unwrap(),
        )]
        .into_iter()
        .collect(),
        ..GatewayConfig::default()
    };
    let err = HttpProvider::new(&config)
        .unwrap()
        .send_otp(&send_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Transport { .. }));
}

// ── Retry through the resilient wrapper ─────────────────────────────────

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        timeouts: BTreeMap::new(),
    }
}

#[tokio::test]
async fn resilient_gateway_retries_then_exhausts() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/otp/send"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let suite = ProviderSuite::uniform(Arc::new(provider(&server)));
    let gateway = ResilientGateway::new(suite, fast_policy());
    let err = gateway.send_otp(&send_request()).await.unwrap_err();
    match err {
        ProviderError::Exhausted {
            capability,
            attempts,
            last,
        } => {
            assert_eq!(capability, Capability::SendOtp);
            assert_eq!(attempts, 3);
            assert!(matches!(
                *last,
                ProviderError::ServiceUnavailable { status: 502, .. }
            ));
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn resilient_gateway_does_not_retry_rejections() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/otp/send"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let suite = ProviderSuite::uniform(Arc::new(provider(&server)));
    let gateway = ResilientGateway::new(suite, fast_policy());
    let err = gateway.send_otp(&send_request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::RequestRejected { .. }));
}

#[test]
fn suite_from_config_refuses_partial_http_configuration() {
    let url = Url::parse("https://providers.example.com").unwrap();
    let config = GatewayConfig {
        endpoints: ProviderCategory::ALL
            .into_iter()
            .filter(|c| *c != ProviderCategory::Registry)
            .map(|c| (c, url.clone()))
            .collect(),
        ..GatewayConfig::default()
    };
    let err = ProviderSuite::from_config(&config).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::MissingEndpoint(ProviderCategory::Registry)
    ));

    let complete = GatewayConfig {
        endpoints: ProviderCategory::ALL.into_iter().map(|c| (c, url.clone())).collect(),
        ..GatewayConfig::default()
    };
    assert!(ProviderSuite::from_config(&complete).is_ok());
}

#[tokio::test]
async fn suite_from_config_mixes_http_and_mock() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/otp/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "passed",
            "transaction_id": "otp-live-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = GatewayConfig {
        mode: ProviderMode::Mock,
        ..config_for(&server, &[ProviderCategory::Otp])
    };
    let suite = ProviderSuite::from_config(&config).expect("suite");
    let sent = suite.send_otp(&send_request()).await.expect("send");
    assert_eq!(sent.transaction_id.as_str(), "otp-live-1");

    // Registry has no URL; mock mode serves it from the mock provider.
    let registry = suite
        .validate_registry(
            RegistryKind::Cso,
            &RegistryQuery {
                subject_id: SubjectId::new("appraiser-1").unwrap(),
                identity_fields: serde_json::Map::new(),
            },
        )
        .await
        .expect("mock registry");
    assert!(registry.transaction_id.as_str().starts_with("mock-cso-"));
}
