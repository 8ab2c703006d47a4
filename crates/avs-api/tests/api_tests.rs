//! # Integration Tests for avs-api
//!
//! Drives the assembled router with `oneshot` requests: session creation,
//! step submission, status reads, role checks, error mapping, admin resets,
//! health probes and the OpenAPI document.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use avs_api::state::{AppConfig, AppState};
use avs_core::{ProviderResult, TransactionId};
use avs_gateway::{
    Capability, MockProvider, ProviderError, ProviderSuite, ResilientGateway, RetryPolicy,
    Scripted,
};
use avs_workflow::{InMemorySessionStore, VerificationSessionManager, WorkflowRuntime};

const SERVICE_TOKEN: &str = "service-secret";
const ADMIN_TOKEN: &str = "admin-secret";

// -- Helpers ------------------------------------------------------------------

fn state_with(config: AppConfig) -> (AppState, Arc<MockProvider>) {
    let mock = Arc::new(MockProvider::new());
    let policy = RetryPolicy {
        max_retries: 1,
        base_delay: std::time::Duration::from_millis(1),
        ..RetryPolicy::default()
    };
    let gateway = ResilientGateway::new(ProviderSuite::uniform(mock.clone()), policy);
    let manager = VerificationSessionManager::new(
        Arc::new(InMemorySessionStore::new()),
        Arc::new(gateway),
        WorkflowRuntime::standard(),
    );
    (AppState::new(config, manager, None), mock)
}

/// Auth disabled: every caller is an administrator.
fn test_app() -> (axum::Router, Arc<MockProvider>) {
    let (state, mock) = state_with(AppConfig::default());
    (avs_api::app(state), mock)
}

fn test_app_with_auth() -> axum::Router {
    let config = AppConfig {
        auth_token: Some(SERVICE_TOKEN.into()),
        admin_token: Some(ADMIN_TOKEN.into()),
        ..AppConfig::default()
    };
    avs_api::app(state_with(config).0)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn post_as(uri: &str, token: &str, body: Value) -> Request<Body> {
    let mut req = post(uri, body);
    req.headers_mut()
        .insert("authorization", format!("Bearer {token}").parse().unwrap());
    req
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

async fn create(app: &axum::Router, subject: &str) -> String {
    let (status, body) = send(app, post("/v1/verification/sessions", json!({ "subject_id": subject }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["session_id"].as_str().unwrap().to_string()
}

fn document() -> Value {
    json!({ "front_image": "ZnJvbnQ=", "back_image": "YmFjaw==" })
}

fn steps_uri(id: &str) -> String {
    format!("/v1/verification/sessions/{id}/steps")
}

// -- Sessions -----------------------------------------------------------------

#[tokio::test]
async fn create_returns_pending_session_and_resumes() {
    let (app, _) = test_app();
    let (status, body) = send(&app, post("/v1/verification/sessions", json!({ "subject_id": "appraiser-1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overall_status"], "pending");
    assert_eq!(body["version"], 1);
    assert_eq!(body["steps"].as_array().unwrap().len(), 8);

    let id = body["session_id"].as_str().unwrap();
    let again = create(&app, "appraiser-1").await;
    assert_eq!(again, id);
}

#[tokio::test]
async fn invalid_subject_is_rejected() {
    let (app, _) = test_app();
    let (status, body) = send(&app, post("/v1/verification/sessions", json!({ "subject_id": "" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn submit_document_then_read_status() {
    let (app, _) = test_app();
    let id = create(&app, "appraiser-2").await;

    let (status, outcome) = send(
        &app,
        post(&steps_uri(&id), json!({ "step_id": "document", "provider_input": document() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{outcome}");
    assert_eq!(outcome["step_id"], "document");
    assert_eq!(outcome["status"], "success");
    assert_eq!(outcome["attempts_used"], 1);
    assert_eq!(outcome["overall_status"], "in_progress");

    let (status, snapshot) = send(&app, get(&format!("/v1/verification/sessions/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["version"], outcome["version"]);
    let doc = snapshot["steps"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["step_id"] == "document")
        .unwrap();
    assert_eq!(doc["status"], "success");
}

#[tokio::test]
async fn unknown_session_is_404() {
    let (app, _) = test_app();
    let (status, body) = send(
        &app,
        get("/v1/verification/sessions/00000000-0000-4000-8000-000000000000"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn unknown_step_is_a_validation_error() {
    let (app, _) = test_app();
    let id = create(&app, "appraiser-3").await;
    let (status, body) = send(
        &app,
        post(&steps_uri(&id), json!({ "step_id": "fingerprint", "provider_input": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn ineligible_step_is_refused() {
    let (app, _) = test_app();
    let id = create(&app, "appraiser-4").await;
    let (status, body) = send(
        &app,
        post(
            &steps_uri(&id),
            json!({
                "step_id": "face_match",
                "provider_input": { "selfie_image": "c2VsZmll", "reference_image": "cmVm" },
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "STEP_NOT_ELIGIBLE");
}

#[tokio::test]
async fn stale_version_is_409_with_current_version() {
    let (app, _) = test_app();
    let id = create(&app, "appraiser-5").await;
    let (status, body) = send(
        &app,
        post(
            &steps_uri(&id),
            json!({ "step_id": "document", "provider_input": document(), "expected_version": 7 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "STALE_SESSION_VERSION");
    assert_eq!(body["error"]["details"]["expected_version"], 7);
    assert_eq!(body["error"]["details"]["current_version"], 1);
}

#[tokio::test]
async fn rejections_exhaust_the_step_then_423() {
    let (app, mock) = test_app();
    for _ in 0..3 {
        mock.script(
            Capability::SubmitDocument,
            Scripted::Respond(ProviderResult::failed(
                TransactionId::new("doc-x").unwrap(),
                "DOC_UNREADABLE",
            )),
        );
    }
    let id = create(&app, "appraiser-6").await;

    let mut last = Value::Null;
    for _ in 0..3 {
        let (status, outcome) = send(
            &app,
            post(&steps_uri(&id), json!({ "step_id": "document", "provider_input": document() })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        last = outcome;
    }
    assert_eq!(last["status"], "locked");
    assert_eq!(last["outcome_code"], "ATTEMPTS_EXHAUSTED");
    assert_eq!(last["overall_status"], "failed");

    let (status, body) = send(
        &app,
        post(&steps_uri(&id), json!({ "step_id": "document", "provider_input": document() })),
    )
    .await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(body["error"]["code"], "ATTEMPTS_EXHAUSTED");
    assert_eq!(body["error"]["details"]["attempts_used"], 3);
    assert_eq!(body["error"]["details"]["max_attempts"], 3);

    let (status, reset) = send(
        &app,
        post(&format!("/v1/admin/sessions/{id}/steps/document/reset"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{reset}");
    assert_ne!(reset["overall_status"], "failed");
}

#[tokio::test]
async fn provider_outage_is_503_and_free() {
    let (app, mock) = test_app();
    for _ in 0..2 {
        mock.script(
            Capability::SubmitDocument,
            Scripted::Fail(ProviderError::Transport {
                capability: Capability::SubmitDocument,
                reason: "connection reset".into(),
            }),
        );
    }
    let id = create(&app, "appraiser-7").await;
    let (status, body) = send(
        &app,
        post(&steps_uri(&id), json!({ "step_id": "document", "provider_input": document() })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "PROVIDER_UNAVAILABLE");

    let (_, snapshot) = send(&app, get(&format!("/v1/verification/sessions/{id}"))).await;
    let doc = snapshot["steps"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["step_id"] == "document")
        .unwrap();
    assert_eq!(doc["attempts_used"], 0);
    assert_eq!(doc["status"], "awaiting_input");
}

// -- Authentication -----------------------------------------------------------

#[tokio::test]
async fn missing_token_is_401() {
    let app = test_app_with_auth();
    let (status, body) = send(&app, post("/v1/verification/sessions", json!({ "subject_id": "a-1" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn service_token_cannot_use_admin_routes() {
    let app = test_app_with_auth();
    let (status, created) = send(
        &app,
        post_as("/v1/verification/sessions", SERVICE_TOKEN, json!({ "subject_id": "a-2" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        post_as("/v1/admin/subjects/a-2/reset", SERVICE_TOKEN, json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, fresh) = send(&app, post_as("/v1/admin/subjects/a-2/reset", ADMIN_TOKEN, json!({}))).await;
    assert_eq!(status, StatusCode::OK, "{fresh}");
    assert_ne!(fresh["session_id"], created["session_id"]);
    assert_eq!(fresh["overall_status"], "pending");
}

#[tokio::test]
async fn review_of_open_step_is_refused() {
    let (app, _) = test_app();
    let id = create(&app, "appraiser-8").await;
    let (status, body) = send(
        &app,
        post(
            &format!("/v1/admin/sessions/{id}/steps/document/review"),
            json!({ "approved": true }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "STEP_NOT_ELIGIBLE");
}

// -- Health and OpenAPI -------------------------------------------------------

#[tokio::test]
async fn health_probes_skip_auth() {
    let app = test_app_with_auth();
    let response = app.clone().oneshot(get("/health/liveness")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ok");

    let response = app.oneshot(get("/health/readiness")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let (app, _) = test_app();
    let (status, doc) = send(&app, get("/openapi.json")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"]["/v1/verification/sessions"].is_object());
    assert!(doc["paths"]["/v1/admin/subjects/:subject_id/reset"].is_object());
}
