mod harness;

use std::sync::Arc;

use admit_ingestion::settings::{LiveSettings, Secret};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use harness::{
    body, event_type, policy, pull_request_created, pull_request_type, FailingEvaluator, Gateway,
    GatewayOptions, API_KEY,
};
use rstest::rstest;
use serde_json::{json, Value};
use tower::ServiceExt;

fn ingest_request(body: impl Into<Body>, authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/ingest")
        .header("content-type", "application/json");
    if let Some(value) = authorization {
        builder = builder.header("authorization", value);
    }
    builder.body(body.into()).unwrap()
}

fn authorized(body: impl Into<Body>) -> Request<Body> {
    ingest_request(body, Some(&format!("ApiKey {API_KEY}")))
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn get(router: Router, uri: &str) -> StatusCode {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    router.oneshot(request).await.unwrap().status()
}

async fn gateway_with_commit_schema() -> Gateway {
    let gateway = Gateway::new();
    gateway.register_event_type(pull_request_type()).await;
    gateway
        .register_event_type(event_type(
            "commit",
            "Commit",
            "1.0.0",
            &[],
            json!({
                "type": "object",
                "required": ["sha"],
                "properties": {"sha": {"type": "string"}}
            }),
        ))
        .await;
    gateway
}

#[tokio::test]
async fn test_ingest_accepted() {
    let gateway = gateway_with_commit_schema().await;

    let (status, body) = send(gateway.router(), authorized(pull_request_created())).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["stream"], "PullRequest");
    assert_eq!(body["subject"], "PullRequest.Created");
    assert_eq!(gateway.broker.messages().await.len(), 1);
}

#[rstest]
#[case::unparsable("not json".to_string(), "request-body")]
#[case::metadata_missing(r#"{"payload":{}}"#.to_string(), "metadata-missing")]
#[case::payload_missing(
    r#"{"metadata":{"source":"github","type":"Commit","version":"1.0.0"}}"#.to_string(),
    "payload-missing"
)]
#[case::metadata_shape(
    r#"{"metadata":{"source":"gh","type":"Commit","version":"1.0"},"payload":{}}"#.to_string(),
    "metadata"
)]
#[case::no_schema(
    String::from_utf8(body("github", "Deployment", None, json!({}))).unwrap(),
    "event-validation-failure"
)]
#[case::schema_violation(
    String::from_utf8(body("github", "Commit", None, json!({"sha": 42}))).unwrap(),
    "event-validation"
)]
#[tokio::test]
async fn test_ingest_bad_request(#[case] request_body: String, #[case] reason: &str) {
    let gateway = gateway_with_commit_schema().await;

    let (status, body) = send(gateway.router(), authorized(request_body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], reason);
    assert!(body["message"].is_string());
    assert!(gateway.broker.messages().await.is_empty());
}

#[tokio::test]
async fn test_validation_errors_carry_causes() {
    let gateway = gateway_with_commit_schema().await;

    let (_, body) = send(
        gateway.router(),
        authorized(body("github", "Commit", None, json!({}))),
    )
    .await;

    assert_eq!(body["reason"], "event-validation");
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0]["message"].as_str().unwrap().contains("sha"));
}

#[tokio::test]
async fn test_policy_rejection() {
    let gateway = gateway_with_commit_schema().await;
    gateway.register_policy(policy("closed", false, None, "")).await;

    let (status, body) = send(gateway.router(), authorized(pull_request_created())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "ingestion-service-rejected");
    assert_eq!(gateway.broker.connect_count(), 0);
}

#[tokio::test]
async fn test_policy_evaluation_failure() {
    let gateway = Gateway::with(GatewayOptions {
        evaluator: Arc::new(FailingEvaluator),
        ..Default::default()
    });
    gateway.register_event_type(pull_request_type()).await;
    gateway.register_policy(policy("broken", true, None, "")).await;

    let (status, body) = send(gateway.router(), authorized(pull_request_created())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["reason"], "ingestion-service-failure");
}

#[tokio::test]
async fn test_publish_failure() {
    let gateway = gateway_with_commit_schema().await;
    gateway.broker.fail_connects(true);

    let (status, body) = send(gateway.router(), authorized(pull_request_created())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["reason"], "publish");
}

#[tokio::test]
async fn test_pending_registry_and_engine() {
    let gateway = Gateway::with(GatewayOptions {
        registry_ready: false,
        engine_ready: false,
        ..Default::default()
    });
    let (status, body) = send(gateway.router(), authorized(pull_request_created())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["reason"], "event-type");

    let gateway = Gateway::with(GatewayOptions {
        engine_ready: false,
        ..Default::default()
    });
    gateway.register_event_type(pull_request_type()).await;
    let (status, body) = send(gateway.router(), authorized(pull_request_created())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["reason"], "ingestion-service");
}

#[rstest]
#[case::missing_header(None)]
#[case::wrong_key(Some("ApiKey nope"))]
#[case::wrong_scheme(Some("Bearer test-key"))]
#[tokio::test]
async fn test_ingest_requires_api_key(#[case] authorization: Option<&str>) {
    let gateway = gateway_with_commit_schema().await;

    let (status, body) = send(
        gateway.router(),
        ingest_request(pull_request_created(), authorization),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "unauthorized");
    assert!(gateway.broker.messages().await.is_empty());
}

#[tokio::test]
async fn test_no_configured_token_refuses_everything() {
    let gateway = Gateway::with(GatewayOptions {
        token: None,
        ..Default::default()
    });
    gateway.register_event_type(pull_request_type()).await;

    let (status, _) = send(gateway.router(), authorized(pull_request_created())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rotated_token_applies_without_restart() {
    let gateway = gateway_with_commit_schema().await;
    let router = gateway.router();

    let mut rotated = LiveSettings::clone(&gateway.settings.snapshot());
    rotated.auth.token = Some(Secret::new("rotated"));
    assert!(gateway.settings.replace(rotated));

    let (status, _) = send(router.clone(), authorized(pull_request_created())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        router,
        ingest_request(pull_request_created(), Some("ApiKey rotated")),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_health_endpoints() {
    let pending = Gateway::with(GatewayOptions {
        registry_ready: false,
        ..Default::default()
    });
    assert_eq!(get(pending.router(), "/healthz").await, StatusCode::OK);
    assert_eq!(get(pending.router(), "/livez").await, StatusCode::OK);
    assert_eq!(
        get(pending.router(), "/readyz").await,
        StatusCode::SERVICE_UNAVAILABLE
    );

    pending.registry.mark_synced();
    assert_eq!(get(pending.router(), "/readyz").await, StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_is_returned() {
    let gateway = Gateway::new();
    let request = Request::builder()
        .uri("/healthz")
        .header("x-request-id", "req-123")
        .body(Body::empty())
        .unwrap();

    let response = gateway.router().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-123");

    let response = gateway
        .router()
        .oneshot(Request::builder().uri("/livez").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}
