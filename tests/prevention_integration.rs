//! Prevention-mode integration tests
//!
//! The persisted flag must stay authoritative whatever the enforcement
//! service does, and malformed updates must never touch it.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wafwatch::analytics::GeoIpService;
use wafwatch::api::{create_api_router, AppState};
use wafwatch::config::{AnalyticsConfig, CorsConfig};
use wafwatch::dashboard::DashboardService;
use wafwatch::enforcement::{EnforcementError, EnforcementSink, HttpEnforcementClient};
use wafwatch::prevention::PreventionController;
use wafwatch::retry::RetryPolicy;
use wafwatch::storage::{SqliteStorage, Storage, PREVENTION_MODE_KEY};

/// Enforcement service that is always down
#[derive(Default)]
struct UnreachableWaf {
    attempts: AtomicUsize,
}

#[async_trait]
impl EnforcementSink for UnreachableWaf {
    async fn set_prevention(&self, _enabled: bool) -> Result<(), EnforcementError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(EnforcementError::Status("502 Bad Gateway: upstream down".to_string()))
    }
}

async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

fn create_app(storage: Arc<dyn Storage>, enforcer: Option<Arc<dyn EnforcementSink>>) -> Router {
    let retry = RetryPolicy::new(2, Duration::from_millis(1), 2.0);
    let state = Arc::new(AppState {
        dashboard: Arc::new(DashboardService::new(
            Arc::clone(&storage),
            Arc::new(GeoIpService::new(None).unwrap()),
            retry,
            AnalyticsConfig::default(),
        )),
        prevention: Arc::new(PreventionController::new(storage, enforcer, retry)),
    });
    create_api_router(
        state,
        &CorsConfig {
            allowed_origins: vec!["http://dashboard.local".to_string()],
        },
    )
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn post(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/waf/prevention")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get() -> Request<Body> {
    Request::builder()
        .uri("/api/waf/prevention")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_defaults_to_disabled() {
    let app = create_app(create_test_storage().await, None);
    let (status, body) = send(&app, get()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"enabled": false}));
}

#[tokio::test]
async fn test_set_survives_enforcement_outage() {
    let waf = Arc::new(UnreachableWaf::default());
    let app = create_app(create_test_storage().await, Some(waf.clone()));

    let (status, body) = send(&app, post(r#"{"enabled": true}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"enabled": true, "status": "success"}));
    assert_eq!(waf.attempts.load(Ordering::SeqCst), 1);

    let (_, body) = send(&app, get()).await;
    assert_eq!(body, json!({"enabled": true}));

    let (_, status) = send(
        &app,
        Request::builder().uri("/api/status").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status["prevention_mode"], true);
}

#[tokio::test]
async fn test_set_with_real_client_and_dead_endpoint() {
    let client = HttpEnforcementClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
    let app = create_app(create_test_storage().await, Some(Arc::new(client)));

    let (status, body) = send(&app, post(r#"{"enabled": true}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], true);

    let (_, body) = send(&app, get()).await;
    assert_eq!(body, json!({"enabled": true}));
}

#[tokio::test]
async fn test_malformed_updates_are_rejected_without_mutation() {
    let storage = create_test_storage().await;
    storage.put_flag(PREVENTION_MODE_KEY, true).await.unwrap();
    let app = create_app(Arc::clone(&storage), None);

    for body in ["{}", "not json", r#"{"enabled": "sometimes"}"#, r#"{"enabled": [true]}"#, "[]"] {
        let (status, error) = send(&app, post(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {body:?}");
        assert_eq!(error["kind"], "invalid_input");
        assert!(error["timestamp"].is_string());
    }

    let (status, error) = send(&app, post("{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "Missing enabled parameter");

    assert_eq!(storage.get_flag(PREVENTION_MODE_KEY).await.unwrap(), Some(true));
}

#[tokio::test]
async fn test_last_write_wins() {
    let app = create_app(create_test_storage().await, None);

    for enabled in ["true", "false", "1", "0", "true"] {
        let (status, _) = send(&app, post(&format!(r#"{{"enabled": {enabled}}}"#))).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = send(&app, get()).await;
    assert_eq!(body, json!({"enabled": true}));
}

#[tokio::test]
async fn test_cors_allows_configured_origin_with_credentials() {
    let app = create_app(create_test_storage().await, None);

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/waf/prevention")
                .header(header::ORIGIN, "http://dashboard.local")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let headers = response.headers();
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "http://dashboard.local"
    );
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");
}
