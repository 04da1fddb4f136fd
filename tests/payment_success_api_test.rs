mod common;

use axum::body::Body;
use axum::Router;
use common::{principal, CountingStore, FixedIdentity, MockProvisioning, QrBehavior, ORDER_ID};
use http::{Request, StatusCode};
use roamjet_backend::api::{self, AppState};
use roamjet_backend::config::ReconcileConfig;
use roamjet_backend::domain::{Order, ProcessingStatus};
use roamjet_backend::health::HealthChecker;
use roamjet_backend::store::OrderStore;
use roamjet_backend::provisioning::ProvisioningError;
use roamjet_backend::services::qr::QrService;
use roamjet_backend::services::webhook_processor::WebhookProcessor;
use roamjet_backend::services::ReconciliationOrchestrator;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

const SUCCESS_QUERY: &str = "/payment/success?order_id=kargi-mobile-7days-1700000000-1234&email=a%40b.com&total=10&currency=usd&name=Kargi%207%20Days";

fn app(store: Arc<CountingStore>, provisioning: Arc<MockProvisioning>) -> Router {
    let orchestrator = ReconciliationOrchestrator::new(
        store.clone(),
        provisioning.clone(),
        ReconcileConfig::default(),
    );
    api::router(AppState {
        orchestrator: Arc::new(orchestrator),
        identity: Arc::new(FixedIdentity::with(principal())),
        identity_timeout: Duration::from_secs(2),
        login_url: "/login".to_string(),
        qr: Arc::new(QrService::new(store.clone(), provisioning.clone())),
        webhooks: Arc::new(WebhookProcessor::new(
            store.clone(),
            Some("whsec_test".to_string()),
            Duration::from_secs(300),
        )),
        health: HealthChecker::new(store, provisioning),
    })
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_unauthenticated_redirect_gets_login_url() {
    let store = Arc::new(CountingStore::new());
    let app = app(store.clone(), Arc::new(MockProvisioning::ready()));

    let response = app.oneshot(get(SUCCESS_QUERY, None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "AUTHENTICATION_REQUIRED");
    let login_url = body["details"]["login_url"].as_str().unwrap();
    assert!(login_url.starts_with("/login?returnUrl=%2Fpayment%2Fsuccess%3Forder_id%3Dkargi-mobile-7days-1700000000-1234"));
    assert!(login_url.contains("email%3Da%2540b.com"));
    assert_eq!(store.total_calls(), 0);
}

#[tokio::test]
async fn test_unknown_token_is_treated_as_signed_out() {
    let app = app(Arc::new(CountingStore::new()), Arc::new(MockProvisioning::ready()));
    let response = app
        .oneshot(get(SUCCESS_QUERY, Some("expired")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_authenticated_redirect_renders_success_view() {
    let store = Arc::new(CountingStore::new());
    let provisioning = Arc::new(MockProvisioning::ready());
    let app = app(store, provisioning.clone());

    let response = app
        .oneshot(get(SUCCESS_QUERY, Some("token-1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await;
    assert_eq!(body["state"], "success");
    assert_eq!(body["redirect_to"], "/dashboard");
    assert_eq!(body["order"]["order_id"], ORDER_ID);
    assert_eq!(body["order"]["qr_ready"], true);
    assert_eq!(body["order"]["status"], "completed");
    assert!(!body["message"].as_str().unwrap().is_empty());
    assert_eq!(provisioning.creates(), 1);
}

#[tokio::test]
async fn test_missing_email_is_bad_request() {
    let store = Arc::new(CountingStore::new());
    let app = app(store.clone(), Arc::new(MockProvisioning::ready()));

    let response = app
        .oneshot(get(
            "/payment/success?order_id=kargi-mobile-7days-1700000000-1234&total=10",
            Some("token-1"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "MISSING_PAYMENT_INFO");
    assert_eq!(body["details"]["field"], "email");
    assert_eq!(store.total_calls(), 0);
}

#[tokio::test]
async fn test_provisioning_rejection_is_bad_gateway_with_support_message() {
    let provisioning = Arc::new(
        MockProvisioning::ready()
            .with_create_error(ProvisioningError::from_message("please wait 60 seconds", None)),
    );
    let app = app(Arc::new(CountingStore::new()), provisioning);

    let response = app
        .oneshot(get(SUCCESS_QUERY, Some("token-1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["error"], "PROVISIONING_FAILED");
    assert!(body["message"].as_str().unwrap().contains("contact support"));
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_provisioning_timeout_is_gateway_timeout() {
    let provisioning = Arc::new(
        MockProvisioning::ready().with_create_error(ProvisioningError::Timeout { timeout_secs: 30 }),
    );
    let app = app(Arc::new(CountingStore::new()), provisioning);

    let response = app
        .oneshot(get(SUCCESS_QUERY, Some("token-1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_store_outage_is_service_unavailable() {
    let store = Arc::new(CountingStore::new());
    store.offline.store(true, Ordering::SeqCst);
    let app = app(store, Arc::new(MockProvisioning::ready()));

    let response = app
        .oneshot(get(SUCCESS_QUERY, Some("token-1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"], "ORDER_STORE_ERROR");
}

#[tokio::test]
async fn test_used_link_renders_already_used() {
    let mut order = Order::new(ORDER_ID, "kargi-mobile-7days", 10, "usd", "a@b.com");
    order.link_used = true;
    let app = app(
        Arc::new(CountingStore::with_orders([order])),
        Arc::new(MockProvisioning::ready()),
    );

    let response = app
        .oneshot(get(SUCCESS_QUERY, Some("token-1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["state"], "already_used");
    assert!(body.get("order").is_none());
}

fn completed_order(owner: &str) -> Order {
    let mut order = Order::new(ORDER_ID, "kargi-mobile-7days", 10, "usd", "a@b.com");
    order.user_id = Some(owner.to_string());
    order.processing_status = ProcessingStatus::Completed;
    order
}

#[tokio::test]
async fn test_qr_refresh_fetches_and_stores_for_owner() {
    let store = Arc::new(CountingStore::with_orders([completed_order("user-1")]));
    let provisioning = Arc::new(MockProvisioning::ready());
    let app = app(store.clone(), provisioning.clone());

    let response = app
        .oneshot(get(&format!("/api/orders/{}/qr", ORDER_ID), Some("token-1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["qr_ready"], true);
    assert_eq!(body["order"]["activation_code"], "K2-ABC-123");
    assert_eq!(provisioning.qr_fetches(), 1);
    let stored = store.inner.get(ORDER_ID).await.unwrap().unwrap();
    assert!(stored.has_qr());
}

#[tokio::test]
async fn test_qr_refresh_pending_profile() {
    let store = Arc::new(CountingStore::with_orders([completed_order("user-1")]));
    let app = app(
        store,
        Arc::new(MockProvisioning::ready().with_qr(QrBehavior::NotReady)),
    );

    let response = app
        .oneshot(get(&format!("/api/orders/{}/qr", ORDER_ID), Some("token-1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["qr_ready"], false);
}

#[tokio::test]
async fn test_qr_refresh_is_owner_only() {
    let store = Arc::new(CountingStore::with_orders([completed_order("someone-else")]));
    let provisioning = Arc::new(MockProvisioning::ready());
    let app = app(store, provisioning.clone());

    let response = app
        .clone()
        .oneshot(get(&format!("/api/orders/{}/qr", ORDER_ID), Some("token-1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(get("/api/orders/missing-order/qr", Some("token-1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(provisioning.qr_fetches(), 0);
}

#[tokio::test]
async fn test_qr_refresh_requires_sign_in() {
    let app = app(Arc::new(CountingStore::new()), Arc::new(MockProvisioning::ready()));
    let response = app
        .oneshot(get(&format!("/api/orders/{}/qr", ORDER_ID), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_reports_components() {
    let app = app(Arc::new(CountingStore::new()), Arc::new(MockProvisioning::ready()));
    let response = app.oneshot(get("/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "Healthy");
    assert_eq!(body["checks"]["order_store"]["status"], "Up");
    assert_eq!(body["checks"]["provisioning"]["status"], "Up");
}

#[tokio::test]
async fn test_health_fails_when_store_is_down() {
    let store = Arc::new(CountingStore::new());
    store.offline.store(true, Ordering::SeqCst);
    let app = app(store, Arc::new(MockProvisioning::ready()));

    let response = app.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
