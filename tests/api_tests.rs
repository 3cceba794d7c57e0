use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use guardarr::clients::billing::{BillingError, CheckoutVerifier, VerifyOutcome};
use guardarr::clients::persistence::{AuthUser, MemoryQueryStore};
use guardarr::clients::provider::{
    ProviderError, ProviderItem, ProviderResponse, SearchProvider,
};
use guardarr::clock::ManualClock;
use guardarr::config::Config;
use guardarr::models::{Plan, Subscription};
use guardarr::services::similarity::MockSimilarityProvider;
use guardarr::state::{AppState, SharedState};

/// Scripted provider: returns a configured response and counts calls so
/// tests can assert which flows reached the network boundary.
#[derive(Default)]
struct ScriptedProvider {
    response: Mutex<Option<ProviderResponse>>,
    text_calls: AtomicUsize,
    image_calls: AtomicUsize,
}

impl ScriptedProvider {
    fn set_items(&self, items: Vec<ProviderItem>) {
        *self.response.lock().unwrap() = Some(ProviderResponse {
            items: Some(items),
            search_information: None,
            error: None,
        });
    }

    fn calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst) + self.image_calls.load(Ordering::SeqCst)
    }

    fn scripted(&self) -> Result<ProviderResponse, ProviderError> {
        self.response.lock().unwrap().clone().ok_or(ProviderError::Api {
            code: 503,
            message: "scripted failure".to_string(),
        })
    }
}

#[async_trait]
impl SearchProvider for ScriptedProvider {
    async fn text_search(&self, _q: &str, _p: &Value) -> Result<ProviderResponse, ProviderError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        self.scripted()
    }

    async fn image_search(&self, _q: &str, _p: &Value) -> Result<ProviderResponse, ProviderError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        self.scripted()
    }
}

struct StaticVerifier;

#[async_trait]
impl CheckoutVerifier for StaticVerifier {
    async fn verify(&self, _s: &str, _t: &str) -> Result<VerifyOutcome, BillingError> {
        Ok(VerifyOutcome {
            success: true,
            message: None,
        })
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryQueryStore>,
    provider: Arc<ScriptedProvider>,
    #[allow(dead_code)]
    state: SharedState,
}

fn item(title: &str, link: &str) -> ProviderItem {
    ProviderItem {
        title: title.to_string(),
        link: link.to_string(),
        display_link: None,
        snippet: None,
        pagemap: None,
        image: None,
    }
}

fn spawn_app() -> TestApp {
    let config = Config::default();
    let store = Arc::new(MemoryQueryStore::new());
    let provider = Arc::new(ScriptedProvider::default());
    provider.set_items(vec![item("Jane Doe official", "https://example.com/jane")]);

    let state = AppState::build(
        config,
        store.clone(),
        provider.clone(),
        Arc::new(MockSimilarityProvider::new(42)),
        Arc::new(StaticVerifier),
        ManualClock::new(1_700_000_000_000),
        None,
    );

    TestApp {
        router: guardarr::api::router(state.clone()),
        store,
        provider,
        state,
    }
}

fn text_search_request(query: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/search/text")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "query": query, "query_type": "name" }).to_string(),
        ))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn text_search_returns_id_and_caches_repeat() {
    let app = spawn_app();

    let response = app
        .router
        .clone()
        .oneshot(text_search_request("jane doe"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["cached"], false);
    let first_id = body["data"]["search_id"].as_str().unwrap().to_string();
    assert_eq!(app.provider.calls(), 1);

    let response = app
        .router
        .clone()
        .oneshot(text_search_request("jane doe"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"]["cached"], true);
    assert_eq!(body["data"]["search_id"], first_id.as_str());
    assert_eq!(app.provider.calls(), 1, "cache hit must not call provider");
}

#[tokio::test]
async fn anonymous_quota_denies_sixth_request() {
    let app = spawn_app();

    // Default anonymous ceiling is 5 per minute. Distinct queries avoid
    // cache hits, which would bypass nothing (quota runs first) but keep
    // the assertion honest.
    for i in 0..5 {
        let response = app
            .router
            .clone()
            .oneshot(text_search_request(&format!("query {i}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {i} should pass");
    }

    let response = app
        .router
        .clone()
        .oneshot(text_search_request("query 6"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("Try again"));
}

#[tokio::test]
async fn separate_anonymous_clients_have_separate_quotas() {
    let app = spawn_app();

    for i in 0..5 {
        let request = Request::builder()
            .method("POST")
            .uri("/api/search/text")
            .header("content-type", "application/json")
            .header("x-client-id", "client-a")
            .body(Body::from(json!({ "query": format!("q {i}") }).to_string()))
            .unwrap();
        assert_eq!(
            app.router.clone().oneshot(request).await.unwrap().status(),
            StatusCode::OK
        );
    }

    let request = Request::builder()
        .method("POST")
        .uri("/api/search/text")
        .header("content-type", "application/json")
        .header("x-client-id", "client-b")
        .body(Body::from(json!({ "query": "fresh client" }).to_string()))
        .unwrap();
    assert_eq!(
        app.router.clone().oneshot(request).await.unwrap().status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn admin_bypasses_quota() {
    let app = spawn_app();
    app.store.put_user(
        "admin-token",
        AuthUser {
            id: "admin-1".to_string(),
            email: "root@example.com".to_string(),
            role: Some("admin".to_string()),
        },
    );

    for i in 0..20 {
        let request = Request::builder()
            .method("POST")
            .uri("/api/search/text")
            .header("content-type", "application/json")
            .header("authorization", "Bearer admin-token")
            .body(Body::from(json!({ "query": format!("sweep {i}") }).to_string()))
            .unwrap();
        assert_eq!(
            app.router.clone().oneshot(request).await.unwrap().status(),
            StatusCode::OK,
            "admin request {i} should never be rate limited"
        );
    }
}

#[tokio::test]
async fn permission_denial_degrades_to_temp_id_with_retrievable_results() {
    let app = spawn_app();
    app.store.deny_inserts(true);

    let response = app
        .router
        .clone()
        .oneshot(text_search_request("jane doe"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"]["degraded"], true);
    let search_id = body["data"]["search_id"].as_str().unwrap().to_string();
    assert!(search_id.starts_with("temp_"), "got id {search_id}");

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/search/{search_id}/results"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"]["fallback"], false);
    assert_eq!(body["data"]["total_results"], 1);
    assert_eq!(
        body["data"]["results"][0]["url"],
        "https://example.com/jane"
    );
}

#[tokio::test]
async fn empty_successful_response_is_zero_results_not_fallback() {
    let app = spawn_app();
    app.provider.set_items(vec![]);

    let response = app
        .router
        .clone()
        .oneshot(text_search_request("nobody"))
        .await
        .unwrap();
    let body = body_json(response).await;
    let search_id = body["data"]["search_id"].as_str().unwrap().to_string();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/search/{search_id}/results"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"]["total_results"], 0);
    assert_eq!(body["data"]["fallback"], false);
    assert!(body["data"]["notice"].as_str().is_some());
}

fn multipart_request(file_name: &str, content_type: &str, payload: &[u8]) -> Request<Body> {
    let boundary = "guardarr-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/search/image")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn oversized_image_rejected_before_quota_and_provider() {
    let app = spawn_app();

    let oversized = vec![0u8; 11 * 1024 * 1024];
    let response = app
        .router
        .clone()
        .oneshot(multipart_request("big.png", "image/png", &oversized))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(app.provider.calls(), 0, "provider must not be touched");
    assert_eq!(app.store.upload_count(), 0, "no upload before validation");

    // Quota was not consumed: the full anonymous allowance is still there.
    for i in 0..5 {
        let response = app
            .router
            .clone()
            .oneshot(text_search_request(&format!("after {i}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn image_search_accepts_valid_upload() {
    let app = spawn_app();

    let response = app
        .router
        .clone()
        .oneshot(multipart_request("mine.jpg", "image/jpeg", b"\xff\xd8\xff"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert!(body["data"]["search_id"].as_str().is_some());
    assert_eq!(app.store.upload_count(), 1);
    assert_eq!(app.provider.image_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_image_upload_is_served_from_cache() {
    let app = spawn_app();

    let response = app
        .router
        .clone()
        .oneshot(multipart_request("mine.jpg", "image/jpeg", b"\xff\xd8\xff"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["cached"], false);
    let first_id = body["data"]["search_id"].as_str().unwrap().to_string();

    // Same bytes and options again. The stored file name carries a fresh
    // timestamp, but the cache identity is the image content, so this must
    // be a hit that skips both the upload and the provider.
    let response = app
        .router
        .clone()
        .oneshot(multipart_request("mine.jpg", "image/jpeg", b"\xff\xd8\xff"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["cached"], true);
    assert_eq!(body["data"]["search_id"], first_id.as_str());
    assert_eq!(app.store.upload_count(), 1, "cache hit must not re-upload");
    assert_eq!(app.provider.image_calls.load(Ordering::SeqCst), 1);

    // Different bytes are a different search.
    let response = app
        .router
        .clone()
        .oneshot(multipart_request("mine.jpg", "image/jpeg", b"\x89PNG"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"]["cached"], false);
    assert_eq!(app.store.upload_count(), 2);
}

#[tokio::test]
async fn admin_routes_reject_non_admins() {
    let app = spawn_app();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/admin/rate-limits")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_can_inspect_and_clear_rate_limits() {
    let app = spawn_app();
    app.store.put_user(
        "admin-token",
        AuthUser {
            id: "admin-1".to_string(),
            email: "root@example.com".to_string(),
            role: Some("admin".to_string()),
        },
    );

    // Burn some anonymous quota so there is something to inspect.
    for i in 0..3 {
        app.router
            .clone()
            .oneshot(text_search_request(&format!("q {i}")))
            .await
            .unwrap();
    }

    let request = Request::builder()
        .uri("/api/admin/rate-limits")
        .header("authorization", "Bearer admin-token")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["tracked_users"], 1);

    let request = Request::builder()
        .method("POST")
        .uri("/api/admin/rate-limits/clear")
        .header("authorization", "Bearer admin-token")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn subscription_requires_sign_in_and_premium_maps_through() {
    let app = spawn_app();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/subscription")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.store.put_user(
        "user-token",
        AuthUser {
            id: "u1".to_string(),
            email: "user@example.com".to_string(),
            role: None,
        },
    );
    app.store.put_subscription(
        "u1",
        Subscription {
            plan: Plan {
                name: "Premium".to_string(),
                search_limit: 100,
                result_limit: 50,
                monitoring_limit: 5,
                scheduled_search_limit: 3,
                price: 19.99,
            },
            status: "active".to_string(),
        },
    );

    let request = Request::builder()
        .uri("/api/subscription")
        .header("authorization", "Bearer user-token")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["plan"]["name"], "Premium");
}

#[tokio::test]
async fn history_and_delete_round_trip() {
    let app = spawn_app();
    app.store.put_user(
        "user-token",
        AuthUser {
            id: "u1".to_string(),
            email: "user@example.com".to_string(),
            role: None,
        },
    );

    let request = Request::builder()
        .method("POST")
        .uri("/api/search/text")
        .header("content-type", "application/json")
        .header("authorization", "Bearer user-token")
        .body(Body::from(json!({ "query": "jane doe" }).to_string()))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    let body = body_json(response).await;
    let search_id = body["data"]["search_id"].as_str().unwrap().to_string();

    let request = Request::builder()
        .uri("/api/search/history")
        .header("authorization", "Bearer user-token")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/search/{search_id}"))
        .header("authorization", "Bearer user-token")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Deleting it again is a 404.
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/search/{search_id}"))
        .header("authorization", "Bearer user-token")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn system_status_is_public() {
    let app = spawn_app();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/system/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"]["persistence_enabled"], false);
    assert!(body["data"]["version"].as_str().is_some());
}

#[tokio::test]
async fn checkout_verify_forwards_for_signed_in_users() {
    let app = spawn_app();
    app.store.put_user(
        "user-token",
        AuthUser {
            id: "u1".to_string(),
            email: "user@example.com".to_string(),
            role: None,
        },
    );

    let request = Request::builder()
        .method("POST")
        .uri("/api/checkout/verify")
        .header("content-type", "application/json")
        .header("authorization", "Bearer user-token")
        .body(Body::from(json!({ "session_id": "cs_123" }).to_string()))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"]["success"], true);
}
