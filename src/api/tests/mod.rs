use super::*;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::time::Duration;
use tower::ServiceExt;

mod system;

/// Helper to create a test RemuxDownloader instance wrapped in Arc
async fn create_test_downloader() -> (Arc<RemuxDownloader>, tempfile::TempDir) {
    let (downloader, temp_dir) = crate::downloader::test_helpers::create_test_downloader().await;
    (Arc::new(downloader), temp_dir)
}

/// Router requiring `api_key`
fn router_with_key(downloader: &Arc<RemuxDownloader>, api_key: &str) -> Router {
    let mut config = (*downloader.config).clone();
    config.server.api.api_key = Some(api_key.to_string());
    create_router(downloader.clone(), Arc::new(config))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_api_server_spawns() {
    let (downloader, _temp_dir) = create_test_downloader().await;

    // Port 0 = OS assigns a free port
    let mut config = (*downloader.config).clone();
    config.server.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let config = Arc::new(config);

    let api_handle = tokio::spawn({
        let downloader = downloader.clone();
        let config = config.clone();
        async move { start_api_server(downloader, config).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished(), "server exited early");
    api_handle.abort();
}

#[tokio::test]
async fn test_cors_enabled() {
    let (downloader, _temp_dir) = create_test_downloader().await;

    let mut config = (*downloader.config).clone();
    config.server.api.cors_enabled = true;
    config.server.api.cors_origins = vec!["*".to_string()];
    let app = create_router(downloader, Arc::new(config));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert!(
        headers.contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
    assert!(
        headers
            .get("access-control-expose-headers")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("content-disposition")),
        "Content-Disposition should be readable by browser clients"
    );
}

#[tokio::test]
async fn test_health_endpoint() {
    let (downloader, _temp_dir) = create_test_downloader().await;
    let config = downloader.config.clone();
    let app = create_router(downloader, config);

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["accepting"], true);
}

#[tokio::test]
async fn test_health_is_never_authenticated() {
    let (downloader, _temp_dir) = create_test_downloader().await;
    let app = router_with_key(&downloader, "test-secret-key");

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_authentication_with_api_key() {
    let (downloader, _temp_dir) = create_test_downloader().await;
    let app = router_with_key(&downloader, "test-secret-key");

    // No credentials
    let response = app.clone().oneshot(get("/capabilities")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "unauthorized");

    // X-Api-Key header
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/capabilities")
                .header("X-Api-Key", "test-secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Bearer token
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/capabilities")
                .header("Authorization", "Bearer test-secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Query parameter, as used by download links
    let response = app
        .clone()
        .oneshot(get("/capabilities?token=test-secret-key"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Wrong key
    let response = app
        .oneshot(
            Request::builder()
                .uri("/capabilities")
                .header("X-Api-Key", "wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_custom_session_validator() {
    use async_trait::async_trait;
    use std::net::IpAddr;

    /// Accepts only requests from a known browser
    struct UserAgentValidator;

    #[async_trait]
    impl SessionValidator for UserAgentValidator {
        async fn validate(
            &self,
            token: Option<&str>,
            _client_ip: Option<IpAddr>,
            user_agent: Option<&str>,
        ) -> Option<Identity> {
            match (token, user_agent) {
                (Some("session-1"), Some(agent)) if agent.starts_with("Mozilla") => Some(Identity {
                    subject: "user-1".to_string(),
                }),
                _ => None,
            }
        }
    }

    let (downloader, _temp_dir) = create_test_downloader().await;
    let state = AppState::new(downloader.clone(), downloader.config.clone())
        .with_sessions(Arc::new(UserAgentValidator));
    let app = router_with_state(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/capabilities?token=session-1")
                .header("User-Agent", "Mozilla/5.0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/capabilities?token=session-1")
                .header("User-Agent", "curl/8.0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_spawn_api_server_method() {
    let (downloader, _temp_dir) = create_test_downloader().await;

    let api_handle = downloader.spawn_api_server();
    tokio::time::sleep(Duration::from_millis(100)).await;
    api_handle.abort();
}
