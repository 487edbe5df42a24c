use super::*;

#[tokio::test]
async fn test_capabilities_endpoint() {
    let (downloader, _temp_dir) = create_test_downloader().await;
    let app = create_router(downloader.clone(), downloader.config.clone());

    let response = app.oneshot(get("/capabilities")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["extractor"].as_str().unwrap().ends_with("fake-extractor"));
    assert!(body["muxer"].as_str().unwrap().ends_with("fake-muxer"));
    assert_eq!(body["realtime_mux"], true);
    assert_eq!(body["active_descriptors"], 0);
    assert_eq!(body["active_streams"], 0);
}

#[tokio::test]
async fn test_openapi_spec_is_public() {
    let (downloader, _temp_dir) = create_test_downloader().await;
    let app = router_with_key(&downloader, "test-secret-key");

    let response = app.oneshot(get("/openapi.json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["info"]["title"], "remux-dl REST API");
    assert!(body["paths"]["/downloads/{id}/stream"].is_object());
}

#[tokio::test]
async fn test_swagger_ui_follows_config() {
    let (downloader, _temp_dir) = create_test_downloader().await;

    let mut config = (*downloader.config).clone();
    config.server.api.swagger_ui = false;
    let app = create_router(downloader.clone(), Arc::new(config));
    let response = app.oneshot(get("/swagger-ui/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let mut config = (*downloader.config).clone();
    config.server.api.swagger_ui = true;
    let app = create_router(downloader, Arc::new(config));
    let response = app.oneshot(get("/swagger-ui/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_sse_event_stream() {
    use crate::types::{DescriptorId, ProgressEvent, Stage};
    use futures::StreamExt;

    let (downloader, _temp_dir) = create_test_downloader().await;
    let app = create_router(downloader.clone(), downloader.config.clone());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/events")
                .header("Accept", "text/event-stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert!(
        content_type.contains("text/event-stream"),
        "Content-Type should be text/event-stream, got: {}",
        content_type
    );

    // The handler subscribed before returning, so this event is delivered
    let id: DescriptorId = "0123456789abcdef".parse().unwrap();
    downloader
        .hub
        .publish(&id, ProgressEvent::with_progress(Stage::Merging, 12.0));

    let mut frames = response.into_body().into_data_stream();
    let frame = tokio::time::timeout(Duration::from_secs(5), frames.next())
        .await
        .expect("event delivered")
        .unwrap()
        .unwrap();
    let frame = String::from_utf8(frame.to_vec()).unwrap();
    assert!(frame.starts_with("event: merging\n"), "got {frame:?}");
    assert!(frame.contains(r#""downloadId":"0123456789abcdef""#));
}
