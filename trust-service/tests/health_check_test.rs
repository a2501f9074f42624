mod common;

use axum::{body::Body, http::Request, http::StatusCode};
use common::{request, TestApp};
use serde_json::json;
use tower::util::ServiceExt;

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );

    let (_, body) = app.send(request("GET", "/health", None, None)).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "trust-service");
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let app = TestApp::new();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-123");
}

#[tokio::test]
async fn test_signup_creates_viewer() {
    let app = TestApp::new();

    let (status, body) = app
        .send(request(
            "POST",
            "/principals",
            None,
            Some(json!({ "email": "new.hire@example.com", "display_name": "New Hire" })),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["role"], "viewer");
    assert_eq!(body["active"], true);

    let (status, _) = app
        .send(request(
            "POST",
            "/principals",
            None,
            Some(json!({ "email": "not-an-email", "display_name": "Bad" })),
        ))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = TestApp::new();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/principals")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
