//! Ping endpoint tests, driven through the full router with tower's `oneshot`.

use axum::{
    body::Body,
    http::{header::CACHE_CONTROL, Method, Request, StatusCode},
    Router,
};
use dingo::middleware::REQUEST_ID_HEADER;
use dingo::routes::create_router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt; // for oneshot

async fn send(app: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, bytes.to_vec())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn ping_returns_pong() {
    let (status, headers, body) = send(create_router(), get("/api/ping")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/json");
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, json!({"ping": "pong"}));
}

#[tokio::test]
async fn ping_is_not_cacheable() {
    let (_, headers, _) = send(create_router(), get("/api/ping")).await;
    assert_eq!(headers[CACHE_CONTROL], "no-store");
}

#[tokio::test]
async fn ping_is_identical_across_calls() {
    let app = create_router();
    let (_, _, first) = send(app.clone(), get("/api/ping")).await;
    for _ in 0..5 {
        let (status, _, body) = send(app.clone(), get("/api/ping")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, first);
    }
}

#[tokio::test]
async fn ping_ignores_query_and_body() {
    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/ping?ping=ding&x=1")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"ping": "something else"}"#))
        .unwrap();
    let (status, _, body) = send(create_router(), request).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, json!({"ping": "pong"}));
}

#[tokio::test]
async fn ping_rejects_other_methods() {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/ping")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(create_router(), request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let (status, _, _) = send(create_router(), get("/api/pong")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn responses_carry_distinct_request_ids() {
    let app = create_router();
    let (_, first, _) = send(app.clone(), get("/api/ping")).await;
    let (_, second, _) = send(app, get("/api/ping")).await;

    let first = first[REQUEST_ID_HEADER].to_str().unwrap().to_string();
    let second = second[REQUEST_ID_HEADER].to_str().unwrap().to_string();
    assert_eq!(first.len(), 36);
    assert_ne!(first, second);
}
