//! HTTP routes exercised through the router with an in-memory hub.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use eventcast::http::{self, AppState};
use eventcast::logging::LogConfig;
use eventcast::realtime::{EngineConfig, HeartbeatConfig};
use eventcast::EventHub;

fn app() -> (Router, Arc<EventHub>) {
    let hub = Arc::new(EventHub::in_memory(
        EngineConfig::default(),
        HeartbeatConfig::default(),
    ));
    let router = http::router(AppState::new(hub.clone(), LogConfig::default()));
    (router, hub)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn next_chunk(body: &mut Body) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .expect("chunk arrives")
        .expect("body still open")
        .unwrap();
    String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app();
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "OK");
    assert_eq!(body["connections"], 0);
    assert!(body.get("database").is_none());
}

#[tokio::test]
async fn test_membership_lifecycle() {
    let (app, _) = app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/events/channels/subscribe",
            json!({"userId": "alice", "channel": "news"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        json_body(response).await,
        json!({"status": "subscribed", "userId": "alice", "channel": "news"})
    );

    let response = app
        .clone()
        .oneshot(get("/api/events/channels/list?userId=alice"))
        .await
        .unwrap();
    assert_eq!(json_body(response).await, json!({"channels": ["news"]}));

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/events/channels/unsubscribe",
            json!({"userId": "alice", "channel": "news"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "unsubscribed");

    let response = app
        .oneshot(post_json(
            "/api/events/channels/subscribe",
            json!({"userId": "alice"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_publish_validation_and_history() {
    let (app, _) = app();

    let response = app
        .clone()
        .oneshot(post_json("/api/events/publish", json!({"channel": "news"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    for i in 1..=3 {
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/events/publish",
                json!({"channel": "news", "eventType": "update", "payload": {"n": i}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let response = app
        .oneshot(get("/api/events/history?channel=news&afterId=1&limit=5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["id"], 2);
    assert_eq!(events[0]["eventType"], "update");
    assert_eq!(events[1]["payload"], json!({"n": 3}));
    assert!(events[0]["createdAt"].is_string());
}

#[tokio::test]
async fn test_stream_requires_membership() {
    let (app, _) = app();
    let response = app
        .clone()
        .oneshot(get("/api/events/stream?userId=alice&channels=news"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(get("/api/events/stream?userId=alice"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stream_rejects_malformed_last_event_id() {
    let (app, hub) = app();
    hub.add_membership("alice", "news").await.unwrap();

    let request = Request::get("/api/events/stream?userId=alice&channels=news")
        .header("Last-Event-ID", "yesterday")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(hub.connection_count(), 0);
}

#[tokio::test]
async fn test_stream_delivers_published_events() {
    let (app, hub) = app();
    hub.add_membership("alice", "news").await.unwrap();

    let response = app
        .clone()
        .oneshot(get("/api/events/stream?userId=alice&channels=news,sports"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

    let count = app
        .clone()
        .oneshot(get("/api/events/active-connections"))
        .await
        .unwrap();
    assert_eq!(json_body(count).await, json!({"count": 1}));

    app.clone()
        .oneshot(post_json(
            "/api/events/publish",
            json!({"channel": "news", "eventType": "update", "payload": {"x": 1}}),
        ))
        .await
        .unwrap();

    let mut body = response.into_body();
    assert_eq!(
        next_chunk(&mut body).await,
        "id: 1\nevent: update\ndata: {\"x\":1}\n\n"
    );

    drop(body);
    assert_eq!(hub.connection_count(), 0);
}

#[tokio::test]
async fn test_stream_resumes_from_last_event_id() {
    let (app, hub) = app();
    hub.add_membership("alice", "news").await.unwrap();
    for i in 1..=3 {
        hub.publish(eventcast::NewEvent::new("news", "update", json!(i)))
            .await
            .unwrap();
    }

    let request = Request::get("/api/events/stream?userId=alice&channels=news")
        .header("Last-Event-ID", "2")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body();
    assert_eq!(next_chunk(&mut body).await, "id: 3\nevent: update\ndata: 3\n\n");
}

#[tokio::test]
async fn test_stream_unavailable_after_shutdown() {
    let (app, hub) = app();
    hub.add_membership("alice", "news").await.unwrap();
    hub.start();
    hub.shutdown().await;

    let response = app
        .oneshot(get("/api/events/stream?userId=alice&channels=news"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(hub.connection_count(), 0);
}
