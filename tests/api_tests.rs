//! HTTP adapter tests
//!
//! Drives the router in-process with `tower::ServiceExt::oneshot`.
//!
//! Run with: cargo test --test api_tests

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use leara::api::{router, AppState};
use leara::summary::{SummaryEngine, TemplateSummarizer};
use leara::types::SummaryConfig;
use leara::Store;

async fn app() -> Router {
    let store = Store::open_in_memory().await.unwrap();
    let summary = SummaryEngine::new(
        store.clone(),
        Arc::new(TemplateSummarizer),
        SummaryConfig::default(),
    );
    router(AppState::new(store, summary))
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app().await;
    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn memory_crud_and_search() {
    let app = app().await;

    let (status, memory) = call(
        &app,
        Method::POST,
        "/api/memories",
        Some(json!({"key": "fav_color", "value": "Teal", "priority": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(memory["category"], "general");
    let id = memory["id"].as_i64().unwrap();

    let (status, page) = call(&app, Method::GET, "/api/memories?category=general", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);

    let (_, hits) = call(&app, Method::GET, "/api/memories/search?q=teal", None).await;
    assert_eq!(hits.as_array().unwrap().len(), 1);

    let (status, hits) = call(&app, Method::GET, "/api/memories/search?q=", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hits, json!([]));

    let (status, _) = call(
        &app,
        Method::PATCH,
        &format!("/api/memories/{}", id),
        Some(json!({"expires_at": "2000-01-01T00:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, Method::GET, &format!("/api/memories/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn validation_errors_are_400() {
    let app = app().await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/memories",
        Some(json!({"key": "k", "value": "v", "priority": 9})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");

    let (status, _) = call(&app, Method::POST, "/api/tasks", Some(json!({"title": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, Method::POST, "/api/tasks", Some(json!({"nope": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");
}

#[tokio::test]
async fn task_status_route() {
    let app = app().await;

    let (_, task) = call(
        &app,
        Method::POST,
        "/api/tasks",
        Some(json!({"title": "Call John", "priority": 5})),
    )
    .await;
    assert_eq!(task["status"], "pending");
    let uri = format!("/api/tasks/{}/status", task["id"]);

    let (status, task) = call(&app, Method::PUT, &uri, Some(json!({"status": "completed"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(task["completed_at"].is_string());

    let (status, body) = call(&app, Method::PUT, &uri, Some(json!({"status": "archived"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");

    let (status, _) = call(
        &app,
        Method::PUT,
        "/api/tasks/9999/status",
        Some(json!({"status": "completed"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, page) = call(&app, Method::GET, "/api/tasks?status=completed", None).await;
    assert_eq!(page["total"], 1);
}

#[tokio::test]
async fn session_context_routes() {
    let app = app().await;
    let uri = "/api/sessions/s1/context";

    for value in ["happy", "sad"] {
        let (status, _) = call(
            &app,
            Method::PUT,
            uri,
            Some(json!({"context_key": "mood", "context_value": value})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, entries) = call(&app, Method::GET, uri, None).await;
    assert_eq!(entries.as_array().unwrap().len(), 1);
    assert_eq!(entries[0]["context_value"], "sad");

    let (_, other) = call(&app, Method::GET, "/api/sessions/s2/context", None).await;
    assert_eq!(other, json!([]));

    let (_, deleted) = call(&app, Method::DELETE, uri, None).await;
    assert_eq!(deleted["deleted"], 1);
}

#[tokio::test]
async fn chat_and_summary_routes() {
    let app = app().await;

    let (_, summary) = call(&app, Method::GET, "/api/summary", None).await;
    assert_eq!(summary["summary"], "");

    let (status, created) = call(
        &app,
        Method::POST,
        "/api/chat/messages",
        Some(json!({"content": "my cat is called Milo", "sender": "user"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["conversation"]["message_count"], 1);
    let conversation_id = created["conversation"]["id"].as_str().unwrap().to_string();

    let (_, created) = call(
        &app,
        Method::POST,
        "/api/chat/messages",
        Some(json!({
            "conversation_id": conversation_id,
            "content": "Noted!",
            "sender": "assistant"
        })),
    )
    .await;
    assert_eq!(created["conversation"]["message_count"], 2);

    let (_, messages) = call(
        &app,
        Method::GET,
        &format!("/api/chat/conversations/{}/messages", conversation_id),
        None,
    )
    .await;
    assert_eq!(messages.as_array().unwrap().len(), 2);
    assert_eq!(messages[1]["sender"], "assistant");

    let (status, summary) = call(
        &app,
        Method::GET,
        &format!("/api/summary?conversation_id={}", conversation_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = summary["summary"].as_str().unwrap();
    assert!(text.contains("user: my cat is called Milo"));
    assert!(text.contains("assistant: Noted!"));
}

#[tokio::test]
async fn memories_by_key_route() {
    let app = app().await;

    for value in ["Rex", "Bella"] {
        call(
            &app,
            Method::POST,
            "/api/memories",
            Some(json!({"key": "dog", "value": value})),
        )
        .await;
    }
    call(
        &app,
        Method::POST,
        "/api/memories",
        Some(json!({"key": "dog", "value": "Old Yeller", "expires_at": "2000-01-01T00:00:00Z"})),
    )
    .await;

    let (status, found) = call(&app, Method::GET, "/api/memories/by-key/dog", None).await;
    assert_eq!(status, StatusCode::OK);
    let values: Vec<_> = found
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["value"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(values, vec!["Bella", "Rex"]);

    let (_, found) = call(&app, Method::GET, "/api/memories/by-key/cat", None).await;
    assert_eq!(found, json!([]));
}

#[tokio::test]
async fn malformed_path_ids_are_json_400s() {
    let app = app().await;

    for uri in [
        "/api/memories/abc",
        "/api/tasks/abc",
        "/api/tasks/abc/status",
        "/api/chat/conversations/not-a-uuid/messages",
    ] {
        let method = if uri.ends_with("/status") {
            Method::PUT
        } else {
            Method::GET
        };
        let body = if method == Method::PUT {
            Some(json!({"status": "completed"}))
        } else {
            None
        };
        let (status, body) = call(&app, method, uri, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["kind"], "validation_error", "{uri}");
    }
}

#[tokio::test]
async fn summary_for_unknown_conversation_is_404() {
    let app = app().await;
    let (status, body) = call(
        &app,
        Method::GET,
        "/api/summary?conversation_id=6f1c1a4e-0000-4000-8000-000000000000",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn five_digit_year_is_a_validation_error() {
    let app = app().await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/tasks",
        Some(json!({"title": "far future", "due_date": "+10000-01-01T00:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");
}
