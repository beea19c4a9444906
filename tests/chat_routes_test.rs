// ABOUTME: Integration tests for the HTTP layer: blocking JSON, SSE wire, CRUD
// ABOUTME: Drives the axum router directly with tower::oneshot, no live server
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use std::sync::Arc;
use tower::ServiceExt;

use common::{registry_with_mock, TestHarness};
use fusion_gateway::config::ProviderKind;
use fusion_gateway::routes::{self, GatewayState, DEFAULT_RATE_LIMIT};
use fusion_gateway::store::{InMemoryRateLimiter, RateLimitPolicy};

fn app(harness: &TestHarness, rate_limit: RateLimitPolicy) -> Router {
    let state = Arc::new(GatewayState {
        orchestration: Arc::clone(&harness.orchestration),
        registry: Arc::clone(&harness.registry),
        conversations: harness.conversations.clone(),
        messages: harness.messages.clone(),
        credits: harness.credits.clone(),
        rate_limiter: Arc::new(InMemoryRateLimiter::new()),
        rate_limit,
    });
    routes::router(state)
}

fn chat_request(body: &serde_json::Value, user: Option<&str>, uri: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::http::Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_reports_provider_status() {
    let (registry, _) = registry_with_mock(ProviderKind::OpenAi, "ok");
    let harness = TestHarness::new(registry);
    let app = app(&harness, DEFAULT_RATE_LIMIT);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["providers"]["openai"], "ok");
}

#[tokio::test]
async fn test_missing_user_header_is_rejected() {
    let (registry, _) = registry_with_mock(ProviderKind::OpenAi, "ok");
    let harness = TestHarness::new(registry);
    let app = app(&harness, DEFAULT_RATE_LIMIT);

    let body = serde_json::json!({"content": "hi", "provider": "openai"});
    let response = app
        .oneshot(chat_request(&body, None, "/api/chat"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_blocking_chat_turn_over_http() {
    let (registry, _) = registry_with_mock(ProviderKind::OpenAi, "the answer");
    let harness = TestHarness::new(registry);
    let app = app(&harness, DEFAULT_RATE_LIMIT);

    let body = serde_json::json!({"content": "a question", "provider": "openai"});
    let response = app
        .oneshot(chat_request(&body, Some("alice"), "/api/chat"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["content"], "the answer");
    assert_eq!(json["provider"], "openai");
    assert!(json["conversationId"].as_str().is_some());
    assert!(json["tokensOut"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_stream_wire_format_ends_with_done_frame() {
    let (registry, _) = registry_with_mock(ProviderKind::OpenAi, "streamed answer text");
    let harness = TestHarness::new(registry);
    let app = app(&harness, DEFAULT_RATE_LIMIT);

    let body =
        serde_json::json!({"content": "a question", "provider": "openai", "stream": true});
    let response = app
        .oneshot(chat_request(&body, Some("alice"), "/api/chat/stream"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let wire = String::from_utf8(bytes.to_vec()).unwrap();

    // Each frame is `data: <json>\n\n`; the final frame is the literal [DONE]
    let frames: Vec<&str> = wire
        .split("\n\n")
        .filter(|frame| !frame.is_empty())
        .collect();
    assert!(frames.iter().all(|frame| frame.starts_with("data: ")));
    assert_eq!(*frames.last().unwrap(), "data: [DONE]");

    let first: serde_json::Value =
        serde_json::from_str(frames[0].trim_start_matches("data: ")).unwrap();
    assert_eq!(first["type"], "metadata");

    let content: String = frames[1..frames.len() - 2]
        .iter()
        .map(|frame| {
            let chunk: serde_json::Value =
                serde_json::from_str(frame.trim_start_matches("data: ")).unwrap();
            assert_eq!(chunk["type"], "content");
            chunk["data"].as_str().unwrap().to_owned()
        })
        .collect();
    assert_eq!(content, "streamed answer text");

    let terminal: serde_json::Value =
        serde_json::from_str(frames[frames.len() - 2].trim_start_matches("data: ")).unwrap();
    assert_eq!(terminal["type"], "done");
}

#[tokio::test]
async fn test_stream_failure_delivers_error_then_done() {
    let (provider, _) = common::MockProvider::failing(ProviderKind::OpenAi, "down");
    let mut registry = fusion_gateway::llm::ProviderRegistry::new();
    registry.register(ProviderKind::OpenAi, Box::new(provider));
    let harness = TestHarness::new(registry);
    let app = app(&harness, DEFAULT_RATE_LIMIT);

    let body =
        serde_json::json!({"content": "a question", "provider": "openai", "stream": true});
    let response = app
        .oneshot(chat_request(&body, Some("alice"), "/api/chat/stream"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let wire = String::from_utf8(bytes.to_vec()).unwrap();
    let frames: Vec<&str> = wire
        .split("\n\n")
        .filter(|frame| !frame.is_empty())
        .collect();

    assert_eq!(frames.len(), 2);
    let error: serde_json::Value =
        serde_json::from_str(frames[0].trim_start_matches("data: ")).unwrap();
    assert_eq!(error["type"], "error");
    assert_eq!(error["data"]["code"], "PROVIDER_ERROR");
    assert_eq!(*frames.last().unwrap(), "data: [DONE]");
}

#[tokio::test]
async fn test_rate_limit_rejects_with_reset_metadata() {
    let (registry, _) = registry_with_mock(ProviderKind::OpenAi, "ok");
    let harness = TestHarness::new(registry);
    let app = app(
        &harness,
        RateLimitPolicy {
            limit: 1,
            window_secs: 60,
        },
    );

    let body = serde_json::json!({"content": "hi", "provider": "openai"});
    let first = app
        .clone()
        .oneshot(chat_request(&body, Some("alice"), "/api/chat"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(chat_request(&body, Some("alice"), "/api/chat"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let json = body_json(second).await;
    assert_eq!(json["error"]["code"], "RATE_LIMIT_EXCEEDED");
    assert!(json["error"]["context"]["reset_at"].as_str().is_some());
}

#[tokio::test]
async fn test_conversation_crud_is_owner_scoped() {
    let (registry, _) = registry_with_mock(ProviderKind::OpenAi, "answer");
    let harness = TestHarness::new(registry);
    let app = app(&harness, DEFAULT_RATE_LIMIT);

    // Create a conversation lazily via a turn
    let body = serde_json::json!({"content": "start here", "provider": "openai"});
    let response = app
        .clone()
        .oneshot(chat_request(&body, Some("alice"), "/api/chat"))
        .await
        .unwrap();
    let conversation_id = body_json(response).await["conversationId"]
        .as_str()
        .unwrap()
        .to_owned();

    // Owner sees it in the list and can read its messages
    let list = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/chat/conversations")
                .header("x-user-id", "alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let list_json = body_json(list).await;
    assert_eq!(list_json["total"], 1);

    let messages = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/chat/conversations/{conversation_id}/messages"))
                .header("x-user-id", "alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(messages).await["total"], 2);

    // A different caller gets not-found
    let foreign = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/chat/conversations/{conversation_id}"))
                .header("x-user-id", "mallory")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_credits_endpoint_grants_and_reports_balance() {
    let (registry, _) = registry_with_mock(ProviderKind::OpenAi, "ok");
    let harness = TestHarness::new(registry);
    let app = app(&harness, DEFAULT_RATE_LIMIT);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/credits")
                .header("x-user-id", "newcomer")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["credits"], fusion_gateway::store::INITIAL_CREDIT_GRANT);
}
