// ABOUTME: Integration tests for the streaming chat turn variant
// ABOUTME: Verifies chunk ordering, exact reassembly, and terminal error delivery
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

mod common;

use std::sync::Arc;

use common::{explicit_turn_request, registry_with_mock, TestHarness};
use fusion_gateway::config::ProviderKind;
use fusion_gateway::models::TurnStreamChunk;
use fusion_gateway::services::STREAM_CHUNK_CHARS;

async fn collect_chunks(
    harness: &TestHarness,
    user_id: &str,
    request: fusion_gateway::models::ChatTurnRequest,
    request_id: Option<String>,
) -> Vec<TurnStreamChunk> {
    let mut rx = Arc::clone(&harness.orchestration).process_turn_streaming(
        user_id.to_owned(),
        request,
        request_id,
    );
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    chunks
}

#[tokio::test]
async fn test_stream_reassembles_to_persisted_content() {
    let answer = "Streaming responses are assembled upstream and re-chunked locally \
                  so the transport gets a steady cadence regardless of provider pacing."
        .repeat(3);
    let (registry, _) = registry_with_mock(ProviderKind::OpenAi, answer.clone());
    let harness = TestHarness::new(registry);

    let mut request = explicit_turn_request("tell me about streams", ProviderKind::OpenAi);
    request.stream = true;
    let chunks = collect_chunks(&harness, "alice", request, None).await;

    // Strict order: one metadata, content pieces, one terminal done
    assert!(matches!(chunks.first(), Some(TurnStreamChunk::Metadata(_))));
    let terminal_count = chunks.iter().filter(|c| c.is_terminal()).count();
    assert_eq!(terminal_count, 1);
    assert!(chunks.last().unwrap().is_terminal());

    let reassembled: String = chunks
        .iter()
        .filter_map(|chunk| match chunk {
            TurnStreamChunk::Content(piece) => Some(piece.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(reassembled, answer);

    // Every piece respects the fixed re-chunking size
    for chunk in &chunks {
        if let TurnStreamChunk::Content(piece) = chunk {
            assert!(piece.chars().count() <= STREAM_CHUNK_CHARS);
        }
    }

    // The persisted assistant message equals the reassembled stream
    let messages = harness
        .sole_conversation_messages("alice")
        .await
        .unwrap();
    assert_eq!(messages[1].content, reassembled);
}

#[tokio::test]
async fn test_stream_done_carries_token_totals() {
    let (registry, _) = registry_with_mock(ProviderKind::OpenAi, "short answer");
    let harness = TestHarness::new(registry);

    let mut request = explicit_turn_request("hi", ProviderKind::OpenAi);
    request.stream = true;
    let chunks = collect_chunks(&harness, "alice", request, None).await;

    match chunks.last().unwrap() {
        TurnStreamChunk::Done(completion) => {
            assert!(completion.tokens_in > 0);
            assert!(completion.tokens_out > 0);
        }
        other => panic!("expected done chunk, got {other:?}"),
    }

    let events = harness.usage.events();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_replayed_request_id_streams_single_error_chunk() {
    let (registry, calls) = registry_with_mock(ProviderKind::OpenAi, "answer");
    let harness = TestHarness::new(registry);

    harness
        .orchestration
        .process_turn(
            "alice",
            &explicit_turn_request("hi", ProviderKind::OpenAi),
            Some("req-replay".into()),
        )
        .await
        .unwrap();

    let mut request = explicit_turn_request("hi again", ProviderKind::OpenAi);
    request.stream = true;
    let chunks = collect_chunks(&harness, "alice", request, Some("req-replay".into())).await;

    assert_eq!(chunks.len(), 1);
    match &chunks[0] {
        TurnStreamChunk::Error { code, message } => {
            assert_eq!(code, "CONFLICT");
            assert!(message.contains("already processed"));
        }
        other => panic!("expected error chunk, got {other:?}"),
    }

    // The replay performed no second provider call and recorded no second event
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(harness.usage.events().len(), 1);
}

#[tokio::test]
async fn test_stream_failure_ends_with_error_chunk() {
    let (provider, _) = common::MockProvider::failing(ProviderKind::OpenAi, "upstream down");
    let mut registry = fusion_gateway::llm::ProviderRegistry::new();
    registry.register(ProviderKind::OpenAi, Box::new(provider));
    let harness = TestHarness::new(registry);

    let mut request = explicit_turn_request("hi", ProviderKind::OpenAi);
    request.stream = true;
    let chunks = collect_chunks(&harness, "alice", request, None).await;

    assert_eq!(chunks.len(), 1);
    assert!(matches!(chunks[0], TurnStreamChunk::Error { .. }));
    assert!(harness.usage.events().is_empty());
}

#[tokio::test]
async fn test_stream_failure_releases_request_id() {
    let (provider, _) = common::MockProvider::failing(ProviderKind::OpenAi, "upstream down");
    let mut registry = fusion_gateway::llm::ProviderRegistry::new();
    registry.register(ProviderKind::OpenAi, Box::new(provider));
    let harness = TestHarness::new(registry);

    let mut request = explicit_turn_request("hi", ProviderKind::OpenAi);
    request.stream = true;
    let first = collect_chunks(&harness, "alice", request.clone(), Some("req-s".into())).await;
    assert!(matches!(first[0], TurnStreamChunk::Error { .. }));

    // Retrying the failed turn with the same key is not a replay
    let retry = collect_chunks(&harness, "alice", request, Some("req-s".into())).await;
    match &retry[0] {
        TurnStreamChunk::Error { code, .. } => assert_eq!(code, "PROVIDER_ERROR"),
        other => panic!("expected error chunk, got {other:?}"),
    }
}

#[tokio::test]
async fn test_dropped_receiver_skips_usage_record() {
    let answer = "x".repeat(STREAM_CHUNK_CHARS * 100);
    let (registry, _) = registry_with_mock(ProviderKind::OpenAi, answer);
    let harness = TestHarness::new(registry);

    let mut request = explicit_turn_request("hi", ProviderKind::OpenAi);
    request.stream = true;
    let mut rx = Arc::clone(&harness.orchestration).process_turn_streaming(
        "alice".to_owned(),
        request,
        None,
    );

    // Read only the metadata chunk, then disconnect
    let first = rx.recv().await.unwrap();
    assert!(matches!(first, TurnStreamChunk::Metadata(_)));
    drop(rx);

    // Give the producer time to observe the closed channel
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(harness.usage.events().is_empty());
}
