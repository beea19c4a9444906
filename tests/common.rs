// ABOUTME: Shared test utilities: quiet logging, scripted mock provider, harness
// ABOUTME: Builds an orchestration over in-memory stores with inspectable state
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs
#![allow(dead_code)]

//! Shared test utilities for `fusion_gateway`
//!
//! Provides a scripted [`MockProvider`] with an atomic call counter and a
//! [`TestHarness`] wiring the orchestration over in-memory stores whose
//! concrete types stay inspectable from tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use fusion_gateway::config::ProviderKind;
use fusion_gateway::errors::{AppError, AppResult};
use fusion_gateway::llm::{
    estimate_prompt_tokens, estimate_tokens, ChatRequest, ChatResponse, LlmProvider,
    ProviderRegistry, TokenUsage,
};
use fusion_gateway::models::ChatTurnRequest;
use fusion_gateway::services::ChatOrchestration;
use fusion_gateway::store::{
    InMemoryConversationStore, InMemoryCreditLedger, InMemoryMessageStore, InMemoryUsageLedger,
};

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

const MOCK_MODELS: &[&str] = &["mock-large", "mock-small"];

/// Scripted provider: fixed reply or fixed failure, with a call counter
pub struct MockProvider {
    kind: ProviderKind,
    reply: String,
    failure: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl MockProvider {
    /// A provider that always answers with `reply`
    pub fn replying(kind: ProviderKind, reply: impl Into<String>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Self {
            kind,
            reply: reply.into(),
            failure: None,
            calls: Arc::clone(&calls),
        };
        (provider, calls)
    }

    /// A provider that always fails with a provider error
    pub fn failing(kind: ProviderKind, message: impl Into<String>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Self {
            kind,
            reply: String::new(),
            failure: Some(message.into()),
            calls: Arc::clone(&calls),
        };
        (provider, calls)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    fn default_model(&self) -> &str {
        MOCK_MODELS[0]
    }

    fn available_models(&self) -> &'static [&'static str] {
        MOCK_MODELS
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(AppError::provider_error(self.kind, message.clone()));
        }

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| MOCK_MODELS[0].to_owned());
        Ok(ChatResponse {
            content: self.reply.clone(),
            model,
            provider: self.kind.as_str().to_owned(),
            usage: TokenUsage::new(
                estimate_prompt_tokens(&request.messages),
                estimate_tokens(&self.reply),
            ),
            finish_reason: Some("stop".to_owned()),
            raw: serde_json::Value::Null,
        })
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        Ok(self.failure.is_none())
    }
}

/// Orchestration over in-memory stores, with everything inspectable
pub struct TestHarness {
    pub orchestration: Arc<ChatOrchestration>,
    pub registry: Arc<ProviderRegistry>,
    pub conversations: Arc<InMemoryConversationStore>,
    pub messages: Arc<InMemoryMessageStore>,
    pub usage: Arc<InMemoryUsageLedger>,
    pub credits: Arc<InMemoryCreditLedger>,
}

impl TestHarness {
    /// Build a harness around an already-populated registry
    pub fn new(registry: ProviderRegistry) -> Self {
        Self::with_credits(registry, InMemoryCreditLedger::new())
    }

    /// Build a harness with a preset credit ledger
    pub fn with_credits(registry: ProviderRegistry, credits: InMemoryCreditLedger) -> Self {
        init_test_logging();
        let registry = Arc::new(registry);
        let conversations = Arc::new(InMemoryConversationStore::new());
        let messages = Arc::new(InMemoryMessageStore::new());
        let usage = Arc::new(InMemoryUsageLedger::new());
        let credits = Arc::new(credits);

        let orchestration = Arc::new(ChatOrchestration::new(
            Arc::clone(&registry),
            conversations.clone(),
            messages.clone(),
            usage.clone(),
            credits.clone(),
        ));

        Self {
            orchestration,
            registry,
            conversations,
            messages,
            usage,
            credits,
        }
    }

    /// Messages persisted in the caller's only conversation
    pub async fn sole_conversation_messages(
        &self,
        user_id: &str,
    ) -> AppResult<Vec<fusion_gateway::store::StoredMessage>> {
        use fusion_gateway::store::{ConversationStore, MessageStore};
        let conversations = self.conversations.find_many(user_id).await?;
        match conversations.first() {
            Some(conversation) => self.messages.find_many(&conversation.id).await,
            None => Ok(Vec::new()),
        }
    }
}

/// Registry with a single scripted provider
pub fn registry_with_mock(
    kind: ProviderKind,
    reply: impl Into<String>,
) -> (ProviderRegistry, Arc<AtomicUsize>) {
    let (provider, calls) = MockProvider::replying(kind, reply);
    let mut registry = ProviderRegistry::new();
    registry.register(kind, Box::new(provider));
    (registry, calls)
}

/// A minimal valid turn request
pub fn turn_request(content: &str) -> ChatTurnRequest {
    ChatTurnRequest {
        conversation_id: None,
        content: content.to_owned(),
        model: None,
        provider: None,
        temperature: None,
        max_tokens: None,
        stream: false,
    }
}

/// A turn request pinned to an explicit provider (skips fusion routing)
pub fn explicit_turn_request(content: &str, provider: ProviderKind) -> ChatTurnRequest {
    let mut request = turn_request(content);
    request.provider = Some(provider);
    request
}
