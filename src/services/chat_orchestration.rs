// ABOUTME: End-to-end chat turn orchestration, blocking and streaming variants
// ABOUTME: Idempotency claim, lazy conversation create, credit gate, persist, meter
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

//! # Chat Orchestration
//!
//! Owns the end-to-end chat turn as an explicit sequence of steps:
//!
//! ```text
//! Init -> IdempotencyCheck -> ConversationResolve -> HistoryLoad
//!      -> CreditCheck -> ProviderCall -> Persist -> UsageEmit -> Done
//! ```
//!
//! Any step can fail into the error path. The idempotency claim happens
//! before all side-effecting work, so a replayed request id never repeats a
//! provider call or a usage record; a turn that fails before UsageEmit hands
//! the key back, so the caller may retry with it. The credit check is an optimistic
//! pre-check against a flat estimate; the authoritative debit happens in the
//! external billing job, keyed by the same request id.
//!
//! The streaming variant runs the same steps in a producer task and pushes
//! typed chunks through a bounded channel. The provider response is always
//! one assembled answer; content chunks are produced by local fixed-size
//! re-chunking to give the transport a steady cadence. A dropped receiver
//! (client disconnect) stops emission before the usage record is written.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::ProviderKind;
use crate::errors::{AppError, AppResult};
use crate::fusion::{FusionOptions, FusionOrchestrator, Intent};
use crate::llm::{ChatMessage, ChatRequest, ProviderRegistry};
use crate::models::{
    ChatTurnRequest, ChatTurnResponse, StreamCompletion, StreamMetadata, TurnStreamChunk,
    UsageEvent, UsageEventType,
};
use crate::store::{
    Conversation, ConversationStore, CreditLedger, MessageStore, NewMessage, UsageLedger,
};

/// Flat estimated cost (credits) used only for the optimistic pre-check
///
/// The billing job prices actual usage from its own per-model table; the two
/// numbers are deliberately not unified.
pub const ESTIMATED_TURN_COST: f64 = 1.0;

/// Size of locally re-chunked stream pieces, in characters
pub const STREAM_CHUNK_CHARS: usize = 48;

/// Maximum characters of the first turn used to seed a conversation title
const TITLE_SEED_CHARS: usize = 60;

/// Capacity of the producer-to-transport chunk channel
const STREAM_CHANNEL_CAPACITY: usize = 16;

/// Outcome of the provider call step, either routed or explicit
struct TurnOutcome {
    content: String,
    model: String,
    provider: ProviderKind,
    tokens_in: u32,
    tokens_out: u32,
    intent: Option<Intent>,
}

/// Orchestrates a chat turn across registry, fusion, stores, and ledgers
pub struct ChatOrchestration {
    registry: Arc<ProviderRegistry>,
    fusion: FusionOrchestrator,
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    usage: Arc<dyn UsageLedger>,
    credits: Arc<dyn CreditLedger>,
}

impl ChatOrchestration {
    /// Wire up the orchestration with its collaborators
    ///
    /// All persistence collaborators are required; a caller wanting a no-op
    /// mode injects explicit null-object implementations.
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        usage: Arc<dyn UsageLedger>,
        credits: Arc<dyn CreditLedger>,
    ) -> Self {
        let fusion = FusionOrchestrator::new(Arc::clone(&registry));
        Self {
            registry,
            fusion,
            conversations,
            messages,
            usage,
            credits,
        }
    }

    // ========================================================================
    // Blocking variant
    // ========================================================================

    /// Process a chat turn and return the assembled response
    ///
    /// `request_id` is the idempotency key; callers that do not supply one
    /// get a fresh key generated for the turn (returned in the response so
    /// retries can reuse it).
    ///
    /// # Errors
    ///
    /// `Conflict` for a replayed request id, `NotFound` for a foreign
    /// conversation, `InsufficientCredits` when the pre-check fails, and
    /// normalized provider errors from the call itself. A failed turn hands
    /// its key back, so the same id may be retried.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn process_turn(
        &self,
        user_id: &str,
        request: &ChatTurnRequest,
        request_id: Option<String>,
    ) -> AppResult<ChatTurnResponse> {
        request.validate()?;
        let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        if self.usage.check_idempotency(&request_id).await? {
            return Err(AppError::conflict(&request_id));
        }

        let result = self.claimed_turn(user_id, request, &request_id).await;
        if result.is_err() {
            self.release_claim(&request_id).await;
        }
        result
    }

    /// The steps after a successful idempotency claim
    async fn claimed_turn(
        &self,
        user_id: &str,
        request: &ChatTurnRequest,
        request_id: &str,
    ) -> AppResult<ChatTurnResponse> {
        let conversation = self.resolve_conversation(user_id, request).await?;
        let history = self.load_history(&conversation.id).await?;
        self.check_credits(user_id).await?;

        let outcome = self.call_provider(request, history, false).await?;
        self.persist_turn(user_id, &conversation, request, &outcome)
            .await?;
        self.emit_usage(user_id, &conversation.id, request_id, &outcome)
            .await?;

        info!(
            conversation_id = %conversation.id,
            model = %outcome.model,
            provider = %outcome.provider,
            "chat turn complete"
        );

        Ok(ChatTurnResponse {
            conversation_id: conversation.id,
            request_id: request_id.to_owned(),
            content: outcome.content,
            model: outcome.model,
            provider: outcome.provider,
            tokens_in: outcome.tokens_in,
            tokens_out: outcome.tokens_out,
            intent: outcome.intent,
        })
    }

    // ========================================================================
    // Streaming variant
    // ========================================================================

    /// Process a chat turn, emitting typed chunks through a channel
    ///
    /// Emission order is strict: one `metadata` chunk, zero-or-more `content`
    /// chunks, then exactly one terminal `done` or `error`. Failures are
    /// delivered as the terminal `error` chunk, never by dropping the
    /// channel mid-stream. When the receiver is dropped the producer stops
    /// without writing the usage record.
    pub fn process_turn_streaming(
        self: Arc<Self>,
        user_id: String,
        request: ChatTurnRequest,
        request_id: Option<String>,
    ) -> mpsc::Receiver<TurnStreamChunk> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            if let Err(error) = self.stream_turn(&user_id, &request, request_id, &tx).await {
                // Terminal error chunk; a closed channel means the client is
                // gone and there is nobody left to tell
                let _ = tx.send(TurnStreamChunk::from_error(&error)).await;
            }
        });
        rx
    }

    #[instrument(skip(self, request, tx), fields(user_id = %user_id))]
    async fn stream_turn(
        &self,
        user_id: &str,
        request: &ChatTurnRequest,
        request_id: Option<String>,
        tx: &mpsc::Sender<TurnStreamChunk>,
    ) -> AppResult<()> {
        request.validate()?;
        let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        if self.usage.check_idempotency(&request_id).await? {
            return Err(AppError::conflict(&request_id));
        }

        let result = self.stream_claimed(user_id, request, &request_id, tx).await;
        if result.is_err() {
            self.release_claim(&request_id).await;
        }
        result
    }

    async fn stream_claimed(
        &self,
        user_id: &str,
        request: &ChatTurnRequest,
        request_id: &str,
        tx: &mpsc::Sender<TurnStreamChunk>,
    ) -> AppResult<()> {
        let conversation = self.resolve_conversation(user_id, request).await?;
        let history = self.load_history(&conversation.id).await?;
        self.check_credits(user_id).await?;

        let outcome = self.call_provider(request, history, true).await?;
        self.persist_turn(user_id, &conversation, request, &outcome)
            .await?;

        let metadata = TurnStreamChunk::Metadata(StreamMetadata {
            conversation_id: conversation.id.clone(),
            request_id: request_id.to_owned(),
            model: outcome.model.clone(),
            provider: outcome.provider,
        });
        if tx.send(metadata).await.is_err() {
            warn!(request_id = %request_id, "client disconnected before metadata");
            return Ok(());
        }

        for piece in rechunk(&outcome.content, STREAM_CHUNK_CHARS) {
            if tx.send(TurnStreamChunk::Content(piece)).await.is_err() {
                warn!(request_id = %request_id, "client disconnected mid-stream");
                return Ok(());
            }
        }

        self.emit_usage(user_id, &conversation.id, request_id, &outcome)
            .await?;

        let done = TurnStreamChunk::Done(StreamCompletion {
            tokens_in: outcome.tokens_in,
            tokens_out: outcome.tokens_out,
        });
        let _ = tx.send(done).await;
        Ok(())
    }

    // ========================================================================
    // Shared steps
    // ========================================================================

    async fn resolve_conversation(
        &self,
        user_id: &str,
        request: &ChatTurnRequest,
    ) -> AppResult<Conversation> {
        match &request.conversation_id {
            Some(id) => self
                .conversations
                .find_unique(user_id, id)
                .await?
                .ok_or_else(|| AppError::not_found("Conversation")),
            None => {
                let title = title_seed(&request.content);
                self.conversations.create(user_id, title).await
            }
        }
    }

    async fn load_history(&self, conversation_id: &str) -> AppResult<Vec<ChatMessage>> {
        let stored = self.messages.find_many(conversation_id).await?;
        Ok(stored
            .into_iter()
            .map(|m| ChatMessage::new(m.role.into(), m.content))
            .collect())
    }

    async fn check_credits(&self, user_id: &str) -> AppResult<()> {
        self.credits.ensure_initial_credits(user_id).await?;
        let check = self
            .credits
            .check_credits(user_id, ESTIMATED_TURN_COST)
            .await?;
        if !check.sufficient {
            return Err(AppError::insufficient_credits(
                ESTIMATED_TURN_COST,
                check.available,
            ));
        }
        Ok(())
    }

    /// ProviderCall step: explicit request fields take precedence, otherwise
    /// the turn is fusion-routed
    async fn call_provider(
        &self,
        request: &ChatTurnRequest,
        history: Vec<ChatMessage>,
        stream: bool,
    ) -> AppResult<TurnOutcome> {
        if request.provider.is_some() || request.model.is_some() {
            return self.call_explicit(request, history, stream).await;
        }

        let options = FusionOptions {
            history,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
            ..FusionOptions::default()
        };
        let outcome = self.fusion.process(&request.content, &options).await?;
        Ok(TurnOutcome {
            content: outcome.answer,
            model: outcome.model_used,
            provider: outcome.provider,
            tokens_in: outcome.tokens_in,
            tokens_out: outcome.tokens_out,
            intent: Some(outcome.intent),
        })
    }

    async fn call_explicit(
        &self,
        request: &ChatTurnRequest,
        history: Vec<ChatMessage>,
        stream: bool,
    ) -> AppResult<TurnOutcome> {
        let kind = match request.provider {
            Some(kind) => kind,
            None => self
                .registry
                .default_provider()
                .map(|(kind, _)| kind)
                .ok_or_else(|| {
                    AppError::new(
                        crate::errors::ErrorCode::ProviderUnavailable,
                        "No provider is configured",
                    )
                })?,
        };
        let adapter = self.registry.get(kind)?;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| adapter.default_model().to_owned());

        let mut messages = history;
        messages.push(ChatMessage::user(&request.content));

        let mut chat_request = ChatRequest::new(messages).with_model(model);
        if let Some(temperature) = request.temperature {
            chat_request = chat_request.with_temperature(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            chat_request = chat_request.with_max_tokens(max_tokens);
        }
        if stream {
            chat_request = chat_request.with_streaming();
        }

        let response = self.registry.chat(kind, &chat_request).await?;
        Ok(TurnOutcome {
            content: response.content,
            model: response.model,
            provider: kind,
            tokens_in: response.usage.prompt_tokens,
            tokens_out: response.usage.completion_tokens,
            intent: None,
        })
    }

    /// Persist step: user message, then assistant message, then a best-effort
    /// timestamp touch whose failure is swallowed
    async fn persist_turn(
        &self,
        user_id: &str,
        conversation: &Conversation,
        request: &ChatTurnRequest,
        outcome: &TurnOutcome,
    ) -> AppResult<()> {
        self.messages
            .create(NewMessage::user(&conversation.id, &request.content))
            .await?;
        self.messages
            .create(NewMessage::assistant(
                &conversation.id,
                &outcome.content,
                &outcome.model,
                outcome.provider,
                outcome.tokens_in,
                outcome.tokens_out,
            ))
            .await?;

        if let Err(error) = self.conversations.touch(user_id, &conversation.id).await {
            warn!(conversation_id = %conversation.id, %error, "conversation touch failed");
        }
        Ok(())
    }

    /// Hand the idempotency key back after a failed turn so the caller can
    /// retry with it; release failures are logged, not surfaced
    async fn release_claim(&self, request_id: &str) {
        if let Err(error) = self.usage.release_idempotency(request_id).await {
            warn!(request_id = %request_id, %error, "failed to release idempotency claim");
        }
    }

    async fn emit_usage(
        &self,
        user_id: &str,
        conversation_id: &str,
        request_id: &str,
        outcome: &TurnOutcome,
    ) -> AppResult<()> {
        self.usage
            .record_usage_event(UsageEvent {
                user_id: user_id.to_owned(),
                model: outcome.model.clone(),
                provider: outcome.provider,
                event_type: UsageEventType::ChatTurn,
                tokens_in: outcome.tokens_in,
                tokens_out: outcome.tokens_out,
                cost: None,
                request_id: request_id.to_owned(),
                conversation_id: Some(conversation_id.to_owned()),
                agent_id: None,
                recorded_at: chrono::Utc::now(),
            })
            .await
    }
}

/// Seed a conversation title from the first turn's opening characters
fn title_seed(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(TITLE_SEED_CHARS).collect())
}

/// Split assembled content into fixed-size pieces on char boundaries
fn rechunk(content: &str, chunk_chars: usize) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();
    chars
        .chunks(chunk_chars.max(1))
        .map(|piece| piece.iter().collect())
        .collect()
}
