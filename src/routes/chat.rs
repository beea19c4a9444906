// ABOUTME: Chat route handlers: blocking JSON turn, SSE streaming turn
// ABOUTME: Plus owner-scoped conversation CRUD and the credit balance endpoint
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

//! Chat routes
//!
//! `POST /api/chat` runs a blocking turn and returns one JSON payload.
//! `POST /api/chat/stream` runs the same turn through the streaming variant:
//! each chunk is written as `data: {"type": ..., "data": ...}\n\n` and the
//! stream always terminates with a literal `data: [DONE]` after the terminal
//! chunk, including on failure. Conversation CRUD and the credit balance
//! endpoint are thin wrappers over the injected stores.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post, put},
    Json, Router,
};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use tracing::warn;

use super::{enforce_rate_limit, require_user_id, GatewayState};
use crate::errors::AppError;
use crate::models::{ChatTurnRequest, ChatTurnResponse, TurnStreamChunk};
use crate::store::{Conversation, StoredMessage};

/// Literal frame terminating every SSE stream
const SSE_DONE_FRAME: &str = "[DONE]";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to rename a conversation
#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    /// New title; null clears it
    pub title: Option<String>,
}

/// Response for listing conversations
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<Conversation>,
    pub total: usize,
}

/// Response for listing a conversation's messages
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageListResponse {
    pub messages: Vec<StoredMessage>,
    pub total: usize,
}

/// Response for the credit balance endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct CreditBalanceResponse {
    pub credits: f64,
}

// ============================================================================
// Chat Routes
// ============================================================================

/// Chat routes handler
pub struct ChatRoutes;

impl ChatRoutes {
    /// Create all chat routes
    pub fn routes(state: Arc<GatewayState>) -> Router {
        Router::new()
            // Turns
            .route("/api/chat", post(Self::chat_turn))
            .route("/api/chat/stream", post(Self::chat_turn_stream))
            // Conversation management
            .route("/api/chat/conversations", get(Self::list_conversations))
            .route(
                "/api/chat/conversations/:conversation_id",
                get(Self::get_conversation),
            )
            .route(
                "/api/chat/conversations/:conversation_id",
                put(Self::update_conversation),
            )
            .route(
                "/api/chat/conversations/:conversation_id",
                delete(Self::delete_conversation),
            )
            .route(
                "/api/chat/conversations/:conversation_id/messages",
                get(Self::get_messages),
            )
            // Metering
            .route("/api/credits", get(Self::get_credits))
            .with_state(state)
    }

    /// Run a blocking chat turn
    async fn chat_turn(
        State(state): State<Arc<GatewayState>>,
        headers: HeaderMap,
        Json(request): Json<ChatTurnRequest>,
    ) -> Result<Json<ChatTurnResponse>, AppError> {
        let user_id = require_user_id(&headers)?;
        enforce_rate_limit(&state, &user_id).await?;

        let request_id = request_id_from_headers(&headers);
        let response = state
            .orchestration
            .process_turn(&user_id, &request, request_id)
            .await?;
        Ok(Json(response))
    }

    /// Run a streaming chat turn over SSE
    ///
    /// Failures inside the turn arrive as a terminal `error` chunk followed
    /// by `[DONE]`; only pre-turn failures (identity, rate limit) return a
    /// JSON error response instead of a stream.
    async fn chat_turn_stream(
        State(state): State<Arc<GatewayState>>,
        headers: HeaderMap,
        Json(request): Json<ChatTurnRequest>,
    ) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
        let user_id = require_user_id(&headers)?;
        enforce_rate_limit(&state, &user_id).await?;

        let request_id = request_id_from_headers(&headers);
        let mut chunks = Arc::clone(&state.orchestration).process_turn_streaming(
            user_id,
            request,
            request_id,
        );

        let stream = async_stream::stream! {
            while let Some(chunk) = chunks.recv().await {
                let terminal = chunk.is_terminal();
                match serde_json::to_string(&chunk) {
                    Ok(json) => yield Ok(Event::default().data(json)),
                    Err(error) => {
                        warn!(%error, "failed to serialize stream chunk");
                        let fallback = TurnStreamChunk::from_error(&AppError::internal(
                            "failed to serialize stream chunk",
                        ));
                        if let Ok(json) = serde_json::to_string(&fallback) {
                            yield Ok(Event::default().data(json));
                        }
                        break;
                    }
                }
                if terminal {
                    break;
                }
            }
            yield Ok(Event::default().data(SSE_DONE_FRAME));
        };

        Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
    }

    /// List the caller's conversations, most recently updated first
    async fn list_conversations(
        State(state): State<Arc<GatewayState>>,
        headers: HeaderMap,
    ) -> Result<Json<ConversationListResponse>, AppError> {
        let user_id = require_user_id(&headers)?;
        let conversations = state.conversations.find_many(&user_id).await?;
        let total = conversations.len();
        Ok(Json(ConversationListResponse {
            conversations,
            total,
        }))
    }

    /// Fetch one conversation, owner-scoped
    async fn get_conversation(
        State(state): State<Arc<GatewayState>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
    ) -> Result<Json<Conversation>, AppError> {
        let user_id = require_user_id(&headers)?;
        let conversation = state
            .conversations
            .find_unique(&user_id, &conversation_id)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation"))?;
        Ok(Json(conversation))
    }

    /// Rename a conversation
    async fn update_conversation(
        State(state): State<Arc<GatewayState>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
        Json(request): Json<UpdateConversationRequest>,
    ) -> Result<Json<Conversation>, AppError> {
        let user_id = require_user_id(&headers)?;
        let conversation = state
            .conversations
            .update(&user_id, &conversation_id, request.title)
            .await?;
        Ok(Json(conversation))
    }

    /// Delete a conversation
    async fn delete_conversation(
        State(state): State<Arc<GatewayState>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
    ) -> Result<Json<serde_json::Value>, AppError> {
        let user_id = require_user_id(&headers)?;
        state
            .conversations
            .delete(&user_id, &conversation_id)
            .await?;
        Ok(Json(serde_json::json!({ "deleted": conversation_id })))
    }

    /// List a conversation's messages in creation order
    async fn get_messages(
        State(state): State<Arc<GatewayState>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
    ) -> Result<Json<MessageListResponse>, AppError> {
        let user_id = require_user_id(&headers)?;
        // Ownership check before touching the message store
        state
            .conversations
            .find_unique(&user_id, &conversation_id)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation"))?;

        let messages = state.messages.find_many(&conversation_id).await?;
        let total = messages.len();
        Ok(Json(MessageListResponse { messages, total }))
    }

    /// Current credit balance for the caller
    async fn get_credits(
        State(state): State<Arc<GatewayState>>,
        headers: HeaderMap,
    ) -> Result<Json<CreditBalanceResponse>, AppError> {
        let user_id = require_user_id(&headers)?;
        state.credits.ensure_initial_credits(&user_id).await?;
        let credits = state.credits.get_credits(&user_id).await?;
        Ok(Json(CreditBalanceResponse { credits }))
    }
}

/// Optional client-supplied idempotency key
fn request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
}
