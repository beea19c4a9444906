// ABOUTME: API wire types: chat turn request/response, usage events, stream chunks
// ABOUTME: Request validation lives here so routes and services share one gate
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ProviderKind;
use crate::errors::{AppError, AppResult};
use crate::fusion::Intent;

// ============================================================================
// Chat turn request / response
// ============================================================================

/// A single chat turn submitted by a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnRequest {
    /// Existing conversation to append to; absent means "start a new one"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// The user's message
    pub content: String,
    /// Explicit model choice; absent defers to fusion routing or defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Explicit provider choice; absent defers to fusion routing or defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    /// Sampling temperature, 0.0 to 2.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Completion token budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Request a streamed response
    #[serde(default)]
    pub stream: bool,
}

impl ChatTurnRequest {
    /// Validate the request shape
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for empty content, an out-of-range
    /// temperature, a zero token budget, or a malformed conversation id.
    pub fn validate(&self) -> AppResult<()> {
        if self.content.trim().is_empty() {
            return Err(AppError::validation("content must not be empty"));
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(AppError::validation(format!(
                    "temperature must be between 0.0 and 2.0, got {temperature}"
                )));
            }
        }
        if let Some(max_tokens) = self.max_tokens {
            if max_tokens == 0 {
                return Err(AppError::validation("maxTokens must be greater than zero"));
            }
        }
        if let Some(id) = &self.conversation_id {
            if !is_valid_resource_id(id) {
                return Err(AppError::validation(format!(
                    "conversationId is not a valid resource id: {id}"
                )));
            }
        }
        Ok(())
    }
}

/// Opaque resource ids: non-empty, ASCII alphanumeric plus `-` and `_`, at
/// most 64 characters
fn is_valid_resource_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Blocking response to a chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnResponse {
    /// Conversation the turn was appended to (created lazily if needed)
    pub conversation_id: String,
    /// Idempotency key generated for (or supplied with) this turn
    pub request_id: String,
    /// The assistant's answer
    pub content: String,
    /// Model that produced the answer
    pub model: String,
    /// Provider that served the model
    pub provider: ProviderKind,
    /// Prompt tokens consumed
    pub tokens_in: u32,
    /// Completion tokens produced
    pub tokens_out: u32,
    /// Intent label when the turn was fusion-routed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
}

// ============================================================================
// Usage events
// ============================================================================

/// What kind of metered activity a usage event records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageEventType {
    /// A completed chat turn
    ChatTurn,
}

/// A metered usage record; `request_id` is the idempotency key
///
/// Monetary cost is not computed here. The billing job prices the event and
/// performs the authoritative credit debit, keyed by the same `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    /// Caller the usage is billed to
    pub user_id: String,
    /// Model that served the turn
    pub model: String,
    /// Provider that served the model
    pub provider: ProviderKind,
    /// Kind of activity
    #[serde(rename = "type")]
    pub event_type: UsageEventType,
    /// Prompt tokens consumed
    pub tokens_in: u32,
    /// Completion tokens produced
    pub tokens_out: u32,
    /// Monetary cost in credits; absent until the billing job prices the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    /// Idempotency key; at most one side-effecting execution per key
    pub request_id: String,
    /// Conversation the turn belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Agent that drove the turn, when one was involved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// When the event was recorded
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// Stream chunks
// ============================================================================

/// Metadata emitted at the head of a stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    /// Conversation the turn was appended to
    pub conversation_id: String,
    /// Idempotency key for this turn
    pub request_id: String,
    /// Model serving the turn
    pub model: String,
    /// Provider serving the model
    pub provider: ProviderKind,
}

/// Final summary emitted as the stream's terminal `done` chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamCompletion {
    /// Prompt tokens consumed
    pub tokens_in: u32,
    /// Completion tokens produced
    pub tokens_out: u32,
}

/// A typed chunk in a streamed chat turn
///
/// Serialized as `{"type": ..., "data": ...}`. Emission order is strict:
/// one `metadata`, then zero-or-more `content`, then exactly one terminal
/// `done` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum TurnStreamChunk {
    /// Turn metadata, emitted before any content
    Metadata(StreamMetadata),
    /// A piece of assistant output
    Content(String),
    /// Successful terminal chunk
    Done(StreamCompletion),
    /// Failed terminal chunk; carries the error code and message
    Error { code: String, message: String },
}

impl TurnStreamChunk {
    /// Build an error chunk from an application error
    #[must_use]
    pub fn from_error(error: &AppError) -> Self {
        Self::Error {
            code: serde_json::to_value(error.code)
                .ok()
                .and_then(|v| v.as_str().map(ToOwned::to_owned))
                .unwrap_or_else(|| "INTERNAL_ERROR".to_owned()),
            message: error.message.clone(),
        }
    }

    /// Whether this chunk terminates the stream
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    fn request(content: &str) -> ChatTurnRequest {
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

    #[test]
    fn test_empty_content_rejected() {
        let error = request("   ").validate().unwrap_err();
        assert_eq!(error.code, ErrorCode::ValidationError);
    }

    #[test]
    fn test_temperature_range_enforced() {
        let mut req = request("hi");
        req.temperature = Some(2.5);
        assert!(req.validate().is_err());
        req.temperature = Some(2.0);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_zero_max_tokens_rejected() {
        let mut req = request("hi");
        req.max_tokens = Some(0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_conversation_id_shape() {
        let mut req = request("hi");
        req.conversation_id = Some("conv_abc-123".into());
        assert!(req.validate().is_ok());
        req.conversation_id = Some("has spaces!".into());
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_stream_chunk_wire_shape() {
        let chunk = TurnStreamChunk::Content("hel".into());
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "content");
        assert_eq!(json["data"], "hel");

        let done = TurnStreamChunk::Done(StreamCompletion {
            tokens_in: 10,
            tokens_out: 5,
        });
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["data"]["tokensOut"], 5);
        assert!(done.is_terminal());
    }

    #[test]
    fn test_error_chunk_carries_code() {
        let error = AppError::insufficient_credits(10.0, 2.5);
        let chunk = TurnStreamChunk::from_error(&error);
        match &chunk {
            TurnStreamChunk::Error { code, .. } => assert_eq!(code, "INSUFFICIENT_CREDITS"),
            other => panic!("expected error chunk, got {other:?}"),
        }
        assert!(chunk.is_terminal());
    }

    #[test]
    fn test_request_accepts_camel_case_wire() {
        let req: ChatTurnRequest = serde_json::from_str(
            r#"{"content": "hi", "maxTokens": 100, "conversationId": "c1", "stream": true}"#,
        )
        .unwrap();
        assert_eq!(req.max_tokens, Some(100));
        assert_eq!(req.conversation_id.as_deref(), Some("c1"));
        assert!(req.stream);
    }
}
