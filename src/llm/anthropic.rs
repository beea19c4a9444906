// ABOUTME: Anthropic messages adapter with x-api-key auth and top-level system prompt
// ABOUTME: Maps the content-block response shape into the canonical ChatResponse
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

//! # Anthropic Provider
//!
//! Implementation of the [`LlmProvider`] trait for the Anthropic messages API.
//! The wire format differs from the `OpenAI` shape in three ways this adapter
//! owns: authentication uses `x-api-key` plus an `anthropic-version` header,
//! system messages are hoisted into a top-level `system` field, and the
//! response carries content blocks instead of choices.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

use super::sse_parser::{send_with_retry, RetryConfig};
use super::{ChatRequest, ChatResponse, LlmProvider, MessageRole, TokenUsage};
use crate::config::ProviderCredentials;
use crate::errors::AppError;

const PROVIDER_NAME: &str = "anthropic";

/// Default model to use
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Available Anthropic models
const AVAILABLE_MODELS: &[&str] = &[
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
    "claude-3-opus-20240229",
];

/// Base URL for the Anthropic API
const API_BASE_URL: &str = "https://api.anthropic.com/v1";

/// API version header required by Anthropic
const API_VERSION: &str = "2023-06-01";

/// Default completion budget; the messages API requires `max_tokens`
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Anthropic LLM provider
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl AnthropicProvider {
    /// Create a provider from a credential tuple
    #[must_use]
    pub fn new(credentials: &ProviderCredentials) -> Self {
        Self {
            client: Client::new(),
            api_key: credentials.api_key.clone(),
            base_url: credentials
                .base_url
                .clone()
                .unwrap_or_else(|| API_BASE_URL.to_owned()),
            timeout: Duration::from_secs(credentials.timeout_secs),
            retry: RetryConfig::with_max_retries(credentials.max_retries),
        }
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }

    /// Split system messages out of the conversation; Anthropic takes them
    /// as a top-level field, not in the messages array
    fn split_messages(request: &ChatRequest) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts = Vec::new();
        let mut messages = Vec::with_capacity(request.messages.len());

        for msg in &request.messages {
            match msg.role {
                MessageRole::System => system_parts.push(msg.content.clone()),
                role => messages.push(AnthropicMessage {
                    role: role.as_str().to_owned(),
                    content: msg.content.clone(),
                }),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, messages)
    }

    fn parse_error_response(status: u16, body: &str) -> AppError {
        let message = serde_json::from_str::<AnthropicErrorResponse>(body)
            .map_or_else(|_| body.chars().take(200).collect::<String>(), |e| e.error.message);
        AppError::provider_http_error(PROVIDER_NAME, status, message)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn default_model(&self) -> &'static str {
        DEFAULT_MODEL
    }

    fn available_models(&self) -> &'static [&'static str] {
        AVAILABLE_MODELS
    }

    #[instrument(skip(self, request), fields(model = %request.model.as_deref().unwrap_or(DEFAULT_MODEL)))]
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        let model = request.model.as_deref().unwrap_or(DEFAULT_MODEL);

        debug!("sending messages request to Anthropic");

        let (system, messages) = Self::split_messages(request);

        let api_request = AnthropicRequest {
            model: model.to_owned(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            temperature: request.temperature,
        };

        let builder = self
            .client
            .post(self.api_url("messages"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&api_request);

        let response = send_with_retry(builder, &self.retry, self.timeout, PROVIDER_NAME).await?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            error!("failed to read Anthropic response: {e}");
            AppError::provider_error(PROVIDER_NAME, format!("failed to read response: {e}"))
        })?;

        if !(200..300).contains(&status) {
            return Err(Self::parse_error_response(status, &body));
        }

        let raw: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
        let api_response: AnthropicResponse = serde_json::from_str(&body).map_err(|e| {
            AppError::provider_error(PROVIDER_NAME, format!("failed to parse response: {e}"))
        })?;

        let content: String = api_response
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .collect();

        debug!(
            chars = content.len(),
            stop_reason = ?api_response.stop_reason,
            "received response from Anthropic"
        );

        Ok(ChatResponse {
            content,
            model: api_response.model,
            provider: PROVIDER_NAME.to_owned(),
            usage: TokenUsage::new(
                api_response.usage.input_tokens,
                api_response.usage.output_tokens,
            ),
            finish_reason: api_response.stop_reason,
            raw,
        })
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<bool, AppError> {
        let response = self
            .client
            .get(self.api_url("models"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                AppError::provider_error(PROVIDER_NAME, format!("health check failed: {e}"))
            })?;

        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    #[test]
    fn test_system_messages_hoisted() {
        let request = ChatRequest::new(vec![
            ChatMessage::system("Be terse."),
            ChatMessage::user("Hello"),
            ChatMessage::assistant("Hi"),
        ]);

        let (system, messages) = AnthropicProvider::split_messages(&request);
        assert_eq!(system.as_deref(), Some("Be terse."));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
    }

    #[test]
    fn test_no_system_field_when_absent() {
        let request = ChatRequest::new(vec![ChatMessage::user("Hello")]);
        let (system, messages) = AnthropicProvider::split_messages(&request);
        assert!(system.is_none());
        assert_eq!(messages.len(), 1);
    }
}
