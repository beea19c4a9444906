// ABOUTME: OpenAI chat-completions adapter with bearer auth and usage passthrough
// ABOUTME: Normalizes upstream errors into the unified provider error taxonomy
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

//! # OpenAI Provider
//!
//! Implementation of the [`LlmProvider`] trait for the `OpenAI`
//! chat-completions API. The wire format is the canonical `messages` array
//! with string roles; usage is reported upstream and passed through.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

use super::sse_parser::{send_with_retry, RetryConfig};
use super::{
    estimate_prompt_tokens, estimate_tokens, ChatMessage, ChatRequest, ChatResponse, LlmProvider,
    TokenUsage,
};
use crate::config::ProviderCredentials;
use crate::errors::AppError;

const PROVIDER_NAME: &str = "openai";

/// Default model to use
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Available OpenAI models
const AVAILABLE_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4.1", "o3-mini"];

/// Base URL for the OpenAI API
const API_BASE_URL: &str = "https://api.openai.com/v1";

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for OpenAiMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().to_owned(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// `OpenAI` LLM provider
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl OpenAiProvider {
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

    /// Parse a non-success response body into a provider error
    fn parse_error_response(status: u16, body: &str) -> AppError {
        let message = serde_json::from_str::<OpenAiErrorResponse>(body)
            .map_or_else(|_| body.chars().take(200).collect::<String>(), |e| e.error.message);
        AppError::provider_http_error(PROVIDER_NAME, status, message)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
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

        debug!("sending chat completion request to OpenAI");

        let api_request = OpenAiRequest {
            model: model.to_owned(),
            messages: request.messages.iter().map(OpenAiMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let builder = self
            .client
            .post(self.api_url("chat/completions"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&api_request);

        let response = send_with_retry(builder, &self.retry, self.timeout, PROVIDER_NAME).await?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            error!("failed to read OpenAI response: {e}");
            AppError::provider_error(PROVIDER_NAME, format!("failed to read response: {e}"))
        })?;

        if !(200..300).contains(&status) {
            return Err(Self::parse_error_response(status, &body));
        }

        let raw: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
        let api_response: OpenAiResponse = serde_json::from_str(&body).map_err(|e| {
            AppError::provider_error(PROVIDER_NAME, format!("failed to parse response: {e}"))
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::provider_error(PROVIDER_NAME, "API returned no choices"))?;

        let content = choice.message.content.unwrap_or_default();

        let usage = api_response.usage.map_or_else(
            || {
                TokenUsage::new(
                    estimate_prompt_tokens(&request.messages),
                    estimate_tokens(&content),
                )
            },
            |u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            },
        );

        debug!(
            chars = content.len(),
            finish_reason = ?choice.finish_reason,
            "received response from OpenAI"
        );

        Ok(ChatResponse {
            content,
            model: api_response.model,
            provider: PROVIDER_NAME.to_owned(),
            usage,
            finish_reason: choice.finish_reason,
            raw,
        })
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<bool, AppError> {
        let response = self
            .client
            .get(self.api_url("models"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                AppError::provider_error(PROVIDER_NAME, format!("health check failed: {e}"))
            })?;

        Ok(response.status().is_success())
    }
}
