// ABOUTME: Google Gemini adapter with assistant-to-model role remapping
// ABOUTME: Decodes the upstream SSE stream internally and returns one assembled response
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

//! # Gemini Provider
//!
//! Implementation of the [`LlmProvider`] trait for the Google Gemini
//! `generateContent` API. Wire-format quirks owned here:
//!
//! - conversation roles are remapped: `assistant` becomes `model`
//! - system messages are hoisted into the `systemInstruction` field
//! - when the caller requests streaming, the adapter consumes the upstream
//!   `streamGenerateContent` SSE stream and assembles the deltas into one
//!   [`ChatResponse`] — chunking toward the caller is the orchestration
//!   layer's job, not this adapter's
//! - usage metadata is optional upstream, so absent counts are estimated
//!   deterministically

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use super::sse_parser::{send_with_retry, RetryConfig, SseEvent, SseLineBuffer};
use super::{
    estimate_prompt_tokens, estimate_tokens, ChatRequest, ChatResponse, LlmProvider, MessageRole,
    TokenUsage,
};
use crate::config::ProviderCredentials;
use crate::errors::AppError;

const PROVIDER_NAME: &str = "gemini";

/// Default model to use
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Available Gemini models
const AVAILABLE_MODELS: &[&str] = &[
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
    "gemini-1.5-pro",
];

/// Base URL for the Gemini API
const API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<ContentPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    candidates: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Google Gemini LLM provider
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl GeminiProvider {
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

    fn build_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{model}:{method}?key={}",
            self.base_url, self.api_key
        )
    }

    /// Convert our message role to Gemini's role vocabulary
    ///
    /// System messages are handled separately via `systemInstruction`, so only
    /// `user` and `model` appear in the contents array.
    const fn convert_role(role: MessageRole) -> &'static str {
        match role {
            MessageRole::Assistant => "model",
            MessageRole::User | MessageRole::System => "user",
        }
    }

    fn build_request(request: &ChatRequest) -> GeminiRequest {
        let mut system_instruction = None;
        let mut contents = Vec::with_capacity(request.messages.len());

        for message in &request.messages {
            if message.role == MessageRole::System {
                system_instruction = Some(GeminiContent {
                    role: None,
                    parts: vec![ContentPart {
                        text: message.content.clone(),
                    }],
                });
            } else {
                contents.push(GeminiContent {
                    role: Some(Self::convert_role(message.role).to_owned()),
                    parts: vec![ContentPart {
                        text: message.content.clone(),
                    }],
                });
            }
        }

        let generation_config = if request.temperature.is_some() || request.max_tokens.is_some() {
            Some(GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            })
        } else {
            None
        };

        GeminiRequest {
            contents,
            system_instruction,
            generation_config,
        }
    }

    fn parse_error_response(status: u16, body: &str) -> AppError {
        let message = serde_json::from_str::<GeminiErrorResponse>(body)
            .map_or_else(|_| body.chars().take(200).collect::<String>(), |e| e.error.message);
        AppError::provider_http_error(PROVIDER_NAME, status, message)
    }

    fn assemble_response(
        &self,
        request: &ChatRequest,
        model: &str,
        content: String,
        finish_reason: Option<String>,
        usage_metadata: Option<&UsageMetadata>,
        raw: serde_json::Value,
    ) -> ChatResponse {
        // Upstream may omit usage metadata entirely; estimate so metering
        // never sees zero for non-empty output
        let usage = usage_metadata.map_or_else(
            || {
                TokenUsage::new(
                    estimate_prompt_tokens(&request.messages),
                    estimate_tokens(&content),
                )
            },
            |metadata| {
                TokenUsage::new(
                    metadata
                        .prompt
                        .unwrap_or_else(|| estimate_prompt_tokens(&request.messages)),
                    metadata
                        .candidates
                        .unwrap_or_else(|| estimate_tokens(&content)),
                )
            },
        );

        ChatResponse {
            content,
            model: model.to_owned(),
            provider: PROVIDER_NAME.to_owned(),
            usage,
            finish_reason,
            raw,
        }
    }

    /// Non-streaming path: one `generateContent` call
    async fn complete_buffered(
        &self,
        request: &ChatRequest,
        model: &str,
    ) -> Result<ChatResponse, AppError> {
        let url = self.build_url(model, "generateContent");
        let builder = self.client.post(&url).json(&Self::build_request(request));

        let response = send_with_retry(builder, &self.retry, self.timeout, PROVIDER_NAME).await?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            error!("failed to read Gemini response: {e}");
            AppError::provider_error(PROVIDER_NAME, format!("failed to read response: {e}"))
        })?;

        if !(200..300).contains(&status) {
            return Err(Self::parse_error_response(status, &body));
        }

        let raw: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
        let api_response: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            AppError::provider_error(PROVIDER_NAME, format!("failed to parse response: {e}"))
        })?;

        let candidate = api_response
            .candidates
            .as_ref()
            .and_then(|c| c.first())
            .ok_or_else(|| AppError::provider_error(PROVIDER_NAME, "API returned no candidates"))?;

        let content: String = candidate
            .content
            .as_ref()
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default();
        let finish_reason = candidate.finish_reason.clone();

        Ok(self.assemble_response(
            request,
            model,
            content,
            finish_reason,
            api_response.usage_metadata.as_ref(),
            raw,
        ))
    }

    /// Streaming path: consume the upstream SSE stream and assemble it
    ///
    /// Gemini's event stream is decoded internally with the shared line
    /// buffer; the caller still receives exactly one assembled response.
    async fn complete_via_stream(
        &self,
        request: &ChatRequest,
        model: &str,
    ) -> Result<ChatResponse, AppError> {
        let url = self.build_url(model, "streamGenerateContent");
        let builder = self
            .client
            .post(&url)
            .query(&[("alt", "sse")])
            .json(&Self::build_request(request));

        let response = send_with_retry(builder, &self.retry, self.timeout, PROVIDER_NAME).await?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::parse_error_response(status, &body));
        }

        let mut byte_stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::new();
        let mut content = String::new();
        let mut finish_reason = None;
        let mut usage_metadata = None;

        let apply_event = |event: SseEvent,
                               content: &mut String,
                               finish_reason: &mut Option<String>,
                               usage_metadata: &mut Option<UsageMetadata>| {
            let SseEvent::Data(json_str) = event else {
                return;
            };
            match serde_json::from_str::<GeminiResponse>(&json_str) {
                Ok(partial) => {
                    if let Some(candidate) = partial.candidates.as_ref().and_then(|c| c.first()) {
                        if let Some(parts) = candidate.content.as_ref() {
                            for part in &parts.parts {
                                content.push_str(&part.text);
                            }
                        }
                        if candidate.finish_reason.is_some() {
                            finish_reason.clone_from(&candidate.finish_reason);
                        }
                    }
                    if partial.usage_metadata.is_some() {
                        *usage_metadata = partial.usage_metadata;
                    }
                }
                Err(e) => warn!(error = %e, "failed to parse Gemini stream chunk"),
            }
        };

        // The whole stream consumption shares one deadline with the request
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            let chunk = tokio::time::timeout_at(deadline, byte_stream.next())
                .await
                .map_err(|_| AppError::provider_timeout(PROVIDER_NAME, self.timeout.as_secs()))?;

            match chunk {
                Some(Ok(bytes)) => {
                    for event in buffer.feed(&bytes) {
                        apply_event(event, &mut content, &mut finish_reason, &mut usage_metadata);
                    }
                }
                Some(Err(e)) => {
                    return Err(AppError::provider_error(
                        PROVIDER_NAME,
                        format!("stream read error: {e}"),
                    ));
                }
                None => {
                    if let Some(event) = buffer.flush() {
                        apply_event(event, &mut content, &mut finish_reason, &mut usage_metadata);
                    }
                    break;
                }
            }
        }

        Ok(self.assemble_response(
            request,
            model,
            content,
            finish_reason,
            usage_metadata.as_ref(),
            serde_json::Value::Null,
        ))
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
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
        debug!(stream = request.stream, "sending request to Gemini");

        if request.stream {
            self.complete_via_stream(request, model).await
        } else {
            self.complete_buffered(request, model).await
        }
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<bool, AppError> {
        let url = format!("{}/models?key={}", self.base_url, self.api_key);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                AppError::provider_error(PROVIDER_NAME, format!("health check failed: {e}"))
            })?;

        Ok(response.status().is_success())
    }
}
