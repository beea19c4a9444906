// ABOUTME: Fusion pipeline: classify, extract keywords, select, prompt, dispatch
// ABOUTME: Strictly sequential steps with wall-clock timing for observability
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

use super::prompts::build_system_prompt;
use super::{select_best_model, ExpertiseLevel, Intent, IntentClassifier, SelectionPreferences};
use crate::config::ProviderKind;
use crate::errors::AppResult;
use crate::llm::{ChatMessage, ChatRequest, ProviderRegistry};

/// Options for a fusion-routed turn
#[derive(Debug, Clone, Default)]
pub struct FusionOptions {
    /// Caller preferences fed to the model selector
    pub preferences: SelectionPreferences,
    /// Prior conversation turns, oldest first
    pub history: Vec<ChatMessage>,
    /// Expertise level tuning the system prompt tone
    pub expertise: ExpertiseLevel,
    /// Sampling temperature forwarded to the provider
    pub temperature: Option<f32>,
    /// Completion token budget forwarded to the provider
    pub max_tokens: Option<u32>,
    /// Ask the adapter to consume its upstream in streaming mode
    ///
    /// The outcome is still one assembled answer; caller-facing chunking is
    /// the transport layer's job.
    pub stream: bool,
}

/// Result of a fusion-routed turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionOutcome {
    /// The assistant's answer
    pub answer: String,
    /// Model that produced the answer
    pub model_used: String,
    /// Provider that served the model
    pub provider: ProviderKind,
    /// Classified intent category
    pub intent: Intent,
    /// Classifier confidence in the intent label
    pub confidence: f64,
    /// Wall-clock duration of the whole pipeline; observability only
    pub processing_time_ms: u64,
    /// Prompt tokens consumed
    pub tokens_in: u32,
    /// Completion tokens produced
    pub tokens_out: u32,
}

/// Runs the fusion routing pipeline end to end
pub struct FusionOrchestrator {
    registry: Arc<ProviderRegistry>,
    classifier: IntentClassifier,
}

impl FusionOrchestrator {
    /// Create an orchestrator over the given registry
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        let classifier = IntentClassifier::new(Arc::clone(&registry));
        Self {
            registry,
            classifier,
        }
    }

    /// Process a query through the full fusion pipeline
    ///
    /// Steps run strictly in sequence: classify, extract keywords, select the
    /// model, build the system prompt, dispatch. The measured duration covers
    /// entry to completion and drives no control flow.
    ///
    /// # Errors
    ///
    /// Returns selection errors (no provider configured) and normalized
    /// provider errors from the dispatch call. Classification and keyword
    /// failures degrade internally and never surface here.
    #[instrument(skip(self, query, options), fields(query_chars = query.chars().count()))]
    pub async fn process(&self, query: &str, options: &FusionOptions) -> AppResult<FusionOutcome> {
        let started = Instant::now();

        let classification = self.classifier.classify_intent(query).await;
        let keywords = self.classifier.extract_keywords(query).await;

        let choice = select_best_model(
            classification.intent,
            query,
            &options.preferences,
            &self.registry,
        )?;

        let system_prompt =
            build_system_prompt(classification.intent, &keywords, options.expertise);

        let mut messages = Vec::with_capacity(options.history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(options.history.iter().cloned());
        messages.push(ChatMessage::user(query));

        let mut request = ChatRequest::new(messages).with_model(choice.model.clone());
        if let Some(temperature) = options.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        if options.stream {
            request = request.with_streaming();
        }

        let response = self.registry.chat(choice.provider, &request).await?;
        let processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            intent = %classification.intent,
            model = %response.model,
            provider = %choice.provider,
            processing_time_ms,
            "fusion turn complete"
        );

        Ok(FusionOutcome {
            answer: response.content,
            model_used: response.model,
            provider: choice.provider,
            intent: classification.intent,
            confidence: classification.confidence,
            processing_time_ms,
            tokens_in: response.usage.prompt_tokens,
            tokens_out: response.usage.completion_tokens,
        })
    }
}
