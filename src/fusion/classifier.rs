// ABOUTME: Intent classification and keyword extraction against a fixed cheap model
// ABOUTME: Degrades to a safe default on any failure; never propagates errors to callers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

//! # Intent Classifier
//!
//! Single-shot calls to a fixed low-temperature classification model with a
//! closed label set. The model is instructed to return strict JSON; parsing
//! attempts a direct parse first, then a fenced-code-block extraction, and on
//! total failure returns [`IntentClassification::fallback`]. Classification
//! never returns an error to its caller — a misrouted query is recoverable,
//! an aborted turn is not.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Intent, IntentClassification};
use crate::config::ProviderKind;
use crate::llm::{ChatMessage, ChatRequest, ProviderRegistry};

/// Temperature for classification calls; low for label stability
const CLASSIFICATION_TEMPERATURE: f32 = 0.1;

/// Token budget for classification responses; labels are tiny
const CLASSIFICATION_MAX_TOKENS: u32 = 200;

/// Fixed classification model per provider (cheapest deterministic option)
const fn classification_model(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAi => "gpt-4o-mini",
        ProviderKind::Anthropic => "claude-3-5-haiku-20241022",
        ProviderKind::Gemini => "gemini-2.0-flash-lite",
    }
}

/// Wire shape the classification prompt asks the model to emit
#[derive(Debug, Deserialize)]
struct RawClassification {
    intent: String,
    confidence: f64,
    #[serde(default)]
    sub_category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawKeywords {
    keywords: Vec<String>,
}

/// Classifies user queries into intent categories via a fixed cheap model
pub struct IntentClassifier {
    registry: Arc<ProviderRegistry>,
}

impl IntentClassifier {
    /// Create a classifier over the given registry
    ///
    /// The classification model is resolved per call against the first
    /// configured provider, so registry reconfiguration needs no classifier
    /// rebuild.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Classify a query into one of the nine intent categories
    ///
    /// Never fails: any error (no provider, upstream failure, unparseable
    /// output) degrades to the safe default `conversation` at confidence 0.5.
    pub async fn classify_intent(&self, query: &str) -> IntentClassification {
        let Some((kind, _)) = self.registry.default_provider() else {
            warn!("no provider configured for classification, using fallback");
            return IntentClassification::fallback();
        };

        let request = ChatRequest::new(vec![
            ChatMessage::system(Self::classification_prompt()),
            ChatMessage::user(query),
        ])
        .with_model(classification_model(kind))
        .with_temperature(CLASSIFICATION_TEMPERATURE)
        .with_max_tokens(CLASSIFICATION_MAX_TOKENS);

        match self.registry.chat(kind, &request).await {
            Ok(response) => Self::parse_classification(&response.content),
            Err(error) => {
                warn!(%error, "classification call failed, using fallback");
                IntentClassification::fallback()
            }
        }
    }

    /// Extract salient keywords from a query
    ///
    /// Returns an empty list on any failure.
    pub async fn extract_keywords(&self, query: &str) -> Vec<String> {
        let Some((kind, _)) = self.registry.default_provider() else {
            return Vec::new();
        };

        let request = ChatRequest::new(vec![
            ChatMessage::system(Self::keywords_prompt()),
            ChatMessage::user(query),
        ])
        .with_model(classification_model(kind))
        .with_temperature(CLASSIFICATION_TEMPERATURE)
        .with_max_tokens(CLASSIFICATION_MAX_TOKENS);

        match self.registry.chat(kind, &request).await {
            Ok(response) => Self::parse_keywords(&response.content),
            Err(error) => {
                warn!(%error, "keyword extraction failed, returning empty list");
                Vec::new()
            }
        }
    }

    fn classification_prompt() -> String {
        let labels: Vec<&str> = Intent::ALL.iter().map(|i| i.as_str()).collect();
        format!(
            "You are a query classifier. Classify the user's query into exactly one of \
             these categories: {}. Respond with strict JSON only, no prose: \
             {{\"intent\": \"<category>\", \"confidence\": <0.0-1.0>, \
             \"sub_category\": \"<optional finer label or null>\"}}",
            labels.join(", ")
        )
    }

    fn keywords_prompt() -> &'static str {
        "Extract up to 8 salient keywords from the user's query. Respond with strict \
         JSON only, no prose: {\"keywords\": [\"...\"]}"
    }

    /// Parse model output: direct JSON first, then fenced-code-block fallback
    fn parse_classification(content: &str) -> IntentClassification {
        let parsed = serde_json::from_str::<RawClassification>(content.trim())
            .ok()
            .or_else(|| {
                extract_fenced_json(content)
                    .and_then(|block| serde_json::from_str::<RawClassification>(&block).ok())
            });

        let Some(raw) = parsed else {
            warn!("classification output was not parseable JSON, using fallback");
            return IntentClassification::fallback();
        };

        let Some(intent) = Intent::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == raw.intent.trim().to_lowercase())
        else {
            warn!(label = %raw.intent, "classifier returned unknown label, using fallback");
            return IntentClassification::fallback();
        };

        debug!(%intent, confidence = raw.confidence, "query classified");

        IntentClassification {
            intent,
            confidence: raw.confidence.clamp(0.0, 1.0),
            sub_category: raw.sub_category.filter(|s| !s.trim().is_empty()),
        }
    }

    fn parse_keywords(content: &str) -> Vec<String> {
        serde_json::from_str::<RawKeywords>(content.trim())
            .ok()
            .or_else(|| {
                extract_fenced_json(content)
                    .and_then(|block| serde_json::from_str::<RawKeywords>(&block).ok())
            })
            .map(|raw| raw.keywords)
            .unwrap_or_default()
    }
}

/// Extract the body of the first fenced code block, tolerating a language tag
fn extract_fenced_json(content: &str) -> Option<String> {
    let start = content.find("```")?;
    let after_fence = &content[start + 3..];
    // Skip an optional language tag like "json" on the fence line
    let body_start = after_fence.find('\n').map_or(0, |pos| pos + 1);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_json_parse() {
        let result = IntentClassifier::parse_classification(
            r#"{"intent": "code_development", "confidence": 0.92}"#,
        );
        assert_eq!(result.intent, Intent::CodeDevelopment);
        assert!((result.confidence - 0.92).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fenced_block_fallback() {
        let content = "Here is the classification:\n```json\n{\"intent\": \"math\", \"confidence\": 0.8}\n```\nDone.";
        let result = IntentClassifier::parse_classification(content);
        assert_eq!(result.intent, Intent::Math);
    }

    #[test]
    fn test_garbage_degrades_to_fallback() {
        let result = IntentClassifier::parse_classification("I think this is about code?");
        assert_eq!(result.intent, Intent::Conversation);
        assert!((result.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_label_degrades_to_fallback() {
        let result = IntentClassifier::parse_classification(
            r#"{"intent": "interpretive_dance", "confidence": 0.99}"#,
        );
        assert_eq!(result.intent, Intent::Conversation);
    }

    #[test]
    fn test_confidence_clamped() {
        let result = IntentClassifier::parse_classification(
            r#"{"intent": "research", "confidence": 1.7}"#,
        );
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_keywords_parse_and_degrade() {
        assert_eq!(
            IntentClassifier::parse_keywords(r#"{"keywords": ["rust", "async"]}"#),
            vec!["rust".to_owned(), "async".to_owned()]
        );
        assert!(IntentClassifier::parse_keywords("not json").is_empty());
    }
}
