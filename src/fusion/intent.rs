// ABOUTME: Closed set of intent categories and the classification result type
// ABOUTME: Nine labels covering the query kinds the selector knows how to route
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Closed set of query intent categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Writing, reviewing, or debugging code
    CodeDevelopment,
    /// Fiction, copywriting, poetry
    CreativeWriting,
    /// Working with structured data, statistics, charts
    DataAnalysis,
    /// Fact-finding and literature-style research
    Research,
    /// Translating between natural languages
    Translation,
    /// Condensing documents or threads
    Summarization,
    /// Mathematical reasoning and computation
    Math,
    /// Planning, strategy, and business analysis
    BusinessStrategy,
    /// General open-ended conversation (also the safe default)
    Conversation,
}

impl Intent {
    /// All intent categories
    pub const ALL: &'static [Self] = &[
        Self::CodeDevelopment,
        Self::CreativeWriting,
        Self::DataAnalysis,
        Self::Research,
        Self::Translation,
        Self::Summarization,
        Self::Math,
        Self::BusinessStrategy,
        Self::Conversation,
    ];

    /// Canonical label used in classification prompts and wire payloads
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CodeDevelopment => "code_development",
            Self::CreativeWriting => "creative_writing",
            Self::DataAnalysis => "data_analysis",
            Self::Research => "research",
            Self::Translation => "translation",
            Self::Summarization => "summarization",
            Self::Math => "math",
            Self::BusinessStrategy => "business_strategy",
            Self::Conversation => "conversation",
        }
    }
}

impl Display for Intent {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a user query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentClassification {
    /// The classified intent category
    pub intent: Intent,
    /// Classifier confidence in the label (0.0 - 1.0)
    pub confidence: f64,
    /// Optional finer-grained label within the category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
}

impl IntentClassification {
    /// The safe default returned when classification fails entirely
    #[must_use]
    pub const fn fallback() -> Self {
        Self {
            intent: Intent::Conversation,
            confidence: 0.5,
            sub_category: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nine_categories() {
        assert_eq!(Intent::ALL.len(), 9);
    }

    #[test]
    fn test_serde_labels_match_as_str() {
        for &intent in Intent::ALL {
            let json = serde_json::to_string(&intent).unwrap();
            assert_eq!(json, format!("\"{}\"", intent.as_str()));
        }
    }

    #[test]
    fn test_fallback_is_conversation() {
        let fallback = IntentClassification::fallback();
        assert_eq!(fallback.intent, Intent::Conversation);
        assert!((fallback.confidence - 0.5).abs() < f64::EPSILON);
    }
}
