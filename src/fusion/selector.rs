// ABOUTME: Deterministic intent-to-model selection with curated candidate tables
// ABOUTME: Exact precedence: availability filter, preferred provider, cost, table order
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

//! # Model Selector
//!
//! Maps an intent (plus caller preferences and live provider availability) to
//! a concrete (model, provider) pair. The precedence order is a contract the
//! test suite verifies:
//!
//! 1. Look up the intent's ranked candidate list.
//! 2. Filter to candidates whose provider is configured.
//! 3. Empty filter result falls back to the first available provider's first
//!    model; no provider at all is a fatal "no available models" error.
//! 4. A surviving candidate from the caller's preferred provider wins.
//! 5. Else, a cost-sensitive caller gets the cheapest surviving candidate.
//! 6. Else, the first survivor wins (table order encodes curation).

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Intent;
use crate::config::ProviderKind;
use crate::errors::{AppError, AppResult};
use crate::llm::ProviderRegistry;

/// A concrete routing decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelChoice {
    /// Model identifier
    pub model: String,
    /// Provider that serves the model
    pub provider: ProviderKind,
}

/// Caller preferences influencing selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionPreferences {
    /// Prefer candidates from this provider when one survives filtering
    #[serde(default)]
    pub preferred_provider: Option<ProviderKind>,
    /// Prefer the cheapest surviving candidate
    #[serde(default)]
    pub cost_sensitive: bool,
}

/// Ranked candidate models per intent; order encodes curated preference
const fn intent_candidates(intent: Intent) -> &'static [(ProviderKind, &'static str)] {
    match intent {
        Intent::CodeDevelopment => &[
            (ProviderKind::OpenAi, "gpt-4o"),
            (ProviderKind::Anthropic, "claude-3-5-sonnet-20241022"),
            (ProviderKind::Gemini, "gemini-2.0-flash"),
        ],
        Intent::CreativeWriting => &[
            (ProviderKind::Anthropic, "claude-3-opus-20240229"),
            (ProviderKind::OpenAi, "gpt-4o"),
            (ProviderKind::Gemini, "gemini-1.5-pro"),
        ],
        Intent::DataAnalysis => &[
            (ProviderKind::OpenAi, "gpt-4o"),
            (ProviderKind::Gemini, "gemini-1.5-pro"),
            (ProviderKind::Anthropic, "claude-3-5-sonnet-20241022"),
        ],
        Intent::Research => &[
            (ProviderKind::Gemini, "gemini-1.5-pro"),
            (ProviderKind::Anthropic, "claude-3-5-sonnet-20241022"),
            (ProviderKind::OpenAi, "gpt-4o"),
        ],
        Intent::Translation => &[
            (ProviderKind::OpenAi, "gpt-4o-mini"),
            (ProviderKind::Gemini, "gemini-2.0-flash"),
            (ProviderKind::Anthropic, "claude-3-5-haiku-20241022"),
        ],
        Intent::Summarization => &[
            (ProviderKind::Anthropic, "claude-3-5-haiku-20241022"),
            (ProviderKind::OpenAi, "gpt-4o-mini"),
            (ProviderKind::Gemini, "gemini-2.0-flash-lite"),
        ],
        Intent::Math => &[
            (ProviderKind::OpenAi, "o3-mini"),
            (ProviderKind::Anthropic, "claude-3-5-sonnet-20241022"),
            (ProviderKind::Gemini, "gemini-2.0-flash"),
        ],
        Intent::BusinessStrategy => &[
            (ProviderKind::Anthropic, "claude-3-5-sonnet-20241022"),
            (ProviderKind::OpenAi, "gpt-4o"),
            (ProviderKind::Gemini, "gemini-1.5-pro"),
        ],
        Intent::Conversation => &[
            (ProviderKind::OpenAi, "gpt-4o-mini"),
            (ProviderKind::Anthropic, "claude-3-5-haiku-20241022"),
            (ProviderKind::Gemini, "gemini-2.0-flash"),
        ],
    }
}

/// Static per-token cost table in credits per 1K output tokens
///
/// Used only for cost-sensitive candidate ordering; the billing job owns the
/// authoritative pricing table.
fn model_cost_per_1k(model: &str) -> f64 {
    match model {
        "gpt-4o" => 10.0,
        "gpt-4o-mini" => 0.6,
        "gpt-4.1" => 8.0,
        "o3-mini" => 4.4,
        "claude-3-opus-20240229" => 75.0,
        "claude-3-5-sonnet-20241022" => 15.0,
        "claude-3-5-haiku-20241022" => 4.0,
        "gemini-1.5-pro" => 5.0,
        "gemini-2.0-flash" => 0.4,
        "gemini-2.0-flash-lite" => 0.3,
        // Unknown models sort last under cost-sensitive selection
        _ => f64::MAX,
    }
}

/// Select the best (model, provider) pair for an intent
///
/// Deterministic given the same intent, preferences, and registry state.
///
/// # Errors
///
/// Returns a fatal `ProviderUnavailable` ("no available models") when no
/// provider is configured at all. Never retried.
pub fn select_best_model(
    intent: Intent,
    query: &str,
    preferences: &SelectionPreferences,
    registry: &ProviderRegistry,
) -> AppResult<ModelChoice> {
    debug!(%intent, query_chars = query.chars().count(), "selecting model");

    // Steps 1-2: ranked candidates, filtered to configured providers
    let surviving: Vec<&(ProviderKind, &str)> = intent_candidates(intent)
        .iter()
        .filter(|(provider, _)| registry.is_available(*provider))
        .collect();

    // Step 3: fall back to the first available provider's first model
    if surviving.is_empty() {
        let Some((provider, adapter)) = registry.default_provider() else {
            return Err(AppError::new(
                crate::errors::ErrorCode::ProviderUnavailable,
                "No available models: no provider is configured",
            ));
        };
        let model = adapter
            .available_models()
            .first()
            .copied()
            .unwrap_or_else(|| adapter.default_model());
        return Ok(ModelChoice {
            model: model.to_owned(),
            provider,
        });
    }

    // Step 4: preferred provider, when a candidate of it survived
    if let Some(preferred) = preferences.preferred_provider {
        if let Some((provider, model)) =
            surviving.iter().find(|(provider, _)| *provider == preferred)
        {
            return Ok(ModelChoice {
                model: (*model).to_owned(),
                provider: *provider,
            });
        }
    }

    // Step 5: cost-sensitive callers get the cheapest survivor
    if preferences.cost_sensitive {
        if let Some((provider, model)) = surviving.iter().min_by(|a, b| {
            model_cost_per_1k(a.1)
                .partial_cmp(&model_cost_per_1k(b.1))
                .unwrap_or(std::cmp::Ordering::Equal)
        }) {
            return Ok(ModelChoice {
                model: (*model).to_owned(),
                provider: *provider,
            });
        }
    }

    // Step 6: table order encodes curated preference
    let (provider, model) = surviving[0];
    Ok(ModelChoice {
        model: (*model).to_owned(),
        provider: *provider,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, ProviderCredentials};

    fn registry_with(kinds: &[ProviderKind]) -> ProviderRegistry {
        let providers = kinds
            .iter()
            .map(|&kind| {
                (
                    kind,
                    ProviderCredentials {
                        api_key: "test-key".into(),
                        base_url: None,
                        timeout_secs: 30,
                        max_retries: 0,
                    },
                )
            })
            .collect();
        ProviderRegistry::from_config(&GatewayConfig::with_providers(providers))
    }

    #[test]
    fn test_availability_filter_beats_table_rank() {
        // code_development ranks openai first, but only anthropic is configured
        let registry = registry_with(&[ProviderKind::Anthropic]);
        let choice = select_best_model(
            Intent::CodeDevelopment,
            "write a parser",
            &SelectionPreferences::default(),
            &registry,
        )
        .unwrap();
        assert_eq!(choice.provider, ProviderKind::Anthropic);
    }

    #[test]
    fn test_preferred_provider_wins_when_surviving() {
        let registry = registry_with(&[ProviderKind::OpenAi, ProviderKind::Gemini]);
        let preferences = SelectionPreferences {
            preferred_provider: Some(ProviderKind::Gemini),
            cost_sensitive: false,
        };
        let choice =
            select_best_model(Intent::CodeDevelopment, "q", &preferences, &registry).unwrap();
        assert_eq!(choice.provider, ProviderKind::Gemini);
    }

    #[test]
    fn test_preference_ignored_when_no_candidate_matches() {
        // Preference points at a provider with no surviving candidate for the
        // intent (anthropic unconfigured), so normal precedence applies
        let registry = registry_with(&[ProviderKind::OpenAi]);
        let preferences = SelectionPreferences {
            preferred_provider: Some(ProviderKind::Anthropic),
            cost_sensitive: false,
        };
        let choice =
            select_best_model(Intent::CodeDevelopment, "q", &preferences, &registry).unwrap();
        assert_eq!(choice.provider, ProviderKind::OpenAi);
        assert_eq!(choice.model, "gpt-4o");
    }

    #[test]
    fn test_cost_sensitive_picks_cheapest_survivor() {
        let registry = registry_with(&[ProviderKind::OpenAi, ProviderKind::Gemini]);
        let preferences = SelectionPreferences {
            preferred_provider: None,
            cost_sensitive: true,
        };
        let choice =
            select_best_model(Intent::CodeDevelopment, "q", &preferences, &registry).unwrap();
        // gemini-2.0-flash (0.4) undercuts gpt-4o (10.0)
        assert_eq!(choice.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_table_order_is_the_default() {
        let registry = registry_with(&[
            ProviderKind::OpenAi,
            ProviderKind::Anthropic,
            ProviderKind::Gemini,
        ]);
        let choice = select_best_model(
            Intent::CreativeWriting,
            "q",
            &SelectionPreferences::default(),
            &registry,
        )
        .unwrap();
        assert_eq!(choice.model, "claude-3-opus-20240229");
    }

    #[test]
    fn test_no_providers_is_fatal() {
        let registry = ProviderRegistry::new();
        let error = select_best_model(
            Intent::Conversation,
            "q",
            &SelectionPreferences::default(),
            &registry,
        )
        .unwrap_err();
        assert_eq!(error.code, crate::errors::ErrorCode::ProviderUnavailable);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let registry = registry_with(&[ProviderKind::OpenAi, ProviderKind::Anthropic]);
        let first = select_best_model(
            Intent::Math,
            "integrate x^2",
            &SelectionPreferences::default(),
            &registry,
        )
        .unwrap();
        for _ in 0..10 {
            let again = select_best_model(
                Intent::Math,
                "integrate x^2",
                &SelectionPreferences::default(),
                &registry,
            )
            .unwrap();
            assert_eq!(again, first);
        }
    }
}
