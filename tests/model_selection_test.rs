// ABOUTME: Integration tests for fusion model selection against a live registry
// ABOUTME: Exercises the precedence contract through registered mock providers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

mod common;

use common::MockProvider;
use fusion_gateway::config::ProviderKind;
use fusion_gateway::errors::ErrorCode;
use fusion_gateway::fusion::{select_best_model, Intent, SelectionPreferences};
use fusion_gateway::llm::ProviderRegistry;

fn registry_of(kinds: &[ProviderKind]) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for &kind in kinds {
        let (provider, _) = MockProvider::replying(kind, "ok");
        registry.register(kind, Box::new(provider));
    }
    registry
}

#[tokio::test]
async fn test_only_configured_provider_wins_for_code() {
    // code_development's top-ranked candidate is an openai model, but only
    // anthropic is configured
    let registry = registry_of(&[ProviderKind::Anthropic]);
    let choice = select_best_model(
        Intent::CodeDevelopment,
        "implement a b-tree",
        &SelectionPreferences::default(),
        &registry,
    )
    .unwrap();
    assert_eq!(choice.provider, ProviderKind::Anthropic);
}

#[tokio::test]
async fn test_unmatched_preference_falls_back_to_precedence() {
    let registry = registry_of(&[ProviderKind::OpenAi]);
    let preferences = SelectionPreferences {
        preferred_provider: Some(ProviderKind::Gemini),
        cost_sensitive: false,
    };
    let choice = select_best_model(
        Intent::CodeDevelopment,
        "implement a b-tree",
        &preferences,
        &registry,
    )
    .unwrap();
    assert_eq!(choice.provider, ProviderKind::OpenAi);
}

#[tokio::test]
async fn test_out_of_table_fallback_uses_first_available_provider() {
    // A registry whose only provider never appears in some intent's candidate
    // list cannot happen with the shipped tables (every intent lists all
    // three), so exercise the fallback with an empty registry instead
    let registry = ProviderRegistry::new();
    let error = select_best_model(
        Intent::Research,
        "anything",
        &SelectionPreferences::default(),
        &registry,
    )
    .unwrap_err();
    assert_eq!(error.code, ErrorCode::ProviderUnavailable);
    assert!(error.message.contains("No available models"));
}

#[tokio::test]
async fn test_selection_matches_registry_capabilities() {
    let registry = registry_of(&[ProviderKind::OpenAi, ProviderKind::Gemini]);
    for &intent in Intent::ALL {
        let choice = select_best_model(
            intent,
            "query",
            &SelectionPreferences::default(),
            &registry,
        )
        .unwrap();
        assert!(
            registry.is_available(choice.provider),
            "{intent} selected unavailable provider {}",
            choice.provider
        );
    }
}
