// ABOUTME: Provider registry dispatching canonical chat requests to named adapters
// ABOUTME: Sparse construction — only credentialed providers are instantiated
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

//! # Provider Registry
//!
//! Holds configured adapters keyed by [`ProviderKind`] and dispatches a
//! canonical [`ChatRequest`] to the named one. The kind set is closed — this
//! is not a plugin system. Dispatch to an unconfigured provider fails with
//! the distinct `ProviderUnavailable` kind so callers can tell "never
//! configured" apart from an in-flight provider failure.

use tracing::info;

use super::{
    AnthropicProvider, ChatRequest, ChatResponse, GeminiProvider, LlmProvider, OpenAiProvider,
};
use crate::config::{GatewayConfig, ProviderKind};
use crate::errors::{AppError, AppResult};

/// Registry of configured LLM providers
pub struct ProviderRegistry {
    providers: Vec<(ProviderKind, Box<dyn LlmProvider>)>,
}

impl ProviderRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Build a registry from configuration
    ///
    /// Instantiation is a pure function of which credentials are present:
    /// each configured provider gets exactly one adapter, nothing is created
    /// speculatively.
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut registry = Self::new();

        for (kind, credentials) in &config.providers {
            let provider: Box<dyn LlmProvider> = match kind {
                ProviderKind::OpenAi => Box::new(OpenAiProvider::new(credentials)),
                ProviderKind::Anthropic => Box::new(AnthropicProvider::new(credentials)),
                ProviderKind::Gemini => Box::new(GeminiProvider::new(credentials)),
            };
            registry.register(*kind, provider);
        }

        info!(
            providers = ?registry.available_providers(),
            "provider registry initialized"
        );
        registry
    }

    /// Register a provider instance under a kind
    ///
    /// Also the seam test suites use to install scripted providers.
    pub fn register(&mut self, kind: ProviderKind, provider: Box<dyn LlmProvider>) {
        self.providers.retain(|(k, _)| *k != kind);
        self.providers.push((kind, provider));
    }

    /// Get a provider by kind
    ///
    /// # Errors
    ///
    /// Returns `ProviderUnavailable` if the provider is not configured.
    pub fn get(&self, kind: ProviderKind) -> AppResult<&dyn LlmProvider> {
        self.providers
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, p)| p.as_ref())
            .ok_or_else(|| AppError::provider_unavailable(kind))
    }

    /// Whether a provider is configured
    #[must_use]
    pub fn is_available(&self, kind: ProviderKind) -> bool {
        self.providers.iter().any(|(k, _)| *k == kind)
    }

    /// List configured providers in registration order
    #[must_use]
    pub fn available_providers(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|(k, _)| *k).collect()
    }

    /// Models offered by a configured provider
    ///
    /// # Errors
    ///
    /// Returns `ProviderUnavailable` if the provider is not configured.
    pub fn available_models(&self, kind: ProviderKind) -> AppResult<&'static [&'static str]> {
        Ok(self.get(kind)?.available_models())
    }

    /// The default provider (first configured) and its default model
    #[must_use]
    pub fn default_provider(&self) -> Option<(ProviderKind, &dyn LlmProvider)> {
        self.providers.first().map(|(k, p)| (*k, p.as_ref()))
    }

    /// Dispatch a chat request to the named provider
    ///
    /// # Errors
    ///
    /// Returns `ProviderUnavailable` for an unconfigured kind, or the
    /// provider's own normalized error for in-flight failures.
    pub async fn chat(
        &self,
        kind: ProviderKind,
        request: &ChatRequest,
    ) -> AppResult<ChatResponse> {
        self.get(kind)?.complete(request).await
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    #[test]
    fn test_empty_registry_reports_unavailable() {
        let registry = ProviderRegistry::new();
        let error = registry.get(ProviderKind::OpenAi).err().unwrap();
        assert_eq!(error.code, ErrorCode::ProviderUnavailable);
        assert!(registry.available_providers().is_empty());
        assert!(registry.default_provider().is_none());
    }

    #[test]
    fn test_sparse_construction() {
        let config = GatewayConfig::with_providers(vec![(
            ProviderKind::Anthropic,
            crate::config::ProviderCredentials {
                api_key: "sk-test".into(),
                base_url: None,
                timeout_secs: 30,
                max_retries: 0,
            },
        )]);

        let registry = ProviderRegistry::from_config(&config);
        assert!(registry.is_available(ProviderKind::Anthropic));
        assert!(!registry.is_available(ProviderKind::OpenAi));
        assert_eq!(registry.available_providers(), vec![ProviderKind::Anthropic]);
    }
}
