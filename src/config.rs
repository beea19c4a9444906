// ABOUTME: Environment-driven configuration for providers and the HTTP server
// ABOUTME: A provider is enabled if and only if its API key is present
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

//! # Gateway Configuration
//!
//! Configuration is a pure function of the process environment. Each upstream
//! provider has a credential/base-URL/timeout/retry tuple; the provider is
//! instantiated only when its credential is present — nothing is created
//! speculatively.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Default per-call deadline for upstream provider requests
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Default retry count for upstream provider requests
pub const DEFAULT_PROVIDER_MAX_RETRIES: u32 = 2;

/// Closed set of supported upstream providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// `OpenAI` chat completions API
    OpenAi,
    /// Anthropic messages API
    Anthropic,
    /// Google Gemini `generateContent` API
    Gemini,
}

impl ProviderKind {
    /// All provider kinds in configuration precedence order
    pub const ALL: &'static [Self] = &[Self::OpenAi, Self::Anthropic, Self::Gemini];

    /// Canonical wire name for this provider
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }

    /// Environment variable holding this provider's API key
    #[must_use]
    pub const fn api_key_env(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Environment variable overriding this provider's base URL
    #[must_use]
    pub const fn base_url_env(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_BASE_URL",
            Self::Anthropic => "ANTHROPIC_BASE_URL",
            Self::Gemini => "GEMINI_BASE_URL",
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "gemini" | "google" => Ok(Self::Gemini),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// Credential tuple for one upstream provider
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    /// API key for the provider
    pub api_key: String,
    /// Base URL override (None uses the provider's public endpoint)
    pub base_url: Option<String>,
    /// Per-call deadline in seconds
    pub timeout_secs: u64,
    /// Retry attempts for the initial request
    pub max_retries: u32,
}

/// Full gateway configuration derived from the environment
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Credentials for each configured provider, in `ProviderKind::ALL` order
    pub providers: Vec<(ProviderKind, ProviderCredentials)>,
}

impl GatewayConfig {
    /// Build configuration from the process environment
    ///
    /// Shared knobs: `FUSION_PROVIDER_TIMEOUT_SECS` (default 30) and
    /// `FUSION_PROVIDER_MAX_RETRIES` (default 2) apply to every provider.
    #[must_use]
    pub fn from_env() -> Self {
        let timeout_secs = env::var("FUSION_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS);
        let max_retries = env::var("FUSION_PROVIDER_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PROVIDER_MAX_RETRIES);

        let providers = ProviderKind::ALL
            .iter()
            .filter_map(|&kind| {
                let api_key = env::var(kind.api_key_env()).ok().filter(|k| !k.is_empty())?;
                let base_url = env::var(kind.base_url_env()).ok().filter(|u| !u.is_empty());
                Some((
                    kind,
                    ProviderCredentials {
                        api_key,
                        base_url,
                        timeout_secs,
                        max_retries,
                    },
                ))
            })
            .collect();

        Self { providers }
    }

    /// Build configuration from an explicit credential list (used by tests)
    #[must_use]
    pub fn with_providers(providers: Vec<(ProviderKind, ProviderCredentials)>) -> Self {
        Self { providers }
    }

    /// Whether any provider is configured
    #[must_use]
    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }
}

/// HTTP server configuration for the gateway binary
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
}

impl ServerConfig {
    /// Build server configuration from `FUSION_HOST` / `FUSION_PORT`
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            host: env::var("FUSION_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("FUSION_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_provider_kind_round_trip() {
        for &kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
        }
        assert!("hal9000".parse::<ProviderKind>().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_enables_only_credentialed_providers() {
        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("GEMINI_API_KEY");
        std::env::set_var("ANTHROPIC_API_KEY", "sk-test");

        let config = GatewayConfig::from_env();
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].0, ProviderKind::Anthropic);

        std::env::remove_var("ANTHROPIC_API_KEY");
    }

    #[test]
    #[serial]
    fn test_from_env_empty_key_is_disabled() {
        std::env::set_var("OPENAI_API_KEY", "");
        std::env::remove_var("ANTHROPIC_API_KEY");
        std::env::remove_var("GEMINI_API_KEY");

        let config = GatewayConfig::from_env();
        assert!(!config.has_providers());

        std::env::remove_var("OPENAI_API_KEY");
    }
}
