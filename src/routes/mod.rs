// ABOUTME: HTTP layer: shared state, router assembly, health endpoints
// ABOUTME: Caller identity arrives as an opaque x-user-id header from the edge
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

pub mod chat;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

use crate::errors::{AppError, AppResult};
use crate::llm::ProviderRegistry;
use crate::services::ChatOrchestration;
use crate::store::{
    ConversationStore, CreditLedger, MessageStore, RateLimitPolicy, RateLimiter,
};

/// Header carrying the opaque caller identity, set by the edge layer
pub const USER_ID_HEADER: &str = "x-user-id";

/// Default rate limit: requests per caller per window
pub const DEFAULT_RATE_LIMIT: RateLimitPolicy = RateLimitPolicy {
    limit: 60,
    window_secs: 60,
};

/// Shared state behind every route handler
pub struct GatewayState {
    pub orchestration: Arc<ChatOrchestration>,
    pub registry: Arc<ProviderRegistry>,
    pub conversations: Arc<dyn ConversationStore>,
    pub messages: Arc<dyn MessageStore>,
    pub credits: Arc<dyn CreditLedger>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub rate_limit: RateLimitPolicy,
}

/// Build the full application router
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .merge(chat::ChatRoutes::routes(Arc::clone(&state)))
        .merge(health_routes(state))
}

/// Extract the caller identity from request headers
///
/// # Errors
///
/// Returns `ValidationError` when the header is missing or not valid UTF-8;
/// identity resolution happens upstream, so a missing header is a malformed
/// request, not an auth failure.
pub fn require_user_id(headers: &HeaderMap) -> AppResult<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| AppError::validation(format!("missing {USER_ID_HEADER} header")))
}

/// Consult the caller's rate limit window before any orchestration work
pub async fn enforce_rate_limit(state: &GatewayState, user_id: &str) -> AppResult<()> {
    let decision = state
        .rate_limiter
        .check_rate_limit(user_id, state.rate_limit)
        .await?;
    if !decision.allowed {
        return Err(AppError::rate_limited(state.rate_limit.limit, decision.reset_at));
    }
    Ok(())
}

fn health_routes(state: Arc<GatewayState>) -> Router {
    async fn health_handler(
        State(state): State<Arc<GatewayState>>,
    ) -> Json<serde_json::Value> {
        let mut providers = serde_json::Map::new();
        for kind in state.registry.available_providers() {
            let status = match state.registry.get(kind) {
                Ok(provider) => match provider.health_check().await {
                    Ok(true) => "ok",
                    Ok(false) | Err(_) => "unreachable",
                },
                Err(_) => "unconfigured",
            };
            providers.insert(kind.as_str().to_owned(), status.into());
        }

        Json(serde_json::json!({
            "status": "healthy",
            "providers": providers,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
    }

    async fn ready_handler() -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "status": "ready",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
    }

    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}
