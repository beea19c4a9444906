// ABOUTME: Server binary wiring config, provider registry, stores, and routes
// ABOUTME: Serves the chat pipeline over HTTP with graceful shutdown on ctrl-c
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

//! # Fusion Gateway Server Binary
//!
//! Starts the AI gateway: provider adapters are instantiated from whichever
//! API keys are present in the environment, in-memory stores back
//! conversations and metering, and the axum router serves the blocking and
//! streaming chat endpoints.

use anyhow::Result;
use clap::Parser;
use fusion_gateway::{
    config::{GatewayConfig, ServerConfig},
    llm::ProviderRegistry,
    logging,
    routes::{self, GatewayState, DEFAULT_RATE_LIMIT},
    services::ChatOrchestration,
    store::{
        InMemoryConversationStore, InMemoryCreditLedger, InMemoryMessageStore,
        InMemoryRateLimiter, InMemoryUsageLedger,
    },
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "fusion-gateway")]
#[command(about = "Fusion Gateway - AI request routing and streaming chat pipeline")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_from_env()?;

    let mut server_config = ServerConfig::from_env();
    if let Some(port) = args.port {
        server_config.port = port;
    }

    let gateway_config = GatewayConfig::from_env();
    if !gateway_config.has_providers() {
        anyhow::bail!(
            "no provider configured: set at least one of OPENAI_API_KEY, \
             ANTHROPIC_API_KEY, GEMINI_API_KEY"
        );
    }

    let registry = Arc::new(ProviderRegistry::from_config(&gateway_config));

    let conversations = Arc::new(InMemoryConversationStore::new());
    let messages = Arc::new(InMemoryMessageStore::new());
    let usage = Arc::new(InMemoryUsageLedger::new());
    let credits = Arc::new(InMemoryCreditLedger::new());
    let rate_limiter = Arc::new(InMemoryRateLimiter::new());

    let orchestration = Arc::new(ChatOrchestration::new(
        Arc::clone(&registry),
        conversations.clone(),
        messages.clone(),
        usage,
        credits.clone(),
    ));

    let state = Arc::new(GatewayState {
        orchestration,
        registry,
        conversations,
        messages,
        credits,
        rate_limiter,
        rate_limit: DEFAULT_RATE_LIMIT,
    });

    let app = routes::router(state);
    let bind_addr = format!("{}:{}", server_config.host, server_config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "fusion gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("fusion gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to install ctrl-c handler");
        return;
    }
    info!("shutdown signal received");
}
