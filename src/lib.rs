// ABOUTME: Main library entry point for the fusion AI gateway
// ABOUTME: Routes chat turns to upstream LLM providers with metered, idempotent accounting
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

#![deny(unsafe_code)]

//! # Fusion Gateway
//!
//! An AI request-routing and streaming-chat pipeline. A user chat turn comes
//! in, the gateway decides which upstream language-model provider and model
//! should answer it (explicitly, or through the intent-classification
//! "fusion" router), calls the provider, streams the output back over SSE,
//! persists conversation state, and meters usage against a per-user credit
//! balance with idempotent accounting.
//!
//! ## Architecture
//!
//! Dependency order, leaves first:
//! - **[`llm`]**: one adapter per upstream provider behind the
//!   [`llm::LlmProvider`] trait, plus the [`llm::ProviderRegistry`] router
//! - **[`fusion`]**: intent classifier, deterministic model selector, and the
//!   orchestrator composing them into "pick the best model for this query"
//! - **[`services`]**: the end-to-end chat turn state machine (blocking and
//!   streaming variants)
//! - **[`routes`]**: axum handlers for the JSON and SSE wire formats
//! - **[`store`]**: persistence, metering, credit, and rate-limit
//!   collaborator traits with in-memory implementations
//!
//! Monetary cost is never computed in the request path: the core records
//! usage events keyed by an idempotency key and performs only an optimistic
//! credit pre-check; the authoritative debit belongs to an external billing
//! job consuming those events.

pub mod config;
pub mod errors;
pub mod fusion;
pub mod llm;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
