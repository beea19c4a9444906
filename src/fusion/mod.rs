// ABOUTME: Intent-driven model selection composed from classifier, selector, and registry
// ABOUTME: Public surface for the fusion routing pipeline
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

//! # Fusion Routing
//!
//! "Fusion" is intent-classification-driven provider/model selection, as
//! opposed to an explicit caller-chosen model. A query is classified into one
//! of nine intent categories, keywords are extracted, the best available
//! (model, provider) pair is chosen deterministically, and the request is
//! dispatched through the [`crate::llm::ProviderRegistry`] with an
//! intent-tailored system prompt.

mod classifier;
mod intent;
mod orchestrator;
pub mod prompts;
mod selector;

pub use classifier::IntentClassifier;
pub use intent::{Intent, IntentClassification};
pub use orchestrator::{FusionOptions, FusionOrchestrator, FusionOutcome};
pub use selector::{select_best_model, ModelChoice, SelectionPreferences};

use serde::{Deserialize, Serialize};

/// Caller expertise level, used to tune the system prompt's tone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpertiseLevel {
    /// Explain concepts from first principles
    Beginner,
    /// Assume working familiarity with the domain
    #[default]
    Intermediate,
    /// Be terse and technical
    Expert,
}
