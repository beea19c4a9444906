// ABOUTME: Service layer: end-to-end chat turn orchestration
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

mod chat_orchestration;

pub use chat_orchestration::{ChatOrchestration, ESTIMATED_TURN_COST, STREAM_CHUNK_CHARS};
