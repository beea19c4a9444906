// ABOUTME: Collaborator traits for persistence, metering, credits, and rate limiting
// ABOUTME: DashMap-backed in-memory implementations; no locks in the request path
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

//! # Storage Collaborators
//!
//! The chat orchestration takes its persistence collaborators as constructor
//! arguments behind these traits. The in-memory implementations here back the
//! standalone server and the test suite; a deployment with durable storage
//! supplies its own implementations.
//!
//! The idempotency guarantee rests on [`UsageLedger::check_idempotency`]
//! atomically claiming the key; a turn that fails before its usage record is
//! written hands the key back via [`UsageLedger::release_idempotency`]. No
//! other shared state is mutated in the request path; the authoritative
//! credit debit belongs to the external billing job.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::config::ProviderKind;
use crate::errors::{AppError, AppResult};
use crate::llm::MessageRole;
use crate::models::UsageEvent;

/// Credits granted to a user on first contact
pub const INITIAL_CREDIT_GRANT: f64 = 100.0;

// ============================================================================
// Persisted entities
// ============================================================================

/// Role of a persisted message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredRole {
    User,
    Assistant,
    System,
}

impl From<StoredRole> for MessageRole {
    fn from(role: StoredRole) -> Self {
        match role {
            StoredRole::User => Self::User,
            StoredRole::Assistant => Self::Assistant,
            StoredRole::System => Self::System,
        }
    }
}

/// A conversation owned by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    /// Title seeded from the first turn; absent until one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Advances whenever a message is appended; list ordering key
    pub updated_at: DateTime<Utc>,
}

/// A persisted chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: StoredRole,
    pub content: String,
    /// Model/provider/token fields set only on assistant messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_in: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_out: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Fields for creating a message; id and timestamp are assigned by the store
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub role: StoredRole,
    pub content: String,
    pub model: Option<String>,
    pub provider: Option<ProviderKind>,
    pub tokens_in: Option<u32>,
    pub tokens_out: Option<u32>,
}

impl NewMessage {
    /// A user prompt; carries no model, provider, or token fields
    #[must_use]
    pub fn user(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role: StoredRole::User,
            content: content.into(),
            model: None,
            provider: None,
            tokens_in: None,
            tokens_out: None,
        }
    }

    /// An assistant reply with its serving model and token totals
    #[must_use]
    pub fn assistant(
        conversation_id: impl Into<String>,
        content: impl Into<String>,
        model: impl Into<String>,
        provider: ProviderKind,
        tokens_in: u32,
        tokens_out: u32,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role: StoredRole::Assistant,
            content: content.into(),
            model: Some(model.into()),
            provider: Some(provider),
            tokens_in: Some(tokens_in),
            tokens_out: Some(tokens_out),
        }
    }
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Owner-scoped conversation persistence
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a conversation for a user
    async fn create(&self, user_id: &str, title: Option<String>) -> AppResult<Conversation>;

    /// Find a conversation by id, scoped to its owner
    async fn find_unique(&self, user_id: &str, id: &str) -> AppResult<Option<Conversation>>;

    /// List a user's conversations, most recently updated first
    async fn find_many(&self, user_id: &str) -> AppResult<Vec<Conversation>>;

    /// Update a conversation's title
    async fn update(&self, user_id: &str, id: &str, title: Option<String>)
        -> AppResult<Conversation>;

    /// Advance a conversation's `updated_at` timestamp
    async fn touch(&self, user_id: &str, id: &str) -> AppResult<()>;

    /// Delete a conversation
    async fn delete(&self, user_id: &str, id: &str) -> AppResult<()>;
}

/// Append-only message persistence
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Fetch a conversation's messages in creation order
    async fn find_many(&self, conversation_id: &str) -> AppResult<Vec<StoredMessage>>;

    /// Append a message
    async fn create(&self, message: NewMessage) -> AppResult<StoredMessage>;

    /// Replace a message's content
    async fn update(&self, message_id: &str, content: String) -> AppResult<StoredMessage>;
}

/// Usage metering with idempotency-key claims
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Atomically claim an idempotency key
    ///
    /// Returns `true` if the key was already claimed (replay). The claim
    /// itself is the at-most-once guarantee; callers must check before any
    /// side-effecting work, and must hand the key back with
    /// [`UsageLedger::release_idempotency`] when the turn fails before its
    /// usage record is written, so the caller can retry with the same key.
    async fn check_idempotency(&self, request_id: &str) -> AppResult<bool>;

    /// Hand back a claimed key whose turn failed
    async fn release_idempotency(&self, request_id: &str) -> AppResult<()>;

    /// Record a usage event; priced and debited later by the billing job
    async fn record_usage_event(&self, event: UsageEvent) -> AppResult<()>;
}

/// Outcome of a credit sufficiency check
#[derive(Debug, Clone, Copy)]
pub struct CreditCheck {
    pub sufficient: bool,
    pub available: f64,
}

/// Per-user credit balance
///
/// Only [`CreditLedger::check_credits`] runs in the request path, as an
/// optimistic pre-check. `deduct_credits` is the authoritative debit and is
/// called exclusively by the billing job consumer, keyed by request id.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Grant the initial balance if the user has none yet
    async fn ensure_initial_credits(&self, user_id: &str) -> AppResult<()>;

    /// Optimistic pre-check of an estimated amount against the balance
    async fn check_credits(&self, user_id: &str, amount: f64) -> AppResult<CreditCheck>;

    /// Current balance
    async fn get_credits(&self, user_id: &str) -> AppResult<f64>;

    /// Authoritative debit; billing job only, never the request path
    async fn deduct_credits(&self, user_id: &str, amount: f64, request_id: &str) -> AppResult<()>;
}

/// A rate limit policy: at most `limit` requests per `window_secs`
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window_secs: u64,
}

/// Outcome of a rate limit consult
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Fixed-window request rate limiting keyed by caller identity
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Consult (and consume from) the caller's window
    async fn check_rate_limit(
        &self,
        identity: &str,
        policy: RateLimitPolicy,
    ) -> AppResult<RateLimitDecision>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4())
}

/// In-memory conversation store
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: DashMap<String, Conversation>,
}

impl InMemoryConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create(&self, user_id: &str, title: Option<String>) -> AppResult<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: new_id("conv"),
            user_id: user_id.to_owned(),
            title,
            created_at: now,
            updated_at: now,
        };
        self.conversations
            .insert(conversation.id.clone(), conversation.clone());
        debug!(conversation_id = %conversation.id, "conversation created");
        Ok(conversation)
    }

    async fn find_unique(&self, user_id: &str, id: &str) -> AppResult<Option<Conversation>> {
        Ok(self
            .conversations
            .get(id)
            .filter(|c| c.user_id == user_id)
            .map(|c| c.clone()))
    }

    async fn find_many(&self, user_id: &str) -> AppResult<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn update(
        &self,
        user_id: &str,
        id: &str,
        title: Option<String>,
    ) -> AppResult<Conversation> {
        let mut entry = self
            .conversations
            .get_mut(id)
            .filter(|c| c.user_id == user_id)
            .ok_or_else(|| AppError::not_found("Conversation"))?;
        entry.title = title;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn touch(&self, user_id: &str, id: &str) -> AppResult<()> {
        let mut entry = self
            .conversations
            .get_mut(id)
            .filter(|c| c.user_id == user_id)
            .ok_or_else(|| AppError::not_found("Conversation"))?;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, user_id: &str, id: &str) -> AppResult<()> {
        let owned = self
            .conversations
            .get(id)
            .is_some_and(|c| c.user_id == user_id);
        if !owned {
            return Err(AppError::not_found("Conversation"));
        }
        self.conversations.remove(id);
        Ok(())
    }
}

/// In-memory message store, keyed by conversation
#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: DashMap<String, Vec<StoredMessage>>,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn find_many(&self, conversation_id: &str) -> AppResult<Vec<StoredMessage>> {
        Ok(self
            .messages
            .get(conversation_id)
            .map(|m| m.clone())
            .unwrap_or_default())
    }

    async fn create(&self, message: NewMessage) -> AppResult<StoredMessage> {
        let stored = StoredMessage {
            id: new_id("msg"),
            conversation_id: message.conversation_id.clone(),
            role: message.role,
            content: message.content,
            model: message.model,
            provider: message.provider,
            tokens_in: message.tokens_in,
            tokens_out: message.tokens_out,
            created_at: Utc::now(),
        };
        self.messages
            .entry(message.conversation_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn update(&self, message_id: &str, content: String) -> AppResult<StoredMessage> {
        for mut entry in self.messages.iter_mut() {
            if let Some(message) = entry.iter_mut().find(|m| m.id == message_id) {
                message.content = content;
                return Ok(message.clone());
            }
        }
        Err(AppError::not_found("Message"))
    }
}

/// In-memory usage ledger
///
/// The key claim uses DashMap's atomic entry insertion, so concurrent calls
/// with the same request id resolve to exactly one fresh claim.
#[derive(Default)]
pub struct InMemoryUsageLedger {
    claimed: DashMap<String, DateTime<Utc>>,
    events: Mutex<Vec<UsageEvent>>,
}

impl InMemoryUsageLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events, in recording order
    ///
    /// # Panics
    ///
    /// Panics if the event mutex is poisoned.
    #[must_use]
    pub fn events(&self) -> Vec<UsageEvent> {
        self.events.lock().expect("events mutex poisoned").clone()
    }
}

#[async_trait]
impl UsageLedger for InMemoryUsageLedger {
    async fn check_idempotency(&self, request_id: &str) -> AppResult<bool> {
        match self.claimed.entry(request_id.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(true),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Ok(false)
            }
        }
    }

    async fn release_idempotency(&self, request_id: &str) -> AppResult<()> {
        self.claimed.remove(request_id);
        Ok(())
    }

    async fn record_usage_event(&self, event: UsageEvent) -> AppResult<()> {
        debug!(request_id = %event.request_id, "usage event recorded");
        self.events
            .lock()
            .map_err(|_| AppError::internal("usage event store is poisoned"))?
            .push(event);
        Ok(())
    }
}

/// In-memory credit ledger
#[derive(Default)]
pub struct InMemoryCreditLedger {
    balances: DashMap<String, f64>,
}

impl InMemoryCreditLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ledger with a preset balance; test helper
    #[must_use]
    pub fn with_balance(user_id: impl Into<String>, balance: f64) -> Self {
        let ledger = Self::new();
        ledger.balances.insert(user_id.into(), balance);
        ledger
    }
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn ensure_initial_credits(&self, user_id: &str) -> AppResult<()> {
        self.balances
            .entry(user_id.to_owned())
            .or_insert(INITIAL_CREDIT_GRANT);
        Ok(())
    }

    async fn check_credits(&self, user_id: &str, amount: f64) -> AppResult<CreditCheck> {
        let available = self.balances.get(user_id).map_or(0.0, |b| *b);
        Ok(CreditCheck {
            sufficient: available >= amount,
            available,
        })
    }

    async fn get_credits(&self, user_id: &str) -> AppResult<f64> {
        Ok(self.balances.get(user_id).map_or(0.0, |b| *b))
    }

    async fn deduct_credits(&self, user_id: &str, amount: f64, request_id: &str) -> AppResult<()> {
        debug!(%user_id, amount, %request_id, "credits debited");
        let mut balance = self
            .balances
            .get_mut(user_id)
            .ok_or_else(|| AppError::not_found("Credit balance"))?;
        *balance -= amount;
        Ok(())
    }
}

/// In-memory fixed-window rate limiter
#[derive(Default)]
pub struct InMemoryRateLimiter {
    windows: DashMap<String, (DateTime<Utc>, u32)>,
}

impl InMemoryRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check_rate_limit(
        &self,
        identity: &str,
        policy: RateLimitPolicy,
    ) -> AppResult<RateLimitDecision> {
        let now = Utc::now();
        let window = Duration::seconds(i64::try_from(policy.window_secs).unwrap_or(i64::MAX));

        let mut entry = self
            .windows
            .entry(identity.to_owned())
            .or_insert((now, 0));
        let (started, count) = &mut *entry;

        if now - *started >= window {
            *started = now;
            *count = 0;
        }

        let reset_at = *started + window;
        if *count >= policy.limit {
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at,
            });
        }

        *count += 1;
        Ok(RateLimitDecision {
            allowed: true,
            remaining: policy.limit - *count,
            reset_at,
        })
    }
}
