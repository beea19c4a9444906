// ABOUTME: Unified error taxonomy for the chat pipeline with HTTP status mapping
// ABOUTME: Defines AppError, error codes, and the JSON error response shape
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

//! # Unified Error Handling
//!
//! Every failure that crosses a module boundary in this crate is an [`AppError`]
//! carrying an [`ErrorCode`]. The code determines the HTTP-adjacent status and
//! keeps upstream provider failures distinguishable from our own:
//!
//! - `ProviderUnavailable` (503): requested provider is not configured
//! - `ProviderTimeout` (504): upstream call exceeded its deadline
//! - `ProviderError` (502): upstream returned a non-success response
//!
//! Adapters never leak `reqwest` error types across this boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Standard error codes used throughout the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Requested provider is not configured
    #[serde(rename = "PROVIDER_UNAVAILABLE")]
    ProviderUnavailable,
    /// Upstream provider call exceeded its deadline
    #[serde(rename = "PROVIDER_TIMEOUT")]
    ProviderTimeout,
    /// Upstream provider returned a non-success response or failed unexpectedly
    #[serde(rename = "PROVIDER_ERROR")]
    ProviderError,
    /// Credit pre-check failed; includes required/available amounts in details
    #[serde(rename = "INSUFFICIENT_CREDITS")]
    InsufficientCredits,
    /// Idempotency replay: the request was already processed
    #[serde(rename = "CONFLICT")]
    Conflict,
    /// Conversation (or other resource) does not exist or is not owned by the caller
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    /// Malformed request shape
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    /// Caller exceeded their request rate limit
    #[serde(rename = "RATE_LIMIT_EXCEEDED")]
    RateLimitExceeded,
    /// Catch-all for anything not classified above
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::ValidationError => 400,
            Self::InsufficientCredits => 402,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::RateLimitExceeded => 429,
            Self::InternalError => 500,
            Self::ProviderError => 502,
            Self::ProviderUnavailable => 503,
            Self::ProviderTimeout => 504,
        }
    }

    /// Get a user-facing description of this error class
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::ProviderUnavailable => "The requested AI provider is not configured",
            Self::ProviderTimeout => "The AI provider did not respond in time",
            Self::ProviderError => "The AI provider returned an error",
            Self::InsufficientCredits => "Insufficient credits for this request",
            Self::Conflict => "This request was already processed",
            Self::NotFound => "The requested resource was not found",
            Self::ValidationError => "The request is malformed",
            Self::RateLimitExceeded => "Rate limit exceeded. Please slow down your requests",
            Self::InternalError => "An internal server error occurred",
        }
    }
}

/// Unified error type for the pipeline
#[derive(Debug, Error)]
pub struct AppError {
    /// Error classification
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Structured context (upstream status, required/available credits, ...)
    pub context: serde_json::Value,
    /// Source error for chaining
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new error with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: serde_json::Value::Null,
            source: None,
        }
    }

    /// Attach structured context to the error
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// Attach a source error for chaining
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the HTTP status code for this error
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Provider is not configured
    pub fn provider_unavailable(provider: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ProviderUnavailable,
            format!("Provider '{provider}' is not configured"),
        )
    }

    /// Upstream call exceeded its deadline
    pub fn provider_timeout(provider: impl fmt::Display, timeout_secs: u64) -> Self {
        Self::new(
            ErrorCode::ProviderTimeout,
            format!("Provider '{provider}' timed out after {timeout_secs}s"),
        )
    }

    /// Upstream failed in a way that is not an HTTP error status
    pub fn provider_error(provider: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ProviderError,
            format!("{provider}: {}", message.into()),
        )
    }

    /// Upstream returned a non-success HTTP status, with best-effort parsed body
    pub fn provider_http_error(
        provider: impl fmt::Display,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::ProviderError,
            format!("{provider} returned HTTP {status}"),
        )
        .with_context(serde_json::json!({
            "upstream_status": status,
            "upstream_body": body.into(),
        }))
    }

    /// Credit pre-check failed
    pub fn insufficient_credits(required: f64, available: f64) -> Self {
        Self::new(
            ErrorCode::InsufficientCredits,
            format!("Insufficient credits: required {required}, available {available}"),
        )
        .with_context(serde_json::json!({
            "required": required,
            "available": available,
        }))
    }

    /// Idempotency replay
    pub fn conflict(request_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Conflict,
            format!("Request '{request_id}' was already processed"),
        )
    }

    /// Resource not found or not owned by the caller
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::NotFound,
            format!("{} not found", resource.into()),
        )
    }

    /// Malformed request
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Rate limit exceeded
    pub fn rate_limited(limit: u32, reset_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self::new(
            ErrorCode::RateLimitExceeded,
            format!("Rate limit of {limit} requests exceeded"),
        )
        .with_context(serde_json::json!({
            "limit": limit,
            "reset_at": reset_at.to_rfc3339(),
        }))
    }

    /// Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// JSON error body returned by blocking endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorResponseDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponseDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null", default)]
    pub context: serde_json::Value,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        Self {
            error: ErrorResponseDetails {
                code: error.code,
                message: error.message,
                context: error.context,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.code == ErrorCode::InternalError {
            tracing::error!(error = %self, context = %self.context, "internal error");
        }
        (status, Json(ErrorResponse::from(self))).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        match error.source() {
            Some(source) => Self::internal(error.to_string()).with_context(serde_json::json!({
                "source": source.to_string(),
            })),
            None => Self::internal(error.to_string()),
        }
    }
}
