// ABOUTME: Line-buffering SSE parser for decoding upstream LLM event streams
// ABOUTME: Handles partial lines across TCP boundaries plus shared retry policy
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Fusion Labs

//! # Upstream SSE Decoding
//!
//! A line-buffering parser for the Server-Sent Events format that upstream
//! providers use for chunked output. Adapters that consume an upstream stream
//! internally (assembling it into one [`super::ChatResponse`]) feed raw TCP
//! chunks through [`SseLineBuffer`], which solves two correctness issues:
//!
//! 1. **Multiple events per TCP chunk**: all events in a chunk are emitted,
//!    not just the first.
//! 2. **Partial JSON across TCP boundaries**: incomplete lines are buffered
//!    until the terminating newline arrives.
//!
//! Also home to the shared [`RetryConfig`] used for the initial provider HTTP
//! request. Once bytes start flowing, the call is never retried — the caller
//! may already have consumed partial output.

use std::mem;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A parsed SSE event from an upstream stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the JSON string (prefix stripped)
    Data(String),
    /// The `[DONE]` termination signal (OpenAI convention)
    Done,
}

/// Line-buffering SSE parser that handles partial lines across TCP chunk boundaries
///
/// SSE streams are newline-delimited. TCP does not guarantee alignment between
/// network chunks and SSE event boundaries, so incomplete lines stay buffered
/// until a full line (terminated by `\n`) is available.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    /// Create a new empty line buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from a TCP chunk, returning any complete SSE events
    ///
    /// Bytes are appended to the internal buffer. Complete lines are extracted
    /// and parsed; any trailing partial line remains buffered for the next
    /// `feed()` call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let text = String::from_utf8_lossy(bytes);
        self.buffer.push_str(&text);

        let mut events = Vec::new();

        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim_end_matches('\r').to_owned();
            self.buffer = self.buffer[newline_pos + 1..].to_owned();

            if let Some(event) = Self::parse_line(&line) {
                events.push(event);
            }
        }

        events
    }

    /// Flush any remaining buffered content as a final event
    ///
    /// Called when the byte stream ends with a partial line (no trailing
    /// newline) still in the buffer.
    pub fn flush(&mut self) -> Option<SseEvent> {
        let remaining = mem::take(&mut self.buffer);
        Self::parse_line(&remaining)
    }

    fn parse_line(line: &str) -> Option<SseEvent> {
        let trimmed = line.trim();

        // Empty lines are SSE event separators
        if trimmed.is_empty() {
            return None;
        }

        if trimmed == "data: [DONE]" {
            return Some(SseEvent::Done);
        }

        if let Some(data) = trimmed.strip_prefix("data: ") {
            if !data.trim().is_empty() {
                return Some(SseEvent::Data(data.to_owned()));
            }
        }

        // Ignore non-data SSE fields (event:, id:, retry:, comments)
        None
    }
}

// ============================================================================
// Retry Configuration
// ============================================================================

/// Shared retry configuration for provider HTTP requests
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Initial delay before first retry (milliseconds)
    pub initial_delay_ms: u64,
    /// Maximum delay cap for exponential backoff (milliseconds)
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// Build a retry config with the configured attempt count and default backoff
    #[must_use]
    pub const fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }

    /// Calculate exponential backoff delay with jitter for a given attempt
    ///
    /// `delay = min(initial_ms * 2^attempt, max_ms) + jitter(0..100ms)`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay_ms.saturating_mul(1_u64 << attempt.min(16));
        let capped_delay = base_delay.min(self.max_delay_ms);
        // Small jitter (0-99ms) to avoid thundering herd
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::from(d.subsec_millis()))
            % 100;
        Duration::from_millis(capped_delay + jitter)
    }
}

/// Check if an HTTP error status code is retryable
///
/// Retryable errors are transient conditions that may resolve on retry:
/// 429 Too Many Requests, 502 Bad Gateway, 503 Service Unavailable.
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503)
}

/// Check if a request error is retryable (connection errors only)
#[must_use]
pub fn is_retryable_request_error(error: &reqwest::Error) -> bool {
    error.is_connect()
}

/// Send a provider HTTP request under a cancellable deadline with bounded retries
///
/// Retries cover the initial request only, for retryable statuses and
/// connection errors. The deadline applies per attempt; exceeding it surfaces
/// as the distinct `ProviderTimeout` kind and is never retried.
///
/// Non-success responses that are not retryable are returned to the caller,
/// which owns parsing the upstream error body.
///
/// # Errors
///
/// Returns `ProviderTimeout` when the deadline elapses and `ProviderError`
/// for connection failures that exhaust the retry budget.
pub async fn send_with_retry(
    builder: reqwest::RequestBuilder,
    retry: &RetryConfig,
    timeout: Duration,
    provider: &'static str,
) -> Result<reqwest::Response, crate::errors::AppError> {
    use crate::errors::AppError;

    let mut attempt = 0;
    loop {
        // JSON bodies are always cloneable; streaming bodies are not used here
        let request = builder
            .try_clone()
            .ok_or_else(|| AppError::internal("provider request body is not cloneable"))?;

        let outcome = tokio::time::timeout(timeout, request.send()).await;

        match outcome {
            Err(_) => {
                return Err(AppError::provider_timeout(provider, timeout.as_secs()));
            }
            Ok(Ok(response)) => {
                let status = response.status().as_u16();
                if response.status().is_success()
                    || !is_retryable_status(status)
                    || attempt >= retry.max_retries
                {
                    return Ok(response);
                }
                tracing::warn!(provider, status, attempt, "retrying provider request");
            }
            Ok(Err(error)) => {
                if error.is_timeout() {
                    return Err(AppError::provider_timeout(provider, timeout.as_secs()));
                }
                if !is_retryable_request_error(&error) || attempt >= retry.max_retries {
                    return Err(AppError::provider_error(
                        provider,
                        format!("failed to connect: {error}"),
                    ));
                }
                tracing::warn!(provider, %error, attempt, "retrying provider request");
            }
        }

        tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_events_per_chunk() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("{\"a\":1}".to_owned()),
                SseEvent::Data("{\"b\":2}".to_owned()),
            ]
        );
    }

    #[test]
    fn test_partial_line_across_chunks() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.feed(b"data: {\"content\":\"hel").is_empty());
        let events = buffer.feed(b"lo\"}\n");
        assert_eq!(events, vec![SseEvent::Data("{\"content\":\"hello\"}".to_owned())]);
    }

    #[test]
    fn test_done_signal() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"data: [DONE]\n\n");
        assert_eq!(events, vec![SseEvent::Done]);
    }

    #[test]
    fn test_flush_recovers_unterminated_line() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.feed(b"data: {\"tail\":true}").is_empty());
        assert_eq!(
            buffer.flush(),
            Some(SseEvent::Data("{\"tail\":true}".to_owned()))
        );
        assert_eq!(buffer.flush(), None);
    }

    #[test]
    fn test_non_data_fields_ignored() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"event: ping\nid: 42\n: comment\ndata: {\"x\":1}\n");
        assert_eq!(events, vec![SseEvent::Data("{\"x\":1}".to_owned())]);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(502));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(500));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig::with_max_retries(5);
        let delay = config.delay_for_attempt(10);
        assert!(delay <= Duration::from_millis(config.max_delay_ms + 100));
    }
}
