// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry executor for remote generation calls.
//!
//! The executor never returns `Err`: every outcome (success, safety block,
//! exhausted retries, fatal error) is folded into a [`GenerationResult`].

use std::future::Future;
use std::time::Duration;

use nanolab_config::RetryConfig;
use nanolab_core::{GenerationResult, NanolabError, ProviderReply};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classify::{classify_error, is_safety_block, FailureKind, SAFETY_BLOCKED_MESSAGE};

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ],
        )
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            config
                .backoff_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        )
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::new(0, Vec::new())
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (1-based). The last configured
    /// delay repeats once the schedule runs out.
    pub fn delay_before(&self, retry: u32) -> Duration {
        let idx = (retry.saturating_sub(1) as usize).min(self.backoff.len().saturating_sub(1));
        self.backoff.get(idx).copied().unwrap_or(Duration::ZERO)
    }

    /// Remote calls made when every attempt fails transiently.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Sum of every backoff delay when all retries are used.
    pub fn total_backoff(&self) -> Duration {
        (1..=self.max_retries).map(|retry| self.delay_before(retry)).sum()
    }
}

/// Run `call` until it succeeds, is blocked, fails fatally, or runs out of
/// retries. Each invocation of `call` performs exactly one remote request;
/// `operation` only labels the log events.
pub async fn execute_with_retry<F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> GenerationResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ProviderReply, NanolabError>>,
{
    let started = Instant::now();
    let mut result = GenerationResult::default();

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay_before(attempt);
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying generation after transient error"
            );
            tokio::time::sleep(delay).await;
        }
        result.attempts = attempt + 1;

        match call().await {
            Ok(reply) if is_safety_block(&reply) => {
                warn!(
                    operation,
                    attempt,
                    finish_reason = reply.finish_reason.as_deref().unwrap_or(""),
                    block_reason = reply.block_reason.as_deref().unwrap_or(""),
                    "generation blocked by safety filters"
                );
                result.safety_blocked = true;
                result.error = Some(SAFETY_BLOCKED_MESSAGE.to_string());
                result.safety_ratings = reply.safety_ratings;
                break;
            }
            Ok(reply) => {
                debug!(
                    operation,
                    attempt,
                    has_image = reply.image.is_some(),
                    "generation attempt succeeded"
                );
                result.error = None;
                result.image = reply.image;
                result.text = reply.text;
                result.thinking = reply.thinking;
                result.search_sources = reply.search_sources;
                result.safety_ratings = reply.safety_ratings;
                break;
            }
            Err(err) => match classify_error(&err) {
                FailureKind::SafetyBlocked => {
                    warn!(operation, attempt, error = %err, "generation rejected by safety filters");
                    result.safety_blocked = true;
                    result.error = Some(SAFETY_BLOCKED_MESSAGE.to_string());
                    break;
                }
                FailureKind::Retryable if attempt < policy.max_retries => {
                    warn!(operation, attempt, error = %err, "transient generation failure");
                    result.error = Some(err.to_string());
                }
                kind => {
                    info!(operation, attempt, %kind, error = %err, "generation failed");
                    result.error = Some(err.to_string());
                    break;
                }
            },
        }
    }

    result.duration = started.elapsed();
    result
}
