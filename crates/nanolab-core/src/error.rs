// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Nanolab generation core.

use thiserror::Error;

/// The primary error type used across all Nanolab adapter traits and core operations.
#[derive(Debug, Error)]
pub enum NanolabError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Quota backing store errors (transport failure, bad payload).
    #[error("storage error: {source}")]
    Storage {
        /// Underlying store or decoding error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Remote generation provider errors.
    ///
    /// `status` carries the HTTP status when the provider answered, so the
    /// retry classifier can prefer it over message matching.
    #[error("provider error: {message}")]
    Provider {
        /// Human-readable description, matched by the retry classifier.
        message: String,
        /// HTTP status code, when the provider answered at all.
        status: Option<u16>,
        /// Transport or decoding error behind the failure.
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The provider refused the content on policy grounds.
    #[error("content blocked by safety filters: {0}")]
    SafetyBlocked(String),

    /// Local pre-flight rejection: global or per-mode daily quota exhausted.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Local pre-flight rejection: consumption faster than the cooldown.
    #[error("cooldown active: please wait {wait_secs}s before next generation")]
    CooldownActive {
        /// Whole seconds until the next generation is allowed.
        wait_secs: u64,
    },

    /// The session already has a generation in flight.
    #[error("a generation is already in progress for this session")]
    GenerationInProgress,

    /// Caller supplied an unusable request (empty prompt, no images, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout {
        /// How long the operation was allowed to run.
        duration: std::time::Duration,
    },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NanolabError {
    /// Shorthand for a provider error without a status code or source.
    pub fn provider(message: impl Into<String>) -> Self {
        NanolabError::Provider {
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// HTTP status attached to a provider error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            NanolabError::Provider { status, .. } => *status,
            _ => None,
        }
    }
}
