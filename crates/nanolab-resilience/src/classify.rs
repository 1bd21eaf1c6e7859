// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Failure classification for remote generation errors.
//!
//! Two independent views of an error live here:
//!
//! - [`classify_error`] decides what the retry executor does with it
//!   (stop on safety, retry on transient, give up otherwise).
//! - [`categorize`] maps it onto the closed set of user-facing categories.
//!
//! The keyword tables below are the only data either view consults.
//! A structured HTTP status, when the adapter supplied one, is checked first.

use nanolab_core::{NanolabError, ProviderReply};
use strum::{Display, EnumString};

/// Fixed message stored on a result blocked by content filtering.
pub const SAFETY_BLOCKED_MESSAGE: &str =
    "Content was blocked by safety filters. Try rephrasing your prompt.";

/// Longest raw error text shown to a user for uncategorized failures.
pub const MAX_RAW_MESSAGE_CHARS: usize = 200;

/// Finish reasons that mean the candidate was withheld by content filtering.
const SAFETY_FINISH_REASONS: &[&str] = &["SAFETY", "IMAGE_SAFETY", "PROHIBITED_CONTENT"];

/// HTTP statuses treated as transient.
const RETRYABLE_STATUSES: &[u16] = &[500, 502, 503, 504];

const SAFETY_KEYWORDS: &[&str] = &[
    "safety",
    "blocked",
    "prohibited",
    "harm_category",
    "content policy",
];

const RETRYABLE_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "unavailable",
    "503",
    "502",
    "504",
    "overloaded",
    "network",
    "server disconnected",
    "deadline exceeded",
];

/// What the retry executor should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// Blocked by content filtering. Never retried.
    SafetyBlocked,
    /// Transient. Retried while attempts remain.
    Retryable,
    /// Anything else. Returned immediately.
    Fatal,
}

/// True when a successful reply was nonetheless withheld by the provider.
pub fn is_safety_block(reply: &ProviderReply) -> bool {
    reply.block_reason.is_some()
        || reply
            .finish_reason
            .as_deref()
            .is_some_and(|r| SAFETY_FINISH_REASONS.contains(&r.to_ascii_uppercase().as_str()))
}

/// Classify an error returned by a remote call.
pub fn classify_error(err: &NanolabError) -> FailureKind {
    if matches!(err, NanolabError::SafetyBlocked(_)) {
        return FailureKind::SafetyBlocked;
    }
    if let Some(status) = err.status() {
        if RETRYABLE_STATUSES.contains(&status) {
            return FailureKind::Retryable;
        }
    }
    classify_message(&err.to_string())
}

/// Classify a bare error message by keyword.
pub fn classify_message(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    if SAFETY_KEYWORDS.iter().any(|k| lower.contains(k)) {
        FailureKind::SafetyBlocked
    } else if RETRYABLE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        FailureKind::Retryable
    } else {
        FailureKind::Fatal
    }
}

/// User-facing error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    Overloaded,
    Unavailable,
    Timeout,
    RateLimited,
    InvalidKey,
    SafetyBlocked,
    Connection,
    Unknown,
}

impl ErrorCategory {
    /// Translation key for UI lookup.
    pub fn message_key(self) -> String {
        format!("errors.{self}")
    }

    /// English text used when no translation is available.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::Overloaded => "The model is currently overloaded. Please try again in a moment.",
            Self::Unavailable => "The service is temporarily unavailable. Please try again later.",
            Self::Timeout => "The request timed out. Please try again.",
            Self::RateLimited => "Rate limit reached. Please wait before trying again.",
            Self::InvalidKey => "The API key is invalid. Please check your settings.",
            Self::SafetyBlocked => SAFETY_BLOCKED_MESSAGE,
            Self::Connection => "Could not reach the service. Check your network connection.",
            Self::Unknown => "An unexpected error occurred.",
        }
    }
}

/// Map an error message onto a display category.
///
/// Order matters: an "overloaded 503" is reported as overloaded.
pub fn categorize(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    if contains_any(&lower, SAFETY_KEYWORDS) {
        ErrorCategory::SafetyBlocked
    } else if contains_any(&lower, &["overloaded"]) {
        ErrorCategory::Overloaded
    } else if contains_any(&lower, &["unavailable", "503"]) {
        ErrorCategory::Unavailable
    } else if contains_any(&lower, &["timeout", "timed out", "deadline exceeded", "504"]) {
        ErrorCategory::Timeout
    } else if contains_any(
        &lower,
        &["rate limit", "quota", "429", "resource_exhausted", "resource exhausted"],
    ) {
        ErrorCategory::RateLimited
    } else if contains_any(
        &lower,
        &["api key", "api_key", "invalid key", "permission denied", "401", "403"],
    ) {
        ErrorCategory::InvalidKey
    } else if contains_any(&lower, &["connection", "network", "server disconnected", "dns"]) {
        ErrorCategory::Connection
    } else {
        ErrorCategory::Unknown
    }
}

/// Text to show a user for a failed generation.
///
/// Known categories use their default message; unknown errors pass the raw
/// text through, truncated to [`MAX_RAW_MESSAGE_CHARS`] characters.
pub fn friendly_message(message: &str) -> String {
    match categorize(message) {
        ErrorCategory::Unknown => truncate_chars(message, MAX_RAW_MESSAGE_CHARS),
        category => category.default_message().to_string(),
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn provider_err(message: &str, status: Option<u16>) -> NanolabError {
        NanolabError::Provider {
            message: message.into(),
            status,
            source: None,
        }
    }

    #[test]
    fn safety_finish_reasons_block() {
        for reason in ["SAFETY", "IMAGE_SAFETY", "PROHIBITED_CONTENT", "safety"] {
            let reply = ProviderReply {
                finish_reason: Some(reason.into()),
                ..Default::default()
            };
            assert!(is_safety_block(&reply), "{reason} should block");
        }
        let ok = ProviderReply {
            finish_reason: Some("STOP".into()),
            ..Default::default()
        };
        assert!(!is_safety_block(&ok));
    }

    #[test]
    fn prompt_block_reason_blocks() {
        let reply = ProviderReply {
            block_reason: Some("OTHER".into()),
            ..Default::default()
        };
        assert!(is_safety_block(&reply));
    }

    #[test]
    fn structured_status_takes_precedence() {
        assert_eq!(
            classify_error(&provider_err("opaque failure", Some(503))),
            FailureKind::Retryable
        );
        assert_eq!(
            classify_error(&provider_err("opaque failure", Some(400))),
            FailureKind::Fatal
        );
        assert_eq!(
            classify_error(&provider_err("too many requests", Some(429))),
            FailureKind::Fatal
        );
    }

    #[test]
    fn keywords_classify_when_status_is_absent() {
        assert_eq!(classify_message("Request TIMED OUT"), FailureKind::Retryable);
        assert_eq!(classify_message("model is overloaded"), FailureKind::Retryable);
        assert_eq!(
            classify_message("Server disconnected without sending a response"),
            FailureKind::Retryable
        );
        assert_eq!(
            classify_message("Prompt blocked: HARM_CATEGORY_DANGEROUS"),
            FailureKind::SafetyBlocked
        );
        assert_eq!(classify_message("invalid argument"), FailureKind::Fatal);
    }

    #[test]
    fn safety_variant_is_safety() {
        assert_eq!(
            classify_error(&NanolabError::SafetyBlocked("x".into())),
            FailureKind::SafetyBlocked
        );
    }

    #[test]
    fn categories_follow_precedence() {
        assert_eq!(categorize("503 model overloaded"), ErrorCategory::Overloaded);
        assert_eq!(categorize("Service Unavailable"), ErrorCategory::Unavailable);
        assert_eq!(categorize("deadline exceeded"), ErrorCategory::Timeout);
        assert_eq!(categorize("429 RESOURCE_EXHAUSTED"), ErrorCategory::RateLimited);
        assert_eq!(categorize("API key not valid"), ErrorCategory::InvalidKey);
        assert_eq!(categorize("connection refused"), ErrorCategory::Connection);
        assert_eq!(categorize("finish reason: SAFETY"), ErrorCategory::SafetyBlocked);
        assert_eq!(categorize("something odd"), ErrorCategory::Unknown);
    }

    #[test]
    fn message_keys_are_snake_case() {
        assert_eq!(ErrorCategory::RateLimited.message_key(), "errors.rate_limited");
        assert_eq!(ErrorCategory::InvalidKey.to_string(), "invalid_key");
    }

    #[test]
    fn friendly_message_passes_unknown_text_through() {
        assert_eq!(friendly_message("odd failure"), "odd failure");
        assert_eq!(
            friendly_message("request timed out"),
            ErrorCategory::Timeout.default_message()
        );
    }

    proptest! {
        #[test]
        fn friendly_message_never_exceeds_limit(s in "[a-z ]{0,400}") {
            let msg = friendly_message(&s);
            prop_assert!(msg.chars().count() <= MAX_RAW_MESSAGE_CHARS);
        }

        #[test]
        fn truncation_respects_char_boundaries(s in "\\PC{0,300}") {
            let out = truncate_chars(&s, MAX_RAW_MESSAGE_CHARS);
            prop_assert!(out.chars().count() <= MAX_RAW_MESSAGE_CHARS);
            prop_assert!(s.starts_with(&out));
        }
    }
}
