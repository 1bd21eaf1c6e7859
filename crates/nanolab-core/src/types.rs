// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits and the Nanolab core.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Unique identifier for a browser/user session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Not checked yet.
    Unknown,
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is not operational (or too slow to be useful).
    Unhealthy(String),
}

/// Identifies the type of adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Generator,
    Store,
}

/// Generation modes exposed by the playground UI.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    Basic,
    Chat,
    Batch,
    Blend,
    Style,
    Search,
    Template,
}

/// Content filtering strictness requested from the provider.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Strict,
    #[default]
    Moderate,
    Relaxed,
    Off,
}

/// Output resolutions understood by the provider.
pub const RESOLUTIONS: &[&str] = &["1K", "2K", "4K"];

/// Aspect ratios understood by the provider.
pub const ASPECT_RATIOS: &[&str] = &["1:1", "16:9", "9:16", "4:3", "3:4"];

/// Raw image bytes returned by (or sent to) the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// One per-category safety assessment attached to a provider reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyRating {
    pub category: String,
    pub probability: String,
    #[serde(default)]
    pub blocked: bool,
}

/// A successful provider answer, before safety classification.
///
/// Provider adapters flatten their wire format into this shape; the retry
/// classifier decides whether a reply is usable or a safety block.
#[derive(Debug, Clone, Default)]
pub struct ProviderReply {
    pub image: Option<GeneratedImage>,
    pub text: Option<String>,
    pub thinking: Option<String>,
    pub search_sources: Option<String>,
    /// Candidate-level finish reason (e.g. `STOP`, `SAFETY`).
    pub finish_reason: Option<String>,
    /// Prompt-level block reason, set when no candidate was produced.
    pub block_reason: Option<String>,
    pub safety_ratings: Vec<SafetyRating>,
}

/// Outcome of one generation as seen by callers of the core.
///
/// Remote failures are reported through `error` / `safety_blocked` instead
/// of being propagated as `Err`.
#[derive(Debug, Clone, Default)]
pub struct GenerationResult {
    pub image: Option<GeneratedImage>,
    pub text: Option<String>,
    pub thinking: Option<String>,
    pub search_sources: Option<String>,
    pub duration: Duration,
    pub error: Option<String>,
    pub safety_blocked: bool,
    pub safety_ratings: Vec<SafetyRating>,
    /// Number of remote attempts made (including the successful one).
    pub attempts: u32,
}

impl GenerationResult {
    /// True when the generation produced an image and no error.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.image.is_some()
    }
}

/// Text-to-image request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub aspect_ratio: String,
    pub resolution: String,
    pub enable_thinking: bool,
    pub enable_search: bool,
    pub safety_level: SafetyLevel,
}

impl GenerateRequest {
    /// A request with the playground defaults (16:9, 1K, moderate filtering).
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: "16:9".to_string(),
            resolution: "1K".to_string(),
            enable_thinking: false,
            enable_search: false,
            safety_level: SafetyLevel::default(),
        }
    }
}

/// Multi-image blend request.
#[derive(Debug, Clone)]
pub struct BlendRequest {
    pub prompt: String,
    pub images: Vec<GeneratedImage>,
    pub aspect_ratio: String,
    pub safety_level: SafetyLevel,
}

/// Search-grounded generation request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub prompt: String,
    pub aspect_ratio: String,
    pub safety_level: SafetyLevel,
}

/// Author of one turn in a multi-turn conversation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// The person refining the image.
    User,
    /// The provider's answer.
    Model,
}

/// One earlier message of a conversation, replayed with every new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    /// May be empty for a model turn that only returned an image.
    pub text: String,
    pub image: Option<GeneratedImage>,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
            image: None,
        }
    }

    pub fn model(text: impl Into<String>, image: Option<GeneratedImage>) -> Self {
        Self {
            role: ChatRole::Model,
            text: text.into(),
            image,
        }
    }
}

/// Next message of a conversation together with its history.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Earlier turns, oldest first.
    pub history: Vec<ChatTurn>,
    pub prompt: String,
    pub aspect_ratio: String,
    pub resolution: String,
    pub safety_level: SafetyLevel,
}

impl ChatRequest {
    /// A message with no history and the playground defaults.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            history: Vec::new(),
            prompt: prompt.into(),
            aspect_ratio: "16:9".to_string(),
            resolution: "1K".to_string(),
            safety_level: SafetyLevel::default(),
        }
    }
}

/// Population a quota ledger is shared across.
///
/// Callers need this to explain limits: a per-session ledger resets with
/// the session and does not protect the shared budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaScope {
    /// Backed by a shared remote store; all trial users draw from one pool.
    Global,
    /// Backed by process-local memory; each session sees its own pool.
    PerSession,
}

impl QuotaScope {
    /// Storage label shown in quota status.
    pub fn label(self) -> &'static str {
        match self {
            Self::Global => "Cloudflare KV",
            Self::PerSession => "Session (Fallback)",
        }
    }
}

impl std::fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
