// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Nanolab generation core.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use nanolab_core::SafetyLevel;
use serde::{Deserialize, Serialize};

/// Top-level Nanolab configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NanolabConfig {
    /// Application identity and logging.
    #[serde(default)]
    pub app: AppConfig,

    /// Remote generation API settings.
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Trial quota settings.
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Quota backing store (Cloudflare KV) settings.
    #[serde(default)]
    pub kv: KvConfig,

    /// Retry/backoff settings for remote calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Generation state machine and batch settings.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// API health monitor settings.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Application identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Display name used in logs and CLI output.
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_app_name() -> String {
    "nanolab".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Remote generation API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GeminiConfig {
    /// Server-side API key. `None` puts every session without its own key
    /// into trial mode.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Image generation model.
    #[serde(default = "default_model")]
    pub model: String,

    /// Cheap text model used for health probes.
    #[serde(default = "default_health_model")]
    pub health_model: String,

    /// API base URL (up to and including the version segment).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Aspect ratio used when a request does not specify one.
    #[serde(default = "default_aspect_ratio")]
    pub default_aspect_ratio: String,

    /// Default content filtering level.
    #[serde(default)]
    pub safety_level: SafetyLevel,

    /// HTTP client timeout for a single request, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            health_model: default_health_model(),
            base_url: default_base_url(),
            default_aspect_ratio: default_aspect_ratio(),
            safety_level: SafetyLevel::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "gemini-2.0-flash-preview-image-generation".to_string()
}

fn default_health_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_aspect_ratio() -> String {
    "16:9".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

/// How per-mode daily limits are derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaAllocation {
    /// Limits derived from fixed ratios of the global quota.
    Auto,
    /// Limits taken from `[quota.modes.*]`.
    #[default]
    Manual,
}

/// Trial quota configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaConfig {
    /// Global daily point budget shared by all trial users.
    #[serde(default = "default_global_daily_quota")]
    pub global_daily_quota: u32,

    /// `auto` or `manual` per-mode limit derivation.
    #[serde(default)]
    pub allocation: QuotaAllocation,

    /// Minimum gap between two consumptions, in seconds.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,

    /// Enforce trial quota even when an API key is configured.
    #[serde(default)]
    pub force_trial_mode: bool,

    /// Per-mode cost and limit, used in manual allocation.
    #[serde(default)]
    pub modes: ModeQuotaTable,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            global_daily_quota: default_global_daily_quota(),
            allocation: QuotaAllocation::default(),
            cooldown_seconds: default_cooldown_seconds(),
            force_trial_mode: false,
            modes: ModeQuotaTable::default(),
        }
    }
}

fn default_global_daily_quota() -> u32 {
    50
}

fn default_cooldown_seconds() -> u64 {
    3
}

/// Cost and daily limit for one billing bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModeQuota {
    /// Points charged per generated unit.
    pub cost: u32,
    /// Units allowed per UTC day.
    pub limit: u32,
}

impl ModeQuota {
    const fn new(cost: u32, limit: u32) -> Self {
        Self { cost, limit }
    }
}

/// Manual per-mode quota table, one entry per billing bucket.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModeQuotaTable {
    pub basic_1k: ModeQuota,
    pub basic_4k: ModeQuota,
    pub chat: ModeQuota,
    pub batch_1k: ModeQuota,
    pub batch_4k: ModeQuota,
    pub search: ModeQuota,
    pub blend: ModeQuota,
}

impl Default for ModeQuotaTable {
    fn default() -> Self {
        Self {
            basic_1k: ModeQuota::new(1, 30),
            basic_4k: ModeQuota::new(3, 10),
            chat: ModeQuota::new(1, 20),
            batch_1k: ModeQuota::new(1, 15),
            batch_4k: ModeQuota::new(3, 5),
            search: ModeQuota::new(2, 15),
            blend: ModeQuota::new(2, 10),
        }
    }
}

impl ModeQuotaTable {
    /// Entries in display order, keyed by billing bucket.
    pub fn entries(&self) -> [(&'static str, ModeQuota); 7] {
        [
            ("basic_1k", self.basic_1k),
            ("basic_4k", self.basic_4k),
            ("chat", self.chat),
            ("batch_1k", self.batch_1k),
            ("batch_4k", self.batch_4k),
            ("search", self.search),
            ("blend", self.blend),
        ]
    }
}

/// Cloudflare KV configuration for the shared quota ledger.
///
/// When any credential is missing the ledger falls back to a
/// process-local store and quota becomes per-session.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KvConfig {
    #[serde(default)]
    pub account_id: Option<String>,

    #[serde(default)]
    pub namespace_id: Option<String>,

    #[serde(default)]
    pub api_token: Option<String>,

    /// Cloudflare API base URL.
    #[serde(default = "default_kv_base_url")]
    pub base_url: String,

    /// Expiry set on every quota write, in seconds.
    #[serde(default = "default_kv_expiry_secs")]
    pub expiry_secs: u64,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            account_id: None,
            namespace_id: None,
            api_token: None,
            base_url: default_kv_base_url(),
            expiry_secs: default_kv_expiry_secs(),
        }
    }
}

impl KvConfig {
    /// True when all three credentials are present and non-empty.
    pub fn is_configured(&self) -> bool {
        [&self.account_id, &self.namespace_id, &self.api_token]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }

    /// True when at least one credential is present.
    pub fn is_partially_configured(&self) -> bool {
        [&self.account_id, &self.namespace_id, &self.api_token]
            .iter()
            .any(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

fn default_kv_base_url() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_kv_expiry_secs() -> u64 {
    2 * 24 * 60 * 60
}

/// Retry/backoff configuration for remote generation calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before each retry, in seconds. The last entry repeats.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_secs() -> Vec<u64> {
    vec![2, 4, 8]
}

/// Generation state machine and batch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationConfig {
    /// Completed tasks kept per session.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// A task running longer than this multiple of its worst-case time
    /// (every item, every retry attempt and backoff) is reaped.
    #[serde(default = "default_watchdog_multiplier")]
    pub watchdog_multiplier: f64,

    /// Concurrent remote calls in parallel batch mode.
    #[serde(default = "default_batch_parallelism")]
    pub batch_parallelism: usize,

    /// Largest accepted batch.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            watchdog_multiplier: default_watchdog_multiplier(),
            batch_parallelism: default_batch_parallelism(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

fn default_history_capacity() -> usize {
    20
}

fn default_watchdog_multiplier() -> f64 {
    3.0
}

fn default_batch_parallelism() -> usize {
    3
}

fn default_max_batch_size() -> u32 {
    8
}

/// API health monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    /// Probes slower than this are reported unhealthy.
    #[serde(default = "default_slow_threshold_secs")]
    pub slow_threshold_secs: u64,

    /// Minimum time between two probes.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            slow_threshold_secs: default_slow_threshold_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_slow_threshold_secs() -> u64 {
    10
}

fn default_interval_secs() -> u64 {
    60
}
