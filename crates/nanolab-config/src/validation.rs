// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks semantic constraints serde cannot express: positive budgets,
//! usable retry schedules, and KV credentials supplied all-or-none.

use nanolab_core::types::ASPECT_RATIOS;

use crate::diagnostic::ConfigError;
use crate::model::NanolabConfig;

/// Shortest expiry Cloudflare KV accepts on a write.
const MIN_KV_EXPIRY_SECS: u64 = 60;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration.
///
/// Collects every failure instead of stopping at the first one.
pub fn validate_config(config: &NanolabConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !LOG_LEVELS.contains(&config.app.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ConfigError::validation(format!(
            "app.log_level `{}` is not one of {}",
            config.app.log_level,
            LOG_LEVELS.join(", ")
        )));
    }

    if !ASPECT_RATIOS.contains(&config.gemini.default_aspect_ratio.as_str()) {
        errors.push(ConfigError::validation(format!(
            "gemini.default_aspect_ratio `{}` is not one of {}",
            config.gemini.default_aspect_ratio,
            ASPECT_RATIOS.join(", ")
        )));
    }

    if config.gemini.request_timeout_secs == 0 {
        errors.push(ConfigError::validation(
            "gemini.request_timeout_secs must be at least 1",
        ));
    }

    let quota = &config.quota;
    if quota.global_daily_quota == 0 {
        errors.push(ConfigError::validation(
            "quota.global_daily_quota must be at least 1",
        ));
    }
    for (key, mode) in quota.modes.entries() {
        if mode.cost == 0 {
            errors.push(ConfigError::validation(format!(
                "quota.modes.{key}.cost must be at least 1"
            )));
        }
    }

    let kv = &config.kv;
    if kv.is_partially_configured() && !kv.is_configured() {
        errors.push(ConfigError::validation(
            "kv.account_id, kv.namespace_id and kv.api_token must be set together",
        ));
    }
    if kv.expiry_secs < MIN_KV_EXPIRY_SECS {
        errors.push(ConfigError::validation(format!(
            "kv.expiry_secs must be at least {MIN_KV_EXPIRY_SECS}, got {}",
            kv.expiry_secs
        )));
    }

    if config.retry.max_retries > 0 && config.retry.backoff_secs.is_empty() {
        errors.push(ConfigError::validation(
            "retry.backoff_secs must not be empty when retry.max_retries > 0",
        ));
    }

    let generation = &config.generation;
    if generation.history_capacity == 0 {
        errors.push(ConfigError::validation(
            "generation.history_capacity must be at least 1",
        ));
    }
    if generation.batch_parallelism == 0 {
        errors.push(ConfigError::validation(
            "generation.batch_parallelism must be at least 1",
        ));
    }
    if generation.max_batch_size == 0 {
        errors.push(ConfigError::validation(
            "generation.max_batch_size must be at least 1",
        ));
    }
    // NaN fails this comparison too.
    if !(generation.watchdog_multiplier >= 1.0) {
        errors.push(ConfigError::validation(format!(
            "generation.watchdog_multiplier must be at least 1.0, got {}",
            generation.watchdog_multiplier
        )));
    }

    if config.health.interval_secs == 0 {
        errors.push(ConfigError::validation(
            "health.interval_secs must be at least 1",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
