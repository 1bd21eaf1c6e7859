// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Lookup order follows XDG: `/etc/nanolab/nanolab.toml`, then
//! `~/.config/nanolab/nanolab.toml`, then `./nanolab.toml`. Environment
//! variables override files: first the legacy deployment keys
//! (`TRIAL_*`, `GOOGLE_API_KEY`, `CF_*`), then `NANOLAB_*`.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::NanolabConfig;

/// Top-level sections addressable through `NANOLAB_<SECTION>_<KEY>`.
const SECTIONS: &[&str] = &[
    "app",
    "gemini",
    "quota",
    "kv",
    "retry",
    "generation",
    "health",
];

/// Billing buckets addressable through `NANOLAB_QUOTA_MODES_<MODE>_<FIELD>`.
const MODE_KEYS: &[&str] = &[
    "basic_1k", "basic_4k", "chat", "batch_1k", "batch_4k", "search", "blend",
];

pub(crate) const SYSTEM_CONFIG: &str = "/etc/nanolab/nanolab.toml";
pub(crate) const LOCAL_CONFIG: &str = "nanolab.toml";

pub(crate) fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("nanolab/nanolab.toml"))
        .unwrap_or_default()
}

/// Load configuration from the XDG hierarchy with environment overrides.
pub fn load_config() -> Result<NanolabConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string on top of the compiled defaults.
///
/// No files or environment variables are consulted.
pub fn load_config_from_str(toml_content: &str) -> Result<NanolabConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(NanolabConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from an explicit file, still honoring env overrides.
pub fn load_config_from_path(path: &Path) -> Result<NanolabConfig, figment::Error> {
    with_env(
        Figment::new()
            .merge(Serialized::defaults(NanolabConfig::default()))
            .merge(Toml::file(path)),
    )
    .extract()
}

/// The full provider stack before extraction.
pub fn build_figment() -> Figment {
    with_env(
        Figment::new()
            .merge(Serialized::defaults(NanolabConfig::default()))
            .merge(Toml::file(SYSTEM_CONFIG))
            .merge(Toml::file(user_config_path()))
            .merge(Toml::file(LOCAL_CONFIG)),
    )
}

fn with_env(figment: Figment) -> Figment {
    figment.merge(legacy_env_provider()).merge(env_provider())
}

/// `NANOLAB_*` variables, mapped section by section.
///
/// Splitting on `_` would break keys such as `global_daily_quota`, so the
/// section prefix is matched explicitly and the rest of the name is kept.
fn env_provider() -> Env {
    Env::prefixed("NANOLAB_").map(|key| map_prefixed_key(key.as_str()).into())
}

fn map_prefixed_key(key: &str) -> String {
    let key = key.to_ascii_lowercase();
    for section in SECTIONS {
        let Some(rest) = key
            .strip_prefix(section)
            .and_then(|r| r.strip_prefix('_'))
        else {
            continue;
        };

        if *section == "quota" {
            if let Some(mode_rest) = rest.strip_prefix("modes_") {
                for mode in MODE_KEYS {
                    if let Some(field) = mode_rest.strip_prefix(mode).and_then(|r| r.strip_prefix('_'))
                    {
                        return format!("quota.modes.{mode}.{field}");
                    }
                }
            }
        }
        return format!("{section}.{rest}");
    }
    key
}

/// Environment keys used by existing deployments, without a prefix.
fn legacy_env_provider() -> Env {
    Env::raw().filter_map(|key| legacy_key(key.as_str()).map(Into::into))
}

fn legacy_key(key: &str) -> Option<String> {
    let key = key.to_ascii_uppercase();
    let mapped = match key.as_str() {
        "TRIAL_GLOBAL_QUOTA" => "quota.global_daily_quota",
        "TRIAL_QUOTA_MODE" => "quota.allocation",
        "TRIAL_COOLDOWN_SECONDS" => "quota.cooldown_seconds",
        "FORCE_TRIAL_MODE" => "quota.force_trial_mode",
        "GOOGLE_API_KEY" => "gemini.api_key",
        "CF_ACCOUNT_ID" => "kv.account_id",
        "CF_KV_NAMESPACE_ID" => "kv.namespace_id",
        "CF_API_TOKEN" => "kv.api_token",
        other => return legacy_mode_key(other),
    };
    Some(mapped.to_string())
}

/// `TRIAL_BASIC_1K_COST` -> `quota.modes.basic_1k.cost`.
fn legacy_mode_key(key: &str) -> Option<String> {
    let rest = key.strip_prefix("TRIAL_")?.to_ascii_lowercase();
    let (mode, field) = rest.rsplit_once('_')?;
    if !MODE_KEYS.contains(&mode) || !matches!(field, "cost" | "limit") {
        return None;
    }
    Some(format!("quota.modes.{mode}.{field}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_keys_keep_underscores_after_section() {
        assert_eq!(
            map_prefixed_key("quota_global_daily_quota"),
            "quota.global_daily_quota"
        );
        assert_eq!(map_prefixed_key("KV_API_TOKEN"), "kv.api_token");
        assert_eq!(
            map_prefixed_key("generation_batch_parallelism"),
            "generation.batch_parallelism"
        );
    }

    #[test]
    fn prefixed_mode_keys_nest_under_modes() {
        assert_eq!(
            map_prefixed_key("quota_modes_batch_4k_limit"),
            "quota.modes.batch_4k.limit"
        );
    }

    #[test]
    fn legacy_keys_map_to_sections() {
        assert_eq!(
            legacy_key("TRIAL_GLOBAL_QUOTA").as_deref(),
            Some("quota.global_daily_quota")
        );
        assert_eq!(legacy_key("cf_api_token").as_deref(), Some("kv.api_token"));
        assert_eq!(
            legacy_key("TRIAL_BLEND_COST").as_deref(),
            Some("quota.modes.blend.cost")
        );
        assert_eq!(
            legacy_key("TRIAL_BASIC_4K_LIMIT").as_deref(),
            Some("quota.modes.basic_4k.limit")
        );
    }

    #[test]
    fn unrelated_env_is_ignored() {
        assert_eq!(legacy_key("PATH"), None);
        assert_eq!(legacy_key("TRIAL_VIDEO_COST"), None);
        assert_eq!(legacy_key("TRIAL_CHAT_WEIGHT"), None);
    }
}
