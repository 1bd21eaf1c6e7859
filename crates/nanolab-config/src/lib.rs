// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for the Nanolab generation core.
//!
//! TOML files in the XDG hierarchy are merged with environment overrides
//! (both `NANOLAB_*` and the legacy `TRIAL_*` / `CF_*` deployment keys),
//! extracted with `deny_unknown_fields`, then validated. Failures render as
//! miette diagnostics with typo suggestions.
//!
//! ```no_run
//! use nanolab_config::load_and_validate;
//!
//! let config = load_and_validate().expect("config errors");
//! println!("global quota: {}", config.quota.global_daily_quota);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

pub use diagnostic::{render_errors, ConfigError};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::{
    GeminiConfig, GenerationConfig, HealthConfig, KvConfig, ModeQuota, ModeQuotaTable,
    NanolabConfig, QuotaAllocation, QuotaConfig, RetryConfig,
};

/// Load from the XDG hierarchy plus environment, then validate.
pub fn load_and_validate() -> Result<NanolabConfig, Vec<ConfigError>> {
    match loader::load_config() {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => Err(diagnostic::figment_to_config_errors(
            err,
            &collect_toml_sources(),
        )),
    }
}

/// Load from an explicit file plus environment, then validate.
pub fn load_and_validate_path(path: &std::path::Path) -> Result<NanolabConfig, Vec<ConfigError>> {
    match loader::load_config_from_path(path) {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => {
            let sources = std::fs::read_to_string(path)
                .map(|content| vec![(path.display().to_string(), content)])
                .unwrap_or_default();
            Err(diagnostic::figment_to_config_errors(err, &sources))
        }
    }
}

/// Load from a TOML string over the defaults, then validate.
pub fn load_and_validate_str(toml_content: &str) -> Result<NanolabConfig, Vec<ConfigError>> {
    match loader::load_config_from_str(toml_content) {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => {
            let sources = vec![("<inline>".to_string(), toml_content.to_string())];
            Err(diagnostic::figment_to_config_errors(err, &sources))
        }
    }
}

/// Read whichever config files exist so diagnostics can point into them.
fn collect_toml_sources() -> Vec<(String, String)> {
    let local = std::env::current_dir()
        .map(|d| d.join(loader::LOCAL_CONFIG))
        .unwrap_or_else(|_| loader::LOCAL_CONFIG.into());

    [
        local,
        loader::user_config_path(),
        std::path::PathBuf::from(loader::SYSTEM_CONFIG),
    ]
    .into_iter()
    .filter_map(|path| {
        std::fs::read_to_string(&path)
            .ok()
            .map(|content| (path.display().to_string(), content))
    })
    .collect()
}
