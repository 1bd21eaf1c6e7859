// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Billing buckets, their limits, and the trial-mode gate.
//!
//! Generation modes are billed against seven buckets. Limits come either
//! from configuration (`manual`) or from fixed shares of the global daily
//! quota (`auto`).

use nanolab_config::{ModeQuotaTable, QuotaAllocation, QuotaConfig};
use serde::Serialize;
use tracing::{info, warn};

/// Bucket key, display name, auto-allocation share, cost in auto mode.
const BUCKETS: &[(&str, &str, f64, u64)] = &[
    ("basic_1k", "Basic (1K/2K)", 0.60, 1),
    ("basic_4k", "Basic (4K)", 0.20, 3),
    ("chat", "Chat", 0.40, 1),
    ("batch_1k", "Batch (1K/2K)", 0.30, 1),
    ("batch_4k", "Batch (4K)", 0.10, 3),
    ("search", "Search", 0.30, 2),
    ("blend", "Blend/Style", 0.20, 2),
];

/// Map a generation mode and resolution onto its billing bucket.
///
/// `template` bills as `basic`. Modes without a bucket map to themselves
/// and are rejected when looked up.
pub fn mode_key(mode: &str, resolution: &str) -> String {
    let high_res = resolution.eq_ignore_ascii_case("4K");
    match mode.to_ascii_lowercase().as_str() {
        "basic" | "template" if high_res => "basic_4k".to_string(),
        "basic" | "template" => "basic_1k".to_string(),
        "batch" if high_res => "batch_4k".to_string(),
        "batch" => "batch_1k".to_string(),
        "blend" | "style" => "blend".to_string(),
        other => other.to_string(),
    }
}

/// Cost and daily limit of one billing bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeLimit {
    pub key: &'static str,
    pub display_name: &'static str,
    /// Global points charged per unit.
    pub cost: u64,
    /// Units allowed per UTC day.
    pub daily_limit: u64,
}

/// The resolved limits a ledger enforces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaTable {
    global_limit: u64,
    modes: Vec<ModeLimit>,
}

impl QuotaTable {
    pub fn from_config(config: &QuotaConfig) -> Self {
        let global = u64::from(config.global_daily_quota);
        match config.allocation {
            QuotaAllocation::Auto => Self::auto(global),
            QuotaAllocation::Manual => Self::manual(global, &config.modes),
        }
    }

    /// Limits taken verbatim from configuration.
    pub fn manual(global_limit: u64, modes: &ModeQuotaTable) -> Self {
        let modes = modes
            .entries()
            .into_iter()
            .map(|(key, quota)| ModeLimit {
                key,
                display_name: display_name(key),
                cost: u64::from(quota.cost),
                daily_limit: u64::from(quota.limit),
            })
            .collect();
        Self {
            global_limit,
            modes,
        }
    }

    /// Limits derived from shares of the global quota:
    /// `max(1, floor(global * share / cost))`.
    pub fn auto(global_limit: u64) -> Self {
        let modes = BUCKETS
            .iter()
            .map(|&(key, display_name, share, cost)| {
                let allocated = global_limit as f64 * share;
                let daily_limit = ((allocated / cost as f64).floor() as u64).max(1);
                ModeLimit {
                    key,
                    display_name,
                    cost,
                    daily_limit,
                }
            })
            .collect();
        Self {
            global_limit,
            modes,
        }
    }

    pub fn global_limit(&self) -> u64 {
        self.global_limit
    }

    pub fn modes(&self) -> &[ModeLimit] {
        &self.modes
    }

    pub fn get(&self, key: &str) -> Option<&ModeLimit> {
        self.modes.iter().find(|m| m.key == key)
    }

    /// Configuration smells worth flagging at startup. None of them stop
    /// the ledger from working.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let mut total = 0u64;
        for mode in &self.modes {
            let max_points = mode.daily_limit.saturating_mul(mode.cost);
            total = total.saturating_add(max_points);
            if max_points > self.global_limit {
                warnings.push(format!(
                    "{} can use {max_points} points (limit: {} x cost: {}), which exceeds global quota ({})",
                    mode.display_name, mode.daily_limit, mode.cost, self.global_limit
                ));
            }
        }
        if total > self.global_limit.saturating_mul(3) {
            warnings.push(format!(
                "Total possible usage ({total} points) is much higher than global quota ({}). \
                 Consider reducing mode limits or increasing global quota.",
                self.global_limit
            ));
        }
        warnings
    }

    /// Log the allocation in use and any warnings.
    pub fn log_summary(&self, allocation: QuotaAllocation) {
        info!(
            allocation = ?allocation,
            global_limit = self.global_limit,
            "trial quota table loaded"
        );
        for warning in self.warnings() {
            warn!(%warning, "trial quota configuration");
        }
    }
}

fn display_name(key: &str) -> &'static str {
    BUCKETS
        .iter()
        .find(|(k, ..)| *k == key)
        .map(|(_, name, ..)| *name)
        .unwrap_or("Unknown")
}

/// Whether a session must go through the trial quota.
///
/// Forced trial wins. Otherwise a session is a trial session when neither
/// the user nor the deployment supplied a non-empty API key.
pub fn is_trial_mode(force: bool, user_key: Option<&str>, env_key: Option<&str>) -> bool {
    if force {
        return true;
    }
    let present = |key: Option<&str>| key.is_some_and(|k| !k.trim().is_empty());
    !(present(user_key) || present(env_key))
}
