// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `nanolab doctor` command implementation.
//!
//! Runs diagnostic checks against the configuration, the quota store and
//! the generation API.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nanolab_agent::HealthMonitor;
use nanolab_config::NanolabConfig;
use nanolab_core::{HealthStatus, NanolabError, PluginAdapter, QuotaScope};
use nanolab_cost::QuotaTable;

use crate::runtime;

/// Status of a diagnostic check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Result of a single diagnostic check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub duration: Duration,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>, start: Instant) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            duration: start.elapsed(),
        }
    }
}

/// Run the `nanolab doctor` command.
pub async fn run_doctor(config: &NanolabConfig, plain: bool) -> Result<(), NanolabError> {
    let use_color = !plain && std::io::stdout().is_terminal();

    let mut results = vec![check_trial_mode(config), check_quota_table(config)];
    results.push(check_quota_store(config).await);
    results.push(check_api(config).await);

    println!();
    println!("  nanolab doctor");
    println!("  {}", "-".repeat(50));

    let mut issues = 0;
    for result in &results {
        if result.status != CheckStatus::Pass {
            issues += 1;
        }
        println!("{}", render_line(result, use_color));
    }

    println!();
    if issues > 0 {
        let issue_word = if issues == 1 { "issue" } else { "issues" };
        println!("  {issues} {issue_word} found.");
    } else {
        println!("  All checks passed.");
    }
    println!();

    Ok(())
}

fn render_line(result: &CheckResult, use_color: bool) -> String {
    use colored::Colorize;

    let duration_ms = result.duration.as_millis();
    let (tag, symbol, message) = match result.status {
        CheckStatus::Pass => ("[OK]  ", "✓".green(), result.message.normal()),
        CheckStatus::Warn => ("[WARN]", "!".yellow(), result.message.yellow()),
        CheckStatus::Fail => ("[FAIL]", "✗".red(), result.message.red()),
    };
    if use_color {
        format!("    {symbol} {:<20} {message} ({duration_ms}ms)", result.name)
    } else {
        format!("    {tag} {:<20} {} ({duration_ms}ms)", result.name, result.message)
    }
}

fn check_trial_mode(config: &NanolabConfig) -> CheckResult {
    let start = Instant::now();
    let trial = nanolab_cost::is_trial_mode(
        config.quota.force_trial_mode,
        None,
        config.gemini.api_key.as_deref(),
    );
    let message = if config.quota.force_trial_mode {
        "trial quota enforced (forced)"
    } else if trial {
        "no API key configured; sessions run on the trial quota"
    } else {
        "API key configured; trial quota not enforced"
    };
    CheckResult::new("Trial mode", CheckStatus::Pass, message, start)
}

fn check_quota_table(config: &NanolabConfig) -> CheckResult {
    let start = Instant::now();
    let table = QuotaTable::from_config(&config.quota);
    let warnings = table.warnings();
    match warnings.first() {
        None => CheckResult::new(
            "Quota table",
            CheckStatus::Pass,
            format!(
                "{:?} allocation, {} points/day",
                config.quota.allocation,
                table.global_limit()
            ),
            start,
        ),
        Some(first) => {
            let more = if warnings.len() > 1 {
                format!(" (+{} more)", warnings.len() - 1)
            } else {
                String::new()
            };
            CheckResult::new("Quota table", CheckStatus::Warn, format!("{first}{more}"), start)
        }
    }
}

async fn check_quota_store(config: &NanolabConfig) -> CheckResult {
    let start = Instant::now();
    let (store, scope) = match nanolab_storage::open_quota_store(&config.kv, runtime::clock()) {
        Ok(opened) => opened,
        Err(e) => return CheckResult::new("Quota storage", CheckStatus::Fail, e.to_string(), start),
    };

    match store.health_check().await {
        Ok(HealthStatus::Healthy) if scope == QuotaScope::Global => CheckResult::new(
            "Quota storage",
            CheckStatus::Pass,
            format!("{} reachable, quota is global", store.name()),
            start,
        ),
        Ok(HealthStatus::Healthy) => CheckResult::new(
            "Quota storage",
            CheckStatus::Warn,
            "KV not configured, quota is per session",
            start,
        ),
        Ok(HealthStatus::Unhealthy(reason)) => {
            CheckResult::new("Quota storage", CheckStatus::Fail, reason, start)
        }
        Ok(HealthStatus::Unknown) => {
            CheckResult::new("Quota storage", CheckStatus::Warn, "status unknown", start)
        }
        Err(e) => CheckResult::new("Quota storage", CheckStatus::Fail, e.to_string(), start),
    }
}

async fn check_api(config: &NanolabConfig) -> CheckResult {
    let start = Instant::now();
    let client = match runtime::gemini_client(config, None) {
        Ok(client) => client,
        Err(_) => {
            return CheckResult::new(
                "Generation API",
                CheckStatus::Warn,
                "no API key configured, probe skipped",
                start,
            );
        }
    };

    let monitor = HealthMonitor::from_config(Arc::new(client), runtime::clock(), &config.health);
    let result = monitor.check().await;
    let status = if result.is_healthy() {
        CheckStatus::Pass
    } else {
        CheckStatus::Fail
    };
    CheckResult::new("Generation API", status, result.message, start)
}
