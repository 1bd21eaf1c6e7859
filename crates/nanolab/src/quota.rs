// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `nanolab quota` and `nanolab cost` command implementations.

use std::io::IsTerminal;

use nanolab_config::NanolabConfig;
use nanolab_core::NanolabError;
use nanolab_cost::{QuotaDecision, QuotaStatus, estimate_cost, format_cost};

use crate::runtime;

/// Run `nanolab quota status`.
///
/// With `--json` the full report is printed for scripting. Otherwise one
/// line per bucket, colored when stdout is a TTY and `--plain` is unset.
pub async fn run_status(config: &NanolabConfig, json: bool, plain: bool) -> Result<(), NanolabError> {
    let quota = runtime::open_quota(config, runtime::clock())?;
    let status = quota.get_quota_status().await?;

    if json {
        let body = serde_json::to_string_pretty(&status)
            .map_err(|e| NanolabError::Internal(format!("failed to encode status: {e}")))?;
        println!("{body}");
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        for line in render_status(&status, use_color) {
            println!("{line}");
        }
    }
    Ok(())
}

fn render_status(status: &QuotaStatus, use_color: bool) -> Vec<String> {
    use colored::Colorize;

    let mut lines = vec![
        String::new(),
        format!("  nanolab quota ({})", status.date),
        format!("  {}", "-".repeat(50)),
    ];

    let global = format!(
        "{}/{} used, {} remaining",
        status.global_used, status.global_limit, status.global_remaining
    );
    let global = if !use_color {
        global
    } else if status.global_remaining == 0 {
        global.red().to_string()
    } else {
        global.green().to_string()
    };
    lines.push(format!("    {:<16} {global}", "Global"));

    for mode in &status.modes {
        let usage = format!("{}/{}", mode.used, mode.limit);
        let usage = if use_color && mode.remaining == 0 {
            usage.yellow().to_string()
        } else {
            usage
        };
        lines.push(format!(
            "    {:<16} {usage:<8} (cost {} per image)",
            mode.name, mode.cost
        ));
    }

    lines.push(String::new());
    lines.push(format!("  Storage: {}", status.storage));
    lines.push(String::new());
    lines
}

/// Run `nanolab quota check`. Does not consume.
pub async fn run_check(
    config: &NanolabConfig,
    mode: &str,
    resolution: &str,
    count: u32,
) -> Result<(), NanolabError> {
    let quota = runtime::open_quota(config, runtime::clock())?;
    let decision = quota.check_quota(mode, resolution, count).await?;
    println!("{}", describe_decision(&decision));
    decision.into_result().map(|_| ())
}

fn describe_decision(decision: &QuotaDecision) -> String {
    match decision {
        QuotaDecision::Allowed(usage) => format!(
            "allowed: {} ({}/{} used), global {}/{} used, cost {}",
            usage.mode,
            usage.mode_used,
            usage.mode_limit,
            usage.global_used,
            usage.global_limit,
            usage.cost
        ),
        QuotaDecision::Denied(denial) => format!("denied: {denial}"),
    }
}

/// Run `nanolab quota reset`.
pub async fn run_reset(config: &NanolabConfig) -> Result<(), NanolabError> {
    let quota = runtime::open_quota(config, runtime::clock())?;
    if quota.reset_quota().await? {
        println!("Trial quota reset for today ({}).", quota.scope());
        Ok(())
    } else {
        Err(NanolabError::Internal("quota reset was not persisted".to_string()))
    }
}

/// Run `nanolab cost`.
pub fn run_cost(resolution: &str, count: u32) {
    println!("{}", format_cost(&estimate_cost(resolution, count)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanolab_core::QuotaScope;
    use nanolab_cost::{ModeStatus, QuotaDenial};

    fn status() -> QuotaStatus {
        QuotaStatus {
            date: "2026-03-14".into(),
            global_used: 50,
            global_limit: 50,
            global_remaining: 0,
            modes: vec![ModeStatus {
                key: "basic_1k".into(),
                name: "Basic (1K/2K)".into(),
                used: 30,
                limit: 30,
                remaining: 0,
                cost: 1,
            }],
            storage: QuotaScope::PerSession.label().into(),
            scope: QuotaScope::PerSession,
        }
    }

    #[test]
    fn plain_status_lists_global_and_buckets() {
        let lines = render_status(&status(), false);
        assert!(lines.iter().any(|l| l.contains("Global") && l.contains("50/50 used, 0 remaining")));
        assert!(lines.iter().any(|l| l.contains("Basic (1K/2K)") && l.contains("30/30")));
        assert!(lines.iter().any(|l| l.contains("Storage: Session (Fallback)")));
    }

    #[test]
    fn denial_is_described_with_its_message() {
        let decision = QuotaDecision::Denied(QuotaDenial::Cooldown { wait_secs: 2 });
        assert_eq!(
            describe_decision(&decision),
            "denied: Please wait 2s before next generation"
        );
    }
}
