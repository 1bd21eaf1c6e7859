// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic API health probe.
//!
//! The [`HealthMonitor`] sends a tiny text request through
//! [`GenerationClient::probe`] and caches the outcome. A probe is never
//! aborted; a slow answer is reported as unhealthy after the fact.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nanolab_config::HealthConfig;
use nanolab_core::{Clock, GenerationClient, HealthStatus};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Characters of the raw error kept in the fallback message.
const RAW_ERROR_CHARS: usize = 50;

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    /// Short message for display.
    pub message: String,
    pub response_time: Duration,
    pub checked_at: DateTime<Utc>,
    /// Raw error or failure reason, when unhealthy.
    pub error: Option<String>,
}

impl HealthCheckResult {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Map a probe error onto a short display message.
pub fn describe_probe_error(error: &str) -> String {
    let lower = error.to_lowercase();
    if lower.contains("api_key") || lower.contains("invalid") {
        "Invalid API key".to_string()
    } else if lower.contains("quota") || lower.contains("rate") {
        "API quota/rate limit exceeded".to_string()
    } else if lower.contains("server disconnected") {
        "Server disconnected".to_string()
    } else if lower.contains("timeout") {
        "Connection timeout".to_string()
    } else if lower.contains("network") || lower.contains("connection") {
        "Network error".to_string()
    } else {
        let head: String = error.chars().take(RAW_ERROR_CHARS).collect();
        format!("API error: {head}")
    }
}

/// Probes the remote API and remembers the last result.
pub struct HealthMonitor {
    client: Arc<dyn GenerationClient>,
    clock: Arc<dyn Clock>,
    slow_threshold: Duration,
    interval: Duration,
    last: Mutex<Option<HealthCheckResult>>,
}

impl HealthMonitor {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        clock: Arc<dyn Clock>,
        slow_threshold: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            clock,
            slow_threshold,
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn from_config(
        client: Arc<dyn GenerationClient>,
        clock: Arc<dyn Clock>,
        config: &HealthConfig,
    ) -> Self {
        Self::new(
            client,
            clock,
            Duration::from_secs(config.slow_threshold_secs),
            Duration::from_secs(config.interval_secs),
        )
    }

    /// True when never checked, or the interval has elapsed since the last
    /// check.
    pub async fn should_check(&self) -> bool {
        match self.last.lock().await.as_ref() {
            None => true,
            Some(last) => {
                let since = (self.clock.now() - last.checked_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                since >= self.interval
            }
        }
    }

    /// The cached result, or `Unknown` / "Not checked yet".
    pub async fn last_result(&self) -> HealthCheckResult {
        match self.last.lock().await.as_ref() {
            Some(last) => last.clone(),
            None => HealthCheckResult {
                status: HealthStatus::Unknown,
                message: "Not checked yet".to_string(),
                response_time: Duration::ZERO,
                checked_at: DateTime::<Utc>::UNIX_EPOCH,
                error: None,
            },
        }
    }

    /// Probe now and cache the outcome.
    pub async fn check(&self) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = self.client.probe().await;
        let response_time = started.elapsed();
        let secs = response_time.as_secs_f64();

        let (status, message, error) = match outcome {
            Ok(_) if response_time > self.slow_threshold => (
                HealthStatus::Unhealthy("slow response".to_string()),
                format!("API slow ({secs:.1}s)"),
                Some("Slow response".to_string()),
            ),
            Ok(true) => (
                HealthStatus::Healthy,
                format!("API is responsive ({secs:.1}s)"),
                None,
            ),
            Ok(false) => (
                HealthStatus::Unhealthy("empty response".to_string()),
                "API returned empty response".to_string(),
                Some("Empty response".to_string()),
            ),
            Err(e) => {
                let raw = e.to_string();
                warn!(error = %raw, "health check failed");
                let message = describe_probe_error(&raw);
                (HealthStatus::Unhealthy(message.clone()), message, Some(raw))
            }
        };

        let result = HealthCheckResult {
            status,
            message,
            response_time,
            checked_at: self.clock.now(),
            error,
        };
        debug!(
            healthy = result.is_healthy(),
            response_ms = response_time.as_millis() as u64,
            message = %result.message,
            "health check complete"
        );
        *self.last.lock().await = Some(result.clone());
        result
    }

    /// Probe only when [`should_check`](Self::should_check) says so;
    /// otherwise return the cached result.
    pub async fn check_if_due(&self) -> HealthCheckResult {
        if self.should_check().await {
            self.check().await
        } else {
            self.last_result().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_error_messages() {
        assert_eq!(describe_probe_error("API_KEY_INVALID"), "Invalid API key");
        assert_eq!(
            describe_probe_error("429 Resource has been exhausted (quota)"),
            "API quota/rate limit exceeded"
        );
        assert_eq!(
            describe_probe_error("Server disconnected without sending a response"),
            "Server disconnected"
        );
        assert_eq!(describe_probe_error("read timeout"), "Connection timeout");
        assert_eq!(describe_probe_error("network unreachable"), "Network error");
        let long = "x".repeat(80);
        assert_eq!(describe_probe_error(&long), format!("API error: {}", "x".repeat(50)));
    }
}
