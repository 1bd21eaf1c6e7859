// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Daily trial quota ledger over a [`BlobStore`].
//!
//! One JSON document per UTC day holds the global point total, per-bucket
//! unit counts, and the time of the last consumption. A document whose date
//! is not today is treated as empty, which is how the day rolls over.
//!
//! The ledger itself does no locking. In-process callers go through
//! [`QuotaService`](crate::service::QuotaService), which owns the ledger and
//! runs every operation on one task.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use nanolab_core::{BlobStore, Clock, NanolabError, QuotaScope};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::quota::{mode_key, ModeLimit, QuotaTable};

/// Expiry set on each day's document.
pub const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(2 * 24 * 60 * 60);

/// Persisted usage for one UTC day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaEntry {
    pub date: String,
    #[serde(default)]
    pub global_used: u64,
    #[serde(default)]
    pub mode_usage: BTreeMap<String, u64>,
    /// Unix seconds of the last consumption; 0 when none today.
    #[serde(default)]
    pub last_generation: f64,
}

impl QuotaEntry {
    pub fn empty(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            ..Self::default()
        }
    }

    fn mode_used(&self, key: &str) -> u64 {
        self.mode_usage.get(key).copied().unwrap_or(0)
    }
}

/// Snapshot returned with an allowed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub global_used: u64,
    pub global_limit: u64,
    pub global_remaining: u64,
    /// Display name of the bucket.
    pub mode: String,
    pub mode_key: String,
    pub mode_used: u64,
    pub mode_limit: u64,
    pub mode_remaining: u64,
    /// Points this request costs.
    pub cost: u64,
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuotaDenial {
    UnknownMode,
    Cooldown {
        wait_secs: u64,
    },
    GlobalExceeded {
        used: u64,
        limit: u64,
        remaining: u64,
    },
    ModeExceeded {
        mode: String,
        used: u64,
        limit: u64,
        remaining: u64,
    },
}

impl std::fmt::Display for QuotaDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownMode => f.write_str("Invalid generation mode"),
            Self::Cooldown { wait_secs } => {
                write!(f, "Please wait {wait_secs}s before next generation")
            }
            Self::GlobalExceeded { used, limit, .. } => {
                write!(f, "Daily global quota exceeded ({used}/{limit} used)")
            }
            Self::ModeExceeded {
                mode, used, limit, ..
            } => write!(f, "{mode} daily limit exceeded ({used}/{limit} used)"),
        }
    }
}

impl From<QuotaDenial> for NanolabError {
    fn from(denial: QuotaDenial) -> Self {
        match denial {
            QuotaDenial::Cooldown { wait_secs } => NanolabError::CooldownActive { wait_secs },
            QuotaDenial::UnknownMode => NanolabError::InvalidInput(denial.to_string()),
            other => NanolabError::QuotaExceeded(other.to_string()),
        }
    }
}

/// Outcome of a quota check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "detail", rename_all = "snake_case")]
pub enum QuotaDecision {
    Allowed(QuotaUsage),
    Denied(QuotaDenial),
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    /// `"OK"` or the denial message.
    pub fn reason(&self) -> String {
        match self {
            Self::Allowed(_) => "OK".to_string(),
            Self::Denied(denial) => denial.to_string(),
        }
    }

    /// Convert into a `Result`, mapping denials onto [`NanolabError`].
    pub fn into_result(self) -> Result<QuotaUsage, NanolabError> {
        match self {
            Self::Allowed(usage) => Ok(usage),
            Self::Denied(denial) => Err(denial.into()),
        }
    }
}

/// Per-bucket line of a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeStatus {
    pub key: String,
    pub name: String,
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
    pub cost: u64,
}

/// Full quota report for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub date: String,
    pub global_used: u64,
    pub global_limit: u64,
    pub global_remaining: u64,
    pub modes: Vec<ModeStatus>,
    /// Storage label, e.g. `Cloudflare KV`.
    pub storage: String,
    pub scope: QuotaScope,
}

/// The trial quota ledger.
pub struct QuotaLedger {
    store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    table: QuotaTable,
    cooldown: Duration,
    scope: QuotaScope,
    entry_ttl: Duration,
}

impl QuotaLedger {
    pub fn new(
        store: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        table: QuotaTable,
        cooldown: Duration,
        scope: QuotaScope,
    ) -> Self {
        Self {
            store,
            clock,
            table,
            cooldown,
            scope,
            entry_ttl: DEFAULT_ENTRY_TTL,
        }
    }

    pub fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    pub fn scope(&self) -> QuotaScope {
        self.scope
    }

    pub fn table(&self) -> &QuotaTable {
        &self.table
    }

    /// Store key of the document for `date`.
    pub fn storage_key(date: &str) -> String {
        format!("quota/{date}.json")
    }

    /// Can `count` units of `mode` at `resolution` be generated right now?
    pub async fn check_quota(&self, mode: &str, resolution: &str, count: u32) -> QuotaDecision {
        let key = mode_key(mode, resolution);
        let Some(limit) = self.table.get(&key) else {
            return QuotaDecision::Denied(QuotaDenial::UnknownMode);
        };
        let entry = self.load().await;
        self.evaluate(&entry, limit, u64::from(count))
    }

    /// Record `count` units unconditionally. Returns whether the write
    /// reached the store.
    pub async fn consume_quota(&self, mode: &str, resolution: &str, count: u32) -> bool {
        let key = mode_key(mode, resolution);
        let Some(limit) = self.table.get(&key).cloned() else {
            warn!(mode, resolution, "consume requested for unknown quota bucket");
            return false;
        };
        let mut entry = self.load().await;
        self.apply(&mut entry, &limit, u64::from(count));
        self.save(&entry).await
    }

    /// Check and consume as one step.
    pub async fn reserve(&self, mode: &str, resolution: &str, count: u32) -> QuotaDecision {
        let key = mode_key(mode, resolution);
        let Some(limit) = self.table.get(&key).cloned() else {
            return QuotaDecision::Denied(QuotaDenial::UnknownMode);
        };
        let mut entry = self.load().await;
        let decision = self.evaluate(&entry, &limit, u64::from(count));
        if decision.is_allowed() {
            self.apply(&mut entry, &limit, u64::from(count));
            if !self.save(&entry).await {
                warn!(mode_key = %key, count, "quota reservation was not persisted");
            }
        }
        decision
    }

    /// Give back `count` units reserved earlier. Counters never go below
    /// zero and the cooldown stamp is left alone.
    pub async fn refund(&self, mode: &str, resolution: &str, count: u32) -> bool {
        if count == 0 {
            return true;
        }
        let key = mode_key(mode, resolution);
        let Some(limit) = self.table.get(&key) else {
            return false;
        };
        let units = u64::from(count);
        let mut entry = self.load().await;
        entry.global_used = entry
            .global_used
            .saturating_sub(limit.cost.saturating_mul(units));
        let used = entry.mode_usage.entry(key.clone()).or_insert(0);
        *used = used.saturating_sub(units);
        debug!(mode_key = %key, count, "refunding quota");
        self.save(&entry).await
    }

    /// Report for today.
    pub async fn get_quota_status(&self) -> QuotaStatus {
        let entry = self.load().await;
        let global_limit = self.table.global_limit();
        let modes = self
            .table
            .modes()
            .iter()
            .map(|m| {
                let used = entry.mode_used(m.key);
                ModeStatus {
                    key: m.key.to_string(),
                    name: m.display_name.to_string(),
                    used,
                    limit: m.daily_limit,
                    remaining: m.daily_limit.saturating_sub(used),
                    cost: m.cost,
                }
            })
            .collect();

        QuotaStatus {
            date: entry.date.clone(),
            global_used: entry.global_used,
            global_limit,
            global_remaining: global_limit.saturating_sub(entry.global_used),
            modes,
            storage: self.scope.label().to_string(),
            scope: self.scope,
        }
    }

    /// Overwrite today's document with an empty one.
    pub async fn reset_quota(&self) -> bool {
        let entry = QuotaEntry::empty(self.clock.today());
        info!(date = %entry.date, "resetting trial quota");
        self.save(&entry).await
    }

    fn evaluate(&self, entry: &QuotaEntry, limit: &ModeLimit, count: u64) -> QuotaDecision {
        if let Some(wait_secs) = self.cooldown_remaining(entry) {
            return QuotaDecision::Denied(QuotaDenial::Cooldown { wait_secs });
        }

        let global_limit = self.table.global_limit();
        let global_remaining = global_limit.saturating_sub(entry.global_used);
        let total_cost = limit.cost.saturating_mul(count);
        if total_cost > global_remaining {
            return QuotaDecision::Denied(QuotaDenial::GlobalExceeded {
                used: entry.global_used,
                limit: global_limit,
                remaining: global_remaining,
            });
        }

        let mode_used = entry.mode_used(limit.key);
        let mode_remaining = limit.daily_limit.saturating_sub(mode_used);
        if count > mode_remaining {
            return QuotaDecision::Denied(QuotaDenial::ModeExceeded {
                mode: limit.display_name.to_string(),
                used: mode_used,
                limit: limit.daily_limit,
                remaining: mode_remaining,
            });
        }

        QuotaDecision::Allowed(QuotaUsage {
            global_used: entry.global_used,
            global_limit,
            global_remaining,
            mode: limit.display_name.to_string(),
            mode_key: limit.key.to_string(),
            mode_used,
            mode_limit: limit.daily_limit,
            mode_remaining,
            cost: total_cost,
        })
    }

    /// Whole seconds left on the cooldown, rounded up, or `None` when a
    /// generation may start.
    fn cooldown_remaining(&self, entry: &QuotaEntry) -> Option<u64> {
        if self.cooldown.is_zero() || entry.last_generation <= 0.0 {
            return None;
        }
        let cooldown = self.cooldown.as_secs_f64();
        let elapsed = self.now_secs() - entry.last_generation;
        if elapsed >= cooldown {
            return None;
        }
        // A clock that moved backwards never asks for more than the cooldown.
        let wait = (cooldown - elapsed.max(0.0)).ceil() as u64;
        Some(wait.clamp(1, self.cooldown.as_secs().max(1)))
    }

    fn apply(&self, entry: &mut QuotaEntry, limit: &ModeLimit, count: u64) {
        entry.global_used = entry
            .global_used
            .saturating_add(limit.cost.saturating_mul(count));
        let used = entry.mode_usage.entry(limit.key.to_string()).or_insert(0);
        *used = used.saturating_add(count);
        entry.last_generation = self.now_secs();
    }

    fn now_secs(&self) -> f64 {
        self.clock.now().timestamp_millis() as f64 / 1000.0
    }

    async fn load(&self) -> QuotaEntry {
        let today = self.clock.today();
        let key = Self::storage_key(&today);
        match self.store.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<QuotaEntry>(&bytes) {
                Ok(entry) if entry.date == today => entry,
                Ok(entry) => {
                    debug!(stored = %entry.date, %today, "quota entry is from another day, starting fresh");
                    QuotaEntry::empty(today)
                }
                Err(e) => {
                    warn!(%key, error = %e, "unreadable quota entry, treating as empty");
                    QuotaEntry::empty(today)
                }
            },
            Ok(None) => QuotaEntry::empty(today),
            Err(e) => {
                warn!(%key, error = %e, "failed to load quota entry, treating as empty");
                QuotaEntry::empty(today)
            }
        }
    }

    async fn save(&self, entry: &QuotaEntry) -> bool {
        let key = Self::storage_key(&entry.date);
        let bytes = match serde_json::to_vec(entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%key, error = %e, "failed to encode quota entry");
                return false;
            }
        };
        match self.store.put(&key, bytes, Some(self.entry_ttl)).await {
            Ok(()) => {
                debug!(
                    %key,
                    global_used = entry.global_used,
                    "quota entry saved"
                );
                true
            }
            Err(e) => {
                warn!(%key, error = %e, "failed to save quota entry");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use nanolab_config::{ModeQuota, ModeQuotaTable};
    use nanolab_core::{AdapterType, HealthStatus, ManualClock, PluginAdapter};
    use nanolab_storage::MemoryStore;

    use super::*;

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap()
    }

    fn ledger_with(
        table: QuotaTable,
        cooldown_secs: u64,
    ) -> (QuotaLedger, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let ledger = QuotaLedger::new(
            store.clone(),
            clock.clone(),
            table,
            Duration::from_secs(cooldown_secs),
            QuotaScope::PerSession,
        );
        (ledger, clock, store)
    }

    fn default_ledger(cooldown_secs: u64) -> (QuotaLedger, Arc<ManualClock>, Arc<MemoryStore>) {
        ledger_with(QuotaTable::manual(50, &ModeQuotaTable::default()), cooldown_secs)
    }

    #[tokio::test]
    async fn unknown_mode_is_denied() {
        let (ledger, _, _) = default_ledger(0);
        let decision = ledger.check_quota("video", "1K", 1).await;
        assert_eq!(decision, QuotaDecision::Denied(QuotaDenial::UnknownMode));
        assert_eq!(decision.reason(), "Invalid generation mode");
        assert!(!ledger.consume_quota("video", "1K", 1).await);
    }

    #[tokio::test]
    async fn fresh_day_allows_with_snapshot() {
        let (ledger, _, _) = default_ledger(3);
        let QuotaDecision::Allowed(usage) = ledger.check_quota("basic", "4K", 2).await else {
            panic!("expected allowed");
        };
        assert_eq!(usage.global_remaining, 50);
        assert_eq!(usage.mode, "Basic (4K)");
        assert_eq!(usage.mode_limit, 10);
        assert_eq!(usage.cost, 6);
    }

    #[tokio::test]
    async fn mode_cap_is_enforced() {
        let mut modes = ModeQuotaTable::default();
        modes.basic_4k = ModeQuota { cost: 3, limit: 10 };
        let (ledger, clock, _) = ledger_with(QuotaTable::manual(100, &modes), 0);

        // 6 units used at cost 3.
        assert!(ledger.consume_quota("basic", "4K", 6).await);
        clock.advance(chrono::Duration::seconds(10));

        let denied = ledger.check_quota("basic", "4K", 5).await;
        assert_eq!(
            denied,
            QuotaDecision::Denied(QuotaDenial::ModeExceeded {
                mode: "Basic (4K)".into(),
                used: 6,
                limit: 10,
                remaining: 4,
            })
        );
        assert_eq!(
            denied.reason(),
            "Basic (4K) daily limit exceeded (6/10 used)"
        );
        assert!(ledger.check_quota("basic", "4K", 4).await.is_allowed());
    }

    #[tokio::test]
    async fn global_cap_is_enforced_in_points() {
        let mut modes = ModeQuotaTable::default();
        modes.basic_4k = ModeQuota { cost: 3, limit: 10 };
        let (ledger, _, _) = ledger_with(QuotaTable::manual(24, &modes), 0);

        assert!(ledger.consume_quota("basic", "4K", 6).await);
        // 18 of 24 points used: 2 more units cost 6 -> fits exactly,
        // 3 more cost 9 -> over.
        assert!(ledger.check_quota("basic", "4K", 2).await.is_allowed());
        let denied = ledger.check_quota("basic", "4K", 3).await;
        assert_eq!(
            denied,
            QuotaDecision::Denied(QuotaDenial::GlobalExceeded {
                used: 18,
                limit: 24,
                remaining: 6,
            })
        );
        assert_eq!(denied.reason(), "Daily global quota exceeded (18/24 used)");
    }

    #[tokio::test]
    async fn limit_ten_cost_three_six_used() {
        let mut modes = ModeQuotaTable::default();
        modes.basic_4k = ModeQuota { cost: 3, limit: 10 };
        let (ledger, _, _) = ledger_with(QuotaTable::manual(10, &modes), 0);

        // Two 4K images spend 6 of 10 points.
        assert!(ledger.consume_quota("basic", "4K", 2).await);
        assert_eq!(
            ledger.check_quota("basic", "4K", 2).await,
            QuotaDecision::Denied(QuotaDenial::GlobalExceeded {
                used: 6,
                limit: 10,
                remaining: 4,
            })
        );
        assert!(ledger.check_quota("basic", "4K", 1).await.is_allowed());
    }

    #[tokio::test]
    async fn cooldown_blocks_then_expires() {
        let (ledger, clock, _) = default_ledger(3);
        assert!(ledger.consume_quota("chat", "1K", 1).await);

        clock.advance(chrono::Duration::milliseconds(500));
        let decision = ledger.check_quota("chat", "1K", 1).await;
        assert_eq!(
            decision,
            QuotaDecision::Denied(QuotaDenial::Cooldown { wait_secs: 3 })
        );
        assert_eq!(decision.reason(), "Please wait 3s before next generation");

        clock.advance(chrono::Duration::milliseconds(1_600));
        assert_eq!(
            ledger.check_quota("chat", "1K", 1).await,
            QuotaDecision::Denied(QuotaDenial::Cooldown { wait_secs: 1 })
        );

        clock.advance(chrono::Duration::seconds(1));
        assert!(ledger.check_quota("chat", "1K", 1).await.is_allowed());
    }

    #[tokio::test]
    async fn zero_cooldown_never_denies() {
        let (ledger, _, _) = default_ledger(0);
        assert!(ledger.consume_quota("chat", "1K", 1).await);
        assert!(ledger.check_quota("chat", "1K", 1).await.is_allowed());
    }

    #[tokio::test]
    async fn usage_rolls_over_at_utc_midnight() {
        let (ledger, clock, _) = default_ledger(0);
        clock.set(Utc.with_ymd_and_hms(2026, 5, 4, 23, 59, 0).unwrap());
        assert!(ledger.consume_quota("search", "1K", 3).await);
        assert_eq!(ledger.get_quota_status().await.global_used, 6);

        clock.advance(chrono::Duration::minutes(2));
        let status = ledger.get_quota_status().await;
        assert_eq!(status.date, "2026-05-05");
        assert_eq!(status.global_used, 0);
        assert!(status.modes.iter().all(|m| m.used == 0));
    }

    #[tokio::test]
    async fn stale_document_under_todays_key_is_ignored() {
        let (ledger, clock, store) = default_ledger(0);
        let stale = QuotaEntry {
            date: "2026-05-03".into(),
            global_used: 49,
            ..QuotaEntry::default()
        };
        store
            .put(
                &QuotaLedger::storage_key(&clock.today()),
                serde_json::to_vec(&stale).unwrap(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(ledger.get_quota_status().await.global_used, 0);
    }

    #[tokio::test]
    async fn corrupt_document_degrades_to_empty() {
        let (ledger, clock, store) = default_ledger(0);
        store
            .put(
                &QuotaLedger::storage_key(&clock.today()),
                b"{not json".to_vec(),
                None,
            )
            .await
            .unwrap();
        assert!(ledger.check_quota("chat", "1K", 1).await.is_allowed());
    }

    #[tokio::test]
    async fn reserve_then_refund_restores_counters() {
        let (ledger, _, _) = default_ledger(0);
        assert!(ledger.reserve("blend", "1K", 2).await.is_allowed());
        let status = ledger.get_quota_status().await;
        assert_eq!(status.global_used, 4);

        assert!(ledger.refund("style", "1K", 2).await);
        let status = ledger.get_quota_status().await;
        assert_eq!(status.global_used, 0);
        let blend = status.modes.iter().find(|m| m.key == "blend").unwrap();
        assert_eq!(blend.used, 0);
    }

    #[tokio::test]
    async fn refund_never_goes_negative() {
        let (ledger, _, _) = default_ledger(0);
        assert!(ledger.refund("chat", "1K", 5).await);
        let status = ledger.get_quota_status().await;
        assert_eq!(status.global_used, 0);
    }

    #[tokio::test]
    async fn denied_reservation_consumes_nothing() {
        let (ledger, _, _) = ledger_with(QuotaTable::manual(1, &ModeQuotaTable::default()), 0);
        assert!(!ledger.reserve("search", "1K", 1).await.is_allowed());
        assert_eq!(ledger.get_quota_status().await.global_used, 0);
    }

    #[tokio::test]
    async fn reset_clears_today() {
        let (ledger, _, _) = default_ledger(0);
        assert!(ledger.consume_quota("basic", "1K", 5).await);
        assert!(ledger.reset_quota().await);
        assert_eq!(ledger.get_quota_status().await.global_used, 0);
    }

    #[tokio::test]
    async fn status_lists_every_bucket_with_storage_label() {
        let (ledger, _, _) = default_ledger(0);
        let status = ledger.get_quota_status().await;
        assert_eq!(status.modes.len(), 7);
        assert_eq!(status.storage, "Session (Fallback)");
        assert_eq!(status.global_remaining, 50);
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl PluginAdapter for FailingStore {
        fn name(&self) -> &str {
            "failing"
        }
        fn adapter_type(&self) -> AdapterType {
            AdapterType::Store
        }
        async fn health_check(&self) -> Result<HealthStatus, NanolabError> {
            Ok(HealthStatus::Unhealthy("down".into()))
        }
    }

    #[async_trait::async_trait]
    impl BlobStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, NanolabError> {
            Err(NanolabError::Storage {
                source: Box::new(std::io::Error::other("unreachable")),
            })
        }
        async fn put(
            &self,
            _key: &str,
            _value: Vec<u8>,
            _ttl: Option<Duration>,
        ) -> Result<(), NanolabError> {
            Err(NanolabError::Storage {
                source: Box::new(std::io::Error::other("unreachable")),
            })
        }
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn store_failures_degrade_and_report() {
        let ledger = QuotaLedger::new(
            Arc::new(FailingStore),
            Arc::new(ManualClock::new(start())),
            QuotaTable::manual(50, &ModeQuotaTable::default()),
            Duration::ZERO,
            QuotaScope::Global,
        );
        assert!(ledger.check_quota("chat", "1K", 1).await.is_allowed());
        assert!(!ledger.consume_quota("chat", "1K", 1).await);
        assert!(logs_contain("failed to save quota entry"));
    }
}
