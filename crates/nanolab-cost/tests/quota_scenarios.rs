// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Check-then-consume cycles through the quota service.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use nanolab_config::{ModeQuota, ModeQuotaTable};
use nanolab_core::{BlobStore, ManualClock, QuotaScope};
use nanolab_cost::{QuotaDecision, QuotaDenial, QuotaEntry, QuotaLedger, QuotaService, QuotaTable};
use nanolab_storage::MemoryStore;

fn five_point_table() -> QuotaTable {
    let modes = ModeQuotaTable {
        basic_1k: ModeQuota { cost: 1, limit: 5 },
        ..ModeQuotaTable::default()
    };
    QuotaTable::manual(5, &modes)
}

#[tokio::test]
async fn five_cycles_then_global_denial() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap(),
    ));
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let ledger = QuotaLedger::new(
        store,
        clock,
        five_point_table(),
        Duration::ZERO,
        QuotaScope::PerSession,
    );
    let (quota, _task) = QuotaService::spawn(ledger);

    for cycle in 1..=5 {
        let decision = quota.check_quota("basic", "1K", 1).await.unwrap();
        assert!(decision.is_allowed(), "cycle {cycle}: {}", decision.reason());
        assert!(quota.consume_quota("basic", "1K", 1).await.unwrap());
        let status = quota.get_quota_status().await.unwrap();
        assert_eq!(status.global_used, cycle);
    }

    let decision = quota.check_quota("basic", "1K", 1).await.unwrap();
    match decision {
        QuotaDecision::Denied(QuotaDenial::GlobalExceeded {
            used,
            limit,
            remaining,
        }) => {
            assert_eq!((used, limit, remaining), (5, 5, 0));
        }
        other => panic!("expected global denial, got {other:?}"),
    }
    assert_eq!(quota.get_quota_status().await.unwrap().global_remaining, 0);
}

#[tokio::test]
async fn next_consume_after_midnight_writes_todays_document() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 6, 1, 23, 59, 50).unwrap(),
    ));
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let ledger = QuotaLedger::new(
        store.clone(),
        clock.clone(),
        five_point_table(),
        Duration::ZERO,
        QuotaScope::PerSession,
    );
    let (quota, _task) = QuotaService::spawn(ledger);

    for _ in 0..5 {
        assert!(quota.consume_quota("basic", "1K", 1).await.unwrap());
    }
    assert!(!quota.check_quota("basic", "1K", 1).await.unwrap().is_allowed());

    clock.advance(chrono::Duration::seconds(20));
    let status = quota.get_quota_status().await.unwrap();
    assert_eq!(status.date, "2026-06-02");
    assert_eq!(status.global_used, 0);
    assert!(quota.check_quota("basic", "1K", 1).await.unwrap().is_allowed());
    assert!(quota.consume_quota("basic", "1K", 1).await.unwrap());

    let bytes = store
        .get(&QuotaLedger::storage_key("2026-06-02"))
        .await
        .unwrap()
        .expect("today's document");
    let entry: QuotaEntry = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(entry.date, "2026-06-02");
    assert_eq!(entry.global_used, 1);
}
