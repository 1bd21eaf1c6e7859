// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-writer task owning the [`QuotaLedger`].
//!
//! Every check, consume, reserve, refund, status and reset request in the
//! process is sent over one mpsc channel and executed in arrival order, so
//! two sessions can never both pass a check for the last unit.
//!
//! Processes sharing one KV namespace are not coordinated: the store has no
//! compare-and-swap, so the cap can be overshot by the number of processes
//! writing at the same moment.

use nanolab_core::{NanolabError, QuotaScope};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::ledger::{QuotaDecision, QuotaLedger, QuotaStatus};

const COMMAND_BUFFER: usize = 64;

/// A request for the ledger task.
enum QuotaCommand {
    Check {
        request: UnitRequest,
        reply: oneshot::Sender<QuotaDecision>,
    },
    Consume {
        request: UnitRequest,
        reply: oneshot::Sender<bool>,
    },
    Reserve {
        request: UnitRequest,
        reply: oneshot::Sender<QuotaDecision>,
    },
    Refund {
        request: UnitRequest,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<QuotaStatus>,
    },
    Reset {
        reply: oneshot::Sender<bool>,
    },
}

struct UnitRequest {
    mode: String,
    resolution: String,
    count: u32,
}

impl UnitRequest {
    fn new(mode: &str, resolution: &str, count: u32) -> Self {
        Self {
            mode: mode.to_string(),
            resolution: resolution.to_string(),
            count,
        }
    }
}

/// Spawns the ledger task.
pub struct QuotaService;

impl QuotaService {
    /// Move `ledger` onto its own task. The task exits once every
    /// [`QuotaHandle`] has been dropped.
    pub fn spawn(ledger: QuotaLedger) -> (QuotaHandle, JoinHandle<()>) {
        let scope = ledger.scope();
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(run(ledger, rx));
        (QuotaHandle { tx, scope }, task)
    }
}

async fn run(ledger: QuotaLedger, mut rx: mpsc::Receiver<QuotaCommand>) {
    debug!(scope = %ledger.scope(), "quota service started");
    while let Some(command) = rx.recv().await {
        // A dropped reply receiver means the caller gave up; the ledger
        // operation has still been applied.
        match command {
            QuotaCommand::Check { request, reply } => {
                let UnitRequest {
                    mode,
                    resolution,
                    count,
                } = request;
                let _ = reply.send(ledger.check_quota(&mode, &resolution, count).await);
            }
            QuotaCommand::Consume { request, reply } => {
                let UnitRequest {
                    mode,
                    resolution,
                    count,
                } = request;
                let _ = reply.send(ledger.consume_quota(&mode, &resolution, count).await);
            }
            QuotaCommand::Reserve { request, reply } => {
                let UnitRequest {
                    mode,
                    resolution,
                    count,
                } = request;
                let _ = reply.send(ledger.reserve(&mode, &resolution, count).await);
            }
            QuotaCommand::Refund { request, reply } => {
                let UnitRequest {
                    mode,
                    resolution,
                    count,
                } = request;
                let _ = reply.send(ledger.refund(&mode, &resolution, count).await);
            }
            QuotaCommand::Status { reply } => {
                let _ = reply.send(ledger.get_quota_status().await);
            }
            QuotaCommand::Reset { reply } => {
                let _ = reply.send(ledger.reset_quota().await);
            }
        }
    }
    debug!("quota service stopped");
}

/// Cloneable client of the quota task.
#[derive(Clone)]
pub struct QuotaHandle {
    tx: mpsc::Sender<QuotaCommand>,
    scope: QuotaScope,
}

impl QuotaHandle {
    /// Population this ledger is shared across.
    pub fn scope(&self) -> QuotaScope {
        self.scope
    }

    pub async fn check_quota(
        &self,
        mode: &str,
        resolution: &str,
        count: u32,
    ) -> Result<QuotaDecision, NanolabError> {
        self.call(|reply| QuotaCommand::Check {
            request: UnitRequest::new(mode, resolution, count),
            reply,
        })
        .await
    }

    pub async fn consume_quota(
        &self,
        mode: &str,
        resolution: &str,
        count: u32,
    ) -> Result<bool, NanolabError> {
        self.call(|reply| QuotaCommand::Consume {
            request: UnitRequest::new(mode, resolution, count),
            reply,
        })
        .await
    }

    /// Check and consume in one serialized step.
    pub async fn reserve(
        &self,
        mode: &str,
        resolution: &str,
        count: u32,
    ) -> Result<QuotaDecision, NanolabError> {
        self.call(|reply| QuotaCommand::Reserve {
            request: UnitRequest::new(mode, resolution, count),
            reply,
        })
        .await
    }

    /// Return units from an earlier reservation.
    pub async fn refund(
        &self,
        mode: &str,
        resolution: &str,
        count: u32,
    ) -> Result<bool, NanolabError> {
        self.call(|reply| QuotaCommand::Refund {
            request: UnitRequest::new(mode, resolution, count),
            reply,
        })
        .await
    }

    pub async fn get_quota_status(&self) -> Result<QuotaStatus, NanolabError> {
        self.call(|reply| QuotaCommand::Status { reply }).await
    }

    pub async fn reset_quota(&self) -> Result<bool, NanolabError> {
        self.call(|reply| QuotaCommand::Reset { reply }).await
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> QuotaCommand,
    ) -> Result<T, NanolabError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| NanolabError::Internal("quota service is not running".into()))?;
        reply_rx
            .await
            .map_err(|_| NanolabError::Internal("quota service dropped the request".into()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use nanolab_config::ModeQuotaTable;
    use nanolab_core::ManualClock;
    use nanolab_storage::MemoryStore;

    use super::*;
    use crate::quota::QuotaTable;

    fn spawn_with_global(global: u64) -> QuotaHandle {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap(),
        ));
        let ledger = QuotaLedger::new(
            Arc::new(MemoryStore::new(clock.clone())),
            clock,
            QuotaTable::manual(global, &ModeQuotaTable::default()),
            Duration::ZERO,
            QuotaScope::PerSession,
        );
        let (handle, _task) = QuotaService::spawn(ledger);
        handle
    }

    #[tokio::test]
    async fn handle_round_trips_operations() {
        let handle = spawn_with_global(50);
        assert_eq!(handle.scope(), QuotaScope::PerSession);
        assert!(handle.check_quota("chat", "1K", 1).await.unwrap().is_allowed());
        assert!(handle.consume_quota("chat", "1K", 2).await.unwrap());
        assert_eq!(handle.get_quota_status().await.unwrap().global_used, 2);
        assert!(handle.refund("chat", "1K", 1).await.unwrap());
        assert_eq!(handle.get_quota_status().await.unwrap().global_used, 1);
        assert!(handle.reset_quota().await.unwrap());
        assert_eq!(handle.get_quota_status().await.unwrap().global_used, 0);
    }

    #[tokio::test]
    async fn concurrent_reservations_never_overshoot() {
        let handle = spawn_with_global(5);
        let mut joins = Vec::new();
        for _ in 0..20 {
            let handle = handle.clone();
            joins.push(tokio::spawn(async move {
                handle.reserve("basic", "1K", 1).await.unwrap().is_allowed()
            }));
        }
        let mut allowed = 0;
        for join in joins {
            if join.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
        let status = handle.get_quota_status().await.unwrap();
        assert_eq!(status.global_used, 5);
        assert_eq!(status.global_remaining, 0);
    }

    #[tokio::test]
    async fn stopped_service_reports_internal_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = QuotaHandle {
            tx,
            scope: QuotaScope::Global,
        };
        let err = handle.get_quota_status().await.unwrap_err();
        assert!(matches!(err, NanolabError::Internal(_)));
    }
}
