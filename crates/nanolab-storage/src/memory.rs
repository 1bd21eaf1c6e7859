// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-local blob store.
//!
//! Used when no remote store is configured, and in tests. Entries honour
//! their TTL against the injected clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nanolab_core::{
    AdapterType, BlobStore, Clock, HealthStatus, NanolabError, PluginAdapter, SystemClock,
};
use tokio::sync::Mutex;

struct Slot {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory [`BlobStore`].
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|slot| slot.expires_at.is_none_or(|at| at > now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PluginAdapter for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Store
    }

    async fn health_check(&self) -> Result<HealthStatus, NanolabError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, NanolabError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            None => return Ok(None),
            Some(slot) => slot.expires_at.is_some_and(|at| at <= now),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|slot| slot.value.clone()))
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), NanolabError> {
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|e| NanolabError::InvalidInput(format!("ttl out of range: {e}")))?;
                Some(self.clock.now() + ttl)
            }
            None => None,
        };
        self.entries
            .lock()
            .await
            .insert(key.to_string(), Slot { value, expires_at });
        Ok(())
    }
}
