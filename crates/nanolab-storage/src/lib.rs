// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Blob stores for the Nanolab quota ledger.
//!
//! Two implementations of [`BlobStore`]:
//! - [`CloudflareKvStore`]: remote KV namespace shared by every process,
//!   giving the quota a global scope
//! - [`MemoryStore`]: per-process fallback and test store

pub mod kv;
pub mod memory;

use std::sync::Arc;

use nanolab_config::KvConfig;
use nanolab_core::{BlobStore, Clock, NanolabError, QuotaScope};
use tracing::{info, warn};

pub use kv::CloudflareKvStore;
pub use memory::MemoryStore;

/// Pick the quota store for this process.
///
/// A fully configured KV namespace gives a [`QuotaScope::Global`] ledger.
/// Anything else falls back to an in-memory store scoped to this session.
pub fn open_quota_store(
    config: &KvConfig,
    clock: Arc<dyn Clock>,
) -> Result<(Arc<dyn BlobStore>, QuotaScope), NanolabError> {
    if config.is_configured() {
        let store = CloudflareKvStore::from_config(config)?;
        info!("quota ledger using Cloudflare KV");
        return Ok((Arc::new(store), QuotaScope::Global));
    }
    if config.is_partially_configured() {
        warn!("Cloudflare KV is partially configured; falling back to session quota");
    } else {
        warn!("Cloudflare KV not configured; quota is tracked per session only");
    }
    Ok((Arc::new(MemoryStore::new(clock)), QuotaScope::PerSession))
}

#[cfg(test)]
mod tests {
    use nanolab_core::{PluginAdapter, SystemClock};

    use super::*;

    #[test]
    fn unconfigured_kv_falls_back_to_memory() {
        let (store, scope) =
            open_quota_store(&KvConfig::default(), Arc::new(SystemClock)).unwrap();
        assert_eq!(scope, QuotaScope::PerSession);
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn configured_kv_is_global() {
        let config = KvConfig {
            account_id: Some("acct".into()),
            namespace_id: Some("ns".into()),
            api_token: Some("tok".into()),
            ..KvConfig::default()
        };
        let (store, scope) = open_quota_store(&config, Arc::new(SystemClock)).unwrap();
        assert_eq!(scope, QuotaScope::Global);
        assert_eq!(store.name(), "cloudflare-kv");
    }
}
