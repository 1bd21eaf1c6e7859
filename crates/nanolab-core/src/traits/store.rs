// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key/blob store trait backing the quota ledger.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::NanolabError;
use crate::traits::adapter::PluginAdapter;

/// Adapter for a remote (or in-memory) key/value blob store.
///
/// An absent key is `Ok(None)`, never an error. Writes may carry a TTL after
/// which the store drops the key on its own.
#[async_trait]
pub trait BlobStore: PluginAdapter {
    /// Reads the blob stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, NanolabError>;

    /// Writes `value` under `key`, replacing any previous blob.
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), NanolabError>;
}
