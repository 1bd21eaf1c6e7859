// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wiring shared by the subcommands: clock, quota service and client.

use std::sync::Arc;
use std::time::Duration;

use nanolab_config::NanolabConfig;
use nanolab_core::{Clock, NanolabError, SystemClock};
use nanolab_cost::{QuotaHandle, QuotaLedger, QuotaService, QuotaTable};
use nanolab_gemini::GeminiClient;

pub fn clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Open the quota store named by `[kv]` and start the ledger service.
pub fn open_quota(config: &NanolabConfig, clock: Arc<dyn Clock>) -> Result<QuotaHandle, NanolabError> {
    let (store, scope) = nanolab_storage::open_quota_store(&config.kv, clock.clone())?;
    let table = QuotaTable::from_config(&config.quota);
    table.log_summary(config.quota.allocation);

    let ledger = QuotaLedger::new(
        store,
        clock,
        table,
        Duration::from_secs(config.quota.cooldown_seconds),
        scope,
    )
    .with_entry_ttl(Duration::from_secs(config.kv.expiry_secs));

    let (handle, _task) = QuotaService::spawn(ledger);
    Ok(handle)
}

/// The key a run authenticates with: the caller's own, else the configured
/// one.
pub fn effective_api_key<'a>(config: &'a NanolabConfig, user_key: Option<&'a str>) -> Option<&'a str> {
    user_key
        .filter(|k| !k.trim().is_empty())
        .or_else(|| config.gemini.api_key.as_deref().filter(|k| !k.trim().is_empty()))
}

pub fn gemini_client(
    config: &NanolabConfig,
    user_key: Option<&str>,
) -> Result<GeminiClient, NanolabError> {
    let key = effective_api_key(config, user_key).ok_or_else(|| {
        NanolabError::Config(
            "no API key: pass --api-key or set gemini.api_key / GOOGLE_API_KEY".to_string(),
        )
    })?;
    GeminiClient::from_config(&config.gemini, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_key_wins_over_configured_key() {
        let mut config = NanolabConfig::default();
        config.gemini.api_key = Some("server".into());
        assert_eq!(effective_api_key(&config, Some("mine")), Some("mine"));
        assert_eq!(effective_api_key(&config, Some("  ")), Some("server"));
        assert_eq!(effective_api_key(&config, None), Some("server"));
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let config = NanolabConfig::default();
        assert!(matches!(
            gemini_client(&config, None),
            Err(NanolabError::Config(_))
        ));
    }

    #[tokio::test]
    async fn quota_service_starts_without_kv() {
        let config = NanolabConfig::default();
        let quota = open_quota(&config, clock()).unwrap();
        assert_eq!(quota.scope(), nanolab_core::QuotaScope::PerSession);
        let status = quota.get_quota_status().await.unwrap();
        assert_eq!(status.global_limit, 50);
    }
}
