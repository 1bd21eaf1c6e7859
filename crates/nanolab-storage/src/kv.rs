// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cloudflare Workers KV over its REST API.
//!
//! Values are read and written raw at
//! `{base}/accounts/{account}/storage/kv/namespaces/{namespace}/values/{key}`
//! with bearer authentication. A missing key answers 404, which maps to
//! `Ok(None)`.

use std::time::Duration;

use async_trait::async_trait;
use nanolab_config::KvConfig;
use nanolab_core::{AdapterType, BlobStore, HealthStatus, NanolabError, PluginAdapter};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

/// Key read by the health check. It never needs to exist.
const HEALTH_PROBE_KEY: &str = "health/probe";

/// Cloudflare's shortest accepted `expiration_ttl`.
const MIN_TTL_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    errors: Vec<ApiErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorItem {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Blob store backed by a Cloudflare KV namespace.
#[derive(Debug, Clone)]
pub struct CloudflareKvStore {
    client: reqwest::Client,
    base_url: String,
    account_id: String,
    namespace_id: String,
}

impl CloudflareKvStore {
    pub fn new(
        base_url: impl Into<String>,
        account_id: impl Into<String>,
        namespace_id: impl Into<String>,
        api_token: &str,
    ) -> Result<Self, NanolabError> {
        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {api_token}"))
            .map_err(|e| NanolabError::Config(format!("invalid KV API token header value: {e}")))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| storage_error(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            account_id: account_id.into(),
            namespace_id: namespace_id.into(),
        })
    }

    /// Build from configuration. Fails when any credential is missing.
    pub fn from_config(config: &KvConfig) -> Result<Self, NanolabError> {
        let (Some(account), Some(namespace), Some(token)) = (
            config.account_id.as_deref(),
            config.namespace_id.as_deref(),
            config.api_token.as_deref(),
        ) else {
            return Err(NanolabError::Config(
                "kv.account_id, kv.namespace_id and kv.api_token are required".into(),
            ));
        };
        Self::new(&config.base_url, account, namespace, token)
    }

    fn value_url(&self, key: &str) -> Result<Url, NanolabError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| NanolabError::Config(format!("invalid kv.base_url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| NanolabError::Config("kv.base_url cannot be a base URL".into()))?
            .pop_if_empty()
            .extend([
                "accounts",
                self.account_id.as_str(),
                "storage",
                "kv",
                "namespaces",
                self.namespace_id.as_str(),
                "values",
            ])
            // Encodes `/` inside the key as %2F.
            .push(key);
        Ok(url)
    }
}

fn storage_error(message: String) -> NanolabError {
    NanolabError::Storage {
        source: message.into(),
    }
}

async fn api_error(action: &str, response: reqwest::Response) -> NanolabError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed
            .errors
            .iter()
            .map(|e| format!("{} ({})", e.message, e.code))
            .collect::<Vec<_>>()
            .join("; "),
        _ => body,
    };
    storage_error(format!("KV {action} returned {status}: {detail}"))
}

#[async_trait]
impl PluginAdapter for CloudflareKvStore {
    fn name(&self) -> &str {
        "cloudflare-kv"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Store
    }

    async fn health_check(&self) -> Result<HealthStatus, NanolabError> {
        match self.get(HEALTH_PROBE_KEY).await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }
}

#[async_trait]
impl BlobStore for CloudflareKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, NanolabError> {
        let url = self.value_url(key)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NanolabError::Storage {
                source: Box::new(e),
            })?;

        let status = response.status();
        debug!(key, status = %status, "KV read");
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(api_error("read", response).await);
        }
        let bytes = response.bytes().await.map_err(|e| NanolabError::Storage {
            source: Box::new(e),
        })?;
        Ok(Some(bytes.to_vec()))
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), NanolabError> {
        let mut url = self.value_url(key)?;
        if let Some(ttl) = ttl {
            let secs = ttl.as_secs().max(MIN_TTL_SECS);
            url.query_pairs_mut()
                .append_pair("expiration_ttl", &secs.to_string());
        }

        let response = self
            .client
            .put(url)
            .body(value)
            .send()
            .await
            .map_err(|e| NanolabError::Storage {
                source: Box::new(e),
            })?;

        let status = response.status();
        debug!(key, status = %status, "KV write");
        if !status.is_success() {
            return Err(api_error("write", response).await);
        }
        Ok(())
    }
}
