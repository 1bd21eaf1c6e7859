// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted generation client for deterministic tests.
//!
//! `MockGenerationClient` implements `GenerationClient` by popping
//! [`MockOutcome`]s from a FIFO queue, so tests can drive retries, safety
//! blocks and partial batch failures without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nanolab_core::{
    AdapterType, BlendRequest, ChatRequest, GenerateRequest, GeneratedImage, GenerationClient,
    HealthStatus, NanolabError, PluginAdapter, ProviderReply, SafetyRating, SearchRequest,
};
use tokio::sync::Mutex;

/// What the next call returns.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// A reply carrying a small PNG-tagged image.
    Image,
    /// An arbitrary reply.
    Reply(ProviderReply),
    /// A reply with finish reason `SAFETY` and no image.
    SafetyFinish,
    /// A provider error.
    Error {
        message: String,
        status: Option<u16>,
    },
}

impl MockOutcome {
    /// A provider error without a status code.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            status: None,
        }
    }

    /// A provider error with an HTTP status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            status: Some(status),
        }
    }

    fn resolve(self) -> Result<ProviderReply, NanolabError> {
        match self {
            MockOutcome::Image => Ok(image_reply()),
            MockOutcome::Reply(reply) => Ok(reply),
            MockOutcome::SafetyFinish => Ok(ProviderReply {
                finish_reason: Some("SAFETY".to_string()),
                safety_ratings: vec![SafetyRating {
                    category: "HARM_CATEGORY_DANGEROUS_CONTENT".to_string(),
                    probability: "HIGH".to_string(),
                    blocked: true,
                }],
                ..ProviderReply::default()
            }),
            MockOutcome::Error { message, status } => Err(NanolabError::Provider {
                message,
                status,
                source: None,
            }),
        }
    }
}

/// The reply returned for [`MockOutcome::Image`].
pub fn image_reply() -> ProviderReply {
    ProviderReply {
        image: Some(GeneratedImage {
            mime_type: "image/png".to_string(),
            data: b"\x89PNG mock".to_vec(),
        }),
        text: Some("mock image".to_string()),
        finish_reason: Some("STOP".to_string()),
        ..ProviderReply::default()
    }
}

/// What [`GenerationClient::probe`] returns.
#[derive(Debug, Clone)]
pub enum MockProbe {
    Healthy,
    Empty,
    Error(String),
}

/// A mock generation client driven by a queue of outcomes.
///
/// When the queue is empty, `fallback` is returned (an image by default).
pub struct MockGenerationClient {
    script: Mutex<VecDeque<MockOutcome>>,
    fallback: MockOutcome,
    probe: Mutex<MockProbe>,
    chats: Mutex<Vec<ChatRequest>>,
    latency: Duration,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockGenerationClient {
    /// A client that always returns an image.
    pub fn new() -> Self {
        Self::with_script(Vec::new())
    }

    /// A client that plays `script` in order, then returns images.
    pub fn with_script(script: Vec<MockOutcome>) -> Self {
        Self {
            script: Mutex::new(VecDeque::from(script)),
            fallback: MockOutcome::Image,
            probe: Mutex::new(MockProbe::Healthy),
            chats: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Outcome returned once the script is exhausted.
    pub fn with_fallback(mut self, outcome: MockOutcome) -> Self {
        self.fallback = outcome;
        self
    }

    /// Sleep this long inside every call (honours paused tokio time).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn push(&self, outcome: MockOutcome) {
        self.script.lock().await.push_back(outcome);
    }

    pub async fn set_probe(&self, probe: MockProbe) {
        *self.probe.lock().await = probe;
    }

    /// Remote calls made so far (probes excluded).
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every chat request received, in order.
    pub async fn chat_requests(&self) -> Vec<ChatRequest> {
        self.chats.lock().await.clone()
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn next_outcome(&self) -> Result<ProviderReply, NanolabError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let outcome = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome.resolve()
    }
}

impl Default for MockGenerationClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockGenerationClient {
    fn name(&self) -> &str {
        "mock-generator"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Generator
    }

    async fn health_check(&self) -> Result<HealthStatus, NanolabError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl GenerationClient for MockGenerationClient {
    async fn generate(&self, _request: &GenerateRequest) -> Result<ProviderReply, NanolabError> {
        self.next_outcome().await
    }

    async fn blend_images(&self, _request: &BlendRequest) -> Result<ProviderReply, NanolabError> {
        self.next_outcome().await
    }

    async fn generate_with_search(
        &self,
        _request: &SearchRequest,
    ) -> Result<ProviderReply, NanolabError> {
        self.next_outcome().await
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ProviderReply, NanolabError> {
        self.chats.lock().await.push(request.clone());
        self.next_outcome().await
    }

    async fn probe(&self) -> Result<bool, NanolabError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.probe.lock().await.clone() {
            MockProbe::Healthy => Ok(true),
            MockProbe::Empty => Ok(false),
            MockProbe::Error(message) => Err(NanolabError::provider(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_outcome_is_image() {
        let client = MockGenerationClient::new();
        let reply = client.generate(&GenerateRequest::new("p")).await.unwrap();
        assert!(reply.image.is_some());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn script_plays_in_order_then_falls_back() {
        let client = MockGenerationClient::with_script(vec![
            MockOutcome::http(503, "overloaded"),
            MockOutcome::SafetyFinish,
        ])
        .with_fallback(MockOutcome::error("boom"));

        let first = client.generate(&GenerateRequest::new("p")).await.unwrap_err();
        assert_eq!(first.status(), Some(503));
        let second = client.generate(&GenerateRequest::new("p")).await.unwrap();
        assert_eq!(second.finish_reason.as_deref(), Some("SAFETY"));
        let third = client.generate(&GenerateRequest::new("p")).await.unwrap_err();
        assert!(third.to_string().contains("boom"));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn probe_follows_setting() {
        let client = MockGenerationClient::new();
        assert!(client.probe().await.unwrap());
        client.set_probe(MockProbe::Empty).await;
        assert!(!client.probe().await.unwrap());
        client.set_probe(MockProbe::Error("invalid key".into())).await;
        assert!(client.probe().await.is_err());
        assert_eq!(client.calls(), 0);
    }
}
