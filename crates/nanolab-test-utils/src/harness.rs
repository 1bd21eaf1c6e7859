// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end generation tests.
//!
//! `TestHarness` assembles the full stack with a scripted client, an
//! in-memory quota store on a manual clock, and a running quota service.
//! Retries default to zero backoff so tests do not need paused time.

use std::sync::Arc;
use std::time::Duration;

use nanolab_agent::{GenerationJob, GenerationPipeline, GenerationSession};
use nanolab_config::{NanolabConfig, QuotaConfig};
use nanolab_core::{
    GenerateRequest, GenerationMode, GenerationResult, ManualClock, NanolabError, QuotaScope,
    SessionId,
};
use nanolab_cost::{QuotaHandle, QuotaLedger, QuotaService, QuotaTable};
use nanolab_resilience::RetryPolicy;
use nanolab_storage::MemoryStore;

use crate::clock::fixed_clock;
use crate::mock_client::{MockGenerationClient, MockOutcome};

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: NanolabConfig,
    script: Vec<MockOutcome>,
    fallback: Option<MockOutcome>,
    latency: Duration,
    retry: RetryPolicy,
    clock: Option<Arc<ManualClock>>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            config: NanolabConfig::default(),
            script: Vec::new(),
            fallback: None,
            latency: Duration::ZERO,
            retry: RetryPolicy::new(3, Vec::new()),
            clock: None,
        }
    }

    /// Start from a full configuration.
    pub fn with_config(mut self, config: NanolabConfig) -> Self {
        self.config = config;
        self
    }

    /// Adjust the `[quota]` section.
    pub fn with_quota(mut self, edit: impl FnOnce(&mut QuotaConfig)) -> Self {
        edit(&mut self.config.quota);
        self
    }

    /// Outcomes the mock client plays before falling back to images.
    pub fn with_script(mut self, script: Vec<MockOutcome>) -> Self {
        self.script = script;
        self
    }

    pub fn with_fallback(mut self, outcome: MockOutcome) -> Self {
        self.fallback = Some(outcome);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<ManualClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the harness and spawn its quota service. Requires a tokio
    /// runtime.
    pub fn build(self) -> TestHarness {
        let clock = self.clock.unwrap_or_else(fixed_clock);

        let mut client = MockGenerationClient::with_script(self.script).with_latency(self.latency);
        if let Some(fallback) = self.fallback {
            client = client.with_fallback(fallback);
        }
        let client = Arc::new(client);

        let store = Arc::new(MemoryStore::new(clock.clone()));
        let ledger = QuotaLedger::new(
            store.clone(),
            clock.clone(),
            QuotaTable::from_config(&self.config.quota),
            Duration::from_secs(self.config.quota.cooldown_seconds),
            QuotaScope::PerSession,
        );
        let (quota, _task) = QuotaService::spawn(ledger);

        let pipeline =
            GenerationPipeline::new(client.clone(), quota.clone(), self.retry, &self.config.generation);

        TestHarness {
            client,
            clock,
            store,
            quota,
            pipeline,
            config: self.config,
        }
    }
}

/// A complete test environment.
pub struct TestHarness {
    /// The scripted client.
    pub client: Arc<MockGenerationClient>,
    /// Clock shared by the ledger, the store and every session.
    pub clock: Arc<ManualClock>,
    /// Backing store of the quota ledger.
    pub store: Arc<MemoryStore>,
    pub quota: QuotaHandle,
    pub pipeline: GenerationPipeline,
    pub config: NanolabConfig,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// A trial session (draws on the quota).
    pub fn trial_session(&self, id: &str) -> GenerationSession {
        self.session(id, true)
    }

    /// A session with its own API key (quota skipped).
    pub fn keyed_session(&self, id: &str) -> GenerationSession {
        self.session(id, false)
    }

    fn session(&self, id: &str, trial: bool) -> GenerationSession {
        GenerationSession::new(
            SessionId(id.to_string()),
            trial,
            nanolab_agent::GenerationStateMachine::from_config(
                self.clock.clone(),
                &self.config.generation,
            ),
        )
    }

    /// Run a basic text-to-image generation of `prompt` at `resolution`.
    pub async fn generate(
        &self,
        session: &GenerationSession,
        prompt: &str,
        resolution: &str,
    ) -> Result<GenerationResult, NanolabError> {
        let mut request = GenerateRequest::new(prompt);
        request.resolution = resolution.to_string();
        self.pipeline
            .run(session, GenerationJob::generate(GenerationMode::Basic, request))
            .await
    }

    /// Advance the shared clock.
    pub fn advance(&self, by: Duration) {
        self.clock
            .advance(chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn harness_runs_a_generation() {
        let harness = TestHarness::builder()
            .with_quota(|q| q.cooldown_seconds = 0)
            .build();
        let session = harness.trial_session("s1");
        let result = harness.generate(&session, "a fox", "1K").await.unwrap();
        assert!(result.is_success());
        let status = harness.quota.get_quota_status().await.unwrap();
        assert_eq!(status.global_used, 1);
        assert_eq!(status.scope, QuotaScope::PerSession);
    }
}
