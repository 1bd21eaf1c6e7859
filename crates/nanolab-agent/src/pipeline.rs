// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end control flow of one generation.
//!
//! single-flight check -> trial quota reservation -> `start_generation` ->
//! retry executor around the client call -> `complete_generation` ->
//! refund when no image came back.
//!
//! Pre-flight rejections are returned as `Err`. Once the remote call has
//! been dispatched every outcome, including safety blocks and exhausted
//! retries, comes back inside the [`GenerationResult`].
//!
//! From `start_generation` on, the slot and the reserved units belong to a
//! [`Reservation`]: dropping a `run` future mid-call still completes the
//! task and refunds the unit.

use std::sync::Arc;

use nanolab_config::{GenerationConfig, NanolabConfig};
use nanolab_core::{
    BlendRequest, ChatRequest, GenerateRequest, GenerationClient, GenerationMode,
    GenerationResult, NanolabError, ProviderReply, SearchRequest,
};
use nanolab_cost::QuotaHandle;
use nanolab_resilience::{execute_with_retry, RetryPolicy};
use tracing::{debug, info};

use crate::reservation::{refund_units, Reservation};
use crate::session::GenerationSession;
use crate::state::WatchdogBudget;

/// The remote call a job performs.
#[derive(Debug, Clone)]
pub enum JobRequest {
    Generate(GenerateRequest),
    Blend(BlendRequest),
    Search(SearchRequest),
    Chat(ChatRequest),
}

impl JobRequest {
    fn operation(&self) -> &'static str {
        match self {
            JobRequest::Generate(_) => "generate",
            JobRequest::Blend(_) => "blend_images",
            JobRequest::Search(_) => "generate_with_search",
            JobRequest::Chat(_) => "chat",
        }
    }
}

/// A generation as requested by the UI: the mode it is billed under and
/// the request sent to the provider.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub mode: GenerationMode,
    pub request: JobRequest,
}

impl GenerationJob {
    /// Text-to-image under `mode` (basic, chat, batch, template...).
    pub fn generate(mode: GenerationMode, request: GenerateRequest) -> Self {
        Self {
            mode,
            request: JobRequest::Generate(request),
        }
    }

    /// Multi-image blend. `style` transfers bill the same way.
    pub fn blend(request: BlendRequest) -> Self {
        Self {
            mode: GenerationMode::Blend,
            request: JobRequest::Blend(request),
        }
    }

    pub fn search(request: SearchRequest) -> Self {
        Self {
            mode: GenerationMode::Search,
            request: JobRequest::Search(request),
        }
    }

    /// One conversation turn, billed as `chat`.
    pub fn chat(request: ChatRequest) -> Self {
        Self {
            mode: GenerationMode::Chat,
            request: JobRequest::Chat(request),
        }
    }

    pub fn prompt(&self) -> &str {
        match &self.request {
            JobRequest::Generate(r) => &r.prompt,
            JobRequest::Blend(r) => &r.prompt,
            JobRequest::Search(r) => &r.prompt,
            JobRequest::Chat(r) => &r.prompt,
        }
    }

    /// Resolution used for billing and the time estimate. Blend and search
    /// requests always render at the default size.
    pub fn resolution(&self) -> &str {
        match &self.request {
            JobRequest::Generate(r) => &r.resolution,
            JobRequest::Chat(r) => &r.resolution,
            JobRequest::Blend(_) | JobRequest::Search(_) => "1K",
        }
    }

    fn validate(&self) -> Result<(), NanolabError> {
        if self.prompt().trim().is_empty() {
            return Err(NanolabError::InvalidInput("prompt must not be empty".into()));
        }
        if let JobRequest::Blend(blend) = &self.request {
            if blend.images.is_empty() {
                return Err(NanolabError::InvalidInput(
                    "blend requires at least one image".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Runs generations for any number of sessions against one client and one
/// quota service.
pub struct GenerationPipeline {
    pub(crate) client: Arc<dyn GenerationClient>,
    pub(crate) quota: QuotaHandle,
    pub(crate) retry: RetryPolicy,
    pub(crate) batch_parallelism: usize,
    pub(crate) max_batch_size: u32,
}

impl GenerationPipeline {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        quota: QuotaHandle,
        retry: RetryPolicy,
        generation: &GenerationConfig,
    ) -> Self {
        Self {
            client,
            quota,
            retry,
            batch_parallelism: generation.batch_parallelism.max(1),
            max_batch_size: generation.max_batch_size.max(1),
        }
    }

    pub fn from_config(
        client: Arc<dyn GenerationClient>,
        quota: QuotaHandle,
        config: &NanolabConfig,
    ) -> Self {
        Self::new(
            client,
            quota,
            RetryPolicy::from_config(&config.retry),
            &config.generation,
        )
    }

    pub fn quota(&self) -> &QuotaHandle {
        &self.quota
    }

    async fn dispatch(&self, request: &JobRequest) -> Result<ProviderReply, NanolabError> {
        match request {
            JobRequest::Generate(r) => self.client.generate(r).await,
            JobRequest::Blend(r) => self.client.blend_images(r).await,
            JobRequest::Search(r) => self.client.generate_with_search(r).await,
            JobRequest::Chat(r) => self.client.chat(r).await,
        }
    }

    /// One remote generation with retries.
    pub(crate) async fn attempt(&self, request: &JobRequest) -> GenerationResult {
        execute_with_retry(&self.retry, request.operation(), move || {
            self.dispatch(request)
        })
        .await
    }

    /// Watchdog allowance for `items` sub-generations under this retry
    /// policy.
    pub(crate) fn watchdog_budget(&self, items: u32) -> WatchdogBudget {
        WatchdogBudget::for_retry(items, &self.retry)
    }

    /// Run one generation for `session`.
    pub async fn run(
        &self,
        session: &GenerationSession,
        job: GenerationJob,
    ) -> Result<GenerationResult, NanolabError> {
        job.validate()?;
        let mode = job.mode.to_string();
        let resolution = job.resolution().to_string();

        // The session lock spans check, reservation and start so two
        // requests from one session cannot both pass the single-flight gate.
        let (task, reservation) = {
            let mut state = session.state().await;
            state.reap_stale();
            let (allowed, reason) = state.can_start_generation();
            if !allowed {
                debug!(session = %session.id().0, reason, "generation rejected");
                return Err(NanolabError::GenerationInProgress);
            }

            if session.is_trial() {
                let usage = self
                    .quota
                    .reserve(&mode, &resolution, 1)
                    .await?
                    .into_result()?;
                debug!(
                    session = %session.id().0,
                    bucket = %usage.mode_key,
                    global_remaining = usage.global_remaining,
                    "trial quota reserved"
                );
            }

            let budget = self.watchdog_budget(1);
            match state.start_generation_with_budget(job.prompt(), job.mode, &resolution, budget) {
                Some(task) => {
                    let reservation = Reservation::new(session, &self.quota, &task, &mode, 1);
                    (task, reservation)
                }
                None => {
                    if session.is_trial() {
                        refund_units(&self.quota, &mode, &resolution, 1).await;
                    }
                    return Err(NanolabError::GenerationInProgress);
                }
            }
        };

        let result = self.attempt(&job.request).await;

        let unused = u32::from(result.image.is_none());
        reservation
            .settle(Some(vec![result.clone()]), result.error.clone(), unused)
            .await;

        info!(
            session = %session.id().0,
            task_id = %task.id,
            mode = %mode,
            success = result.is_success(),
            safety_blocked = result.safety_blocked,
            attempts = result.attempts,
            duration_ms = result.duration.as_millis() as u64,
            "generation complete"
        );
        Ok(result)
    }
}
