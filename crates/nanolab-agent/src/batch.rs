// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batch generation: `count` sub-generations of one prompt under a single
//! task and a single quota reservation.

use futures::{StreamExt, future, stream};
use nanolab_core::{GenerationMode, GenerationResult, NanolabError};
use tracing::{debug, info};

use crate::pipeline::{GenerationJob, GenerationPipeline};
use crate::reservation::{refund_units, Reservation};
use crate::session::GenerationSession;

impl GenerationPipeline {
    /// Run `count` sub-generations of `job` for `session`.
    ///
    /// Items run one at a time, or with at most `batch_parallelism` calls
    /// in flight when `parallel` is set. The cancellation token is checked
    /// before each item is scheduled; items already dispatched finish.
    /// Units reserved for items that produced no image are refunded.
    ///
    /// Results are returned in item order. Items skipped by cancellation
    /// are absent. If the returned future is dropped mid-batch, the task
    /// ends `Failed` and every reserved unit is refunded.
    pub async fn run_batch(
        &self,
        session: &GenerationSession,
        mut job: GenerationJob,
        count: u32,
        parallel: bool,
    ) -> Result<Vec<GenerationResult>, NanolabError> {
        if count == 0 || count > self.max_batch_size {
            return Err(NanolabError::InvalidInput(format!(
                "batch size must be between 1 and {}",
                self.max_batch_size
            )));
        }
        if job.prompt().trim().is_empty() {
            return Err(NanolabError::InvalidInput("prompt must not be empty".into()));
        }
        job.mode = GenerationMode::Batch;
        let mode = job.mode.to_string();
        let resolution = job.resolution().to_string();

        let (token, reservation) = {
            let mut state = session.state().await;
            state.reap_stale();
            if !state.can_start_generation().0 {
                return Err(NanolabError::GenerationInProgress);
            }
            if session.is_trial() {
                self.quota
                    .reserve(&mode, &resolution, count)
                    .await?
                    .into_result()?;
            }
            let budget = self.watchdog_budget(count);
            match state.start_generation_with_budget(job.prompt(), job.mode, &resolution, budget) {
                Some(task) => (
                    task.cancel_token(),
                    Reservation::new(session, &self.quota, &task, &mode, count),
                ),
                None => {
                    if session.is_trial() {
                        refund_units(&self.quota, &mode, &resolution, count).await;
                    }
                    return Err(NanolabError::GenerationInProgress);
                }
            }
        };

        let concurrency = if parallel { self.batch_parallelism } else { 1 };
        info!(
            session = %session.id().0,
            count,
            concurrency,
            "batch generation started"
        );

        let request = &job.request;
        let mut pending = stream::iter(0..count)
            .take_while(|_| future::ready(!token.is_cancelled()))
            .map(|index| async move { (index, self.attempt(request).await) })
            .buffer_unordered(concurrency);

        let mut finished: Vec<(u32, GenerationResult)> = Vec::with_capacity(count as usize);
        while let Some((index, result)) = pending.next().await {
            debug!(index, success = result.is_success(), "batch item finished");
            finished.push((index, result));
            session
                .state()
                .await
                .update_progress(finished.len() as f64 / f64::from(count));
        }
        finished.sort_by_key(|(index, _)| *index);
        let results: Vec<GenerationResult> = finished.into_iter().map(|(_, r)| r).collect();

        let produced = results.iter().filter(|r| r.image.is_some()).count() as u32;
        // Every reserved unit without an image, including skipped items.
        let unused = count - produced;

        let cancelled_before_start = results.is_empty() && token.is_cancelled();
        let error = if produced > 0 || cancelled_before_start {
            None
        } else {
            Some(
                results
                    .iter()
                    .find_map(|r| r.error.clone())
                    .unwrap_or_else(|| "batch produced no images".to_string()),
            )
        };
        reservation
            .settle(Some(results.clone()), error, unused)
            .await;

        info!(
            session = %session.id().0,
            requested = count,
            attempted = results.len(),
            produced,
            cancelled = token.is_cancelled(),
            "batch generation complete"
        );
        Ok(results)
    }
}
