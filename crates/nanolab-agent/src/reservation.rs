// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Release of a started generation's slot and quota units.
//!
//! Once a task holds the session slot, a [`Reservation`] owns the duty to
//! complete it and refund whatever the caller did not receive. The normal
//! path calls [`Reservation::settle`]. If the future driving the generation
//! is dropped first, `Drop` hands the release to the runtime and the task
//! ends `Failed` with [`GENERATION_ABANDONED_MESSAGE`].

use std::sync::Arc;

use nanolab_core::GenerationResult;
use nanolab_cost::QuotaHandle;
use tokio::sync::Mutex;
use tracing::{debug, warn, Instrument};

use crate::session::GenerationSession;
use crate::state::{GenerationStateMachine, GenerationTask, GENERATION_ABANDONED_MESSAGE};

/// Give back `count` units of a reservation. Failures are logged only.
pub(crate) async fn refund_units(quota: &QuotaHandle, mode: &str, resolution: &str, count: u32) {
    if count == 0 {
        return;
    }
    match quota.refund(mode, resolution, count).await {
        Ok(true) => debug!(mode, count, "quota refunded"),
        Ok(false) => warn!(mode, count, "quota refund was not persisted"),
        Err(e) => warn!(mode, count, error = %e, "quota refund failed"),
    }
}

struct Claim {
    state: Arc<Mutex<GenerationStateMachine>>,
    /// Present for trial sessions only.
    quota: Option<QuotaHandle>,
    task_id: String,
    mode: String,
    resolution: String,
    units: u32,
}

impl Claim {
    async fn release(
        self,
        results: Option<Vec<GenerationResult>>,
        error: Option<String>,
        refund: u32,
    ) -> Option<GenerationTask> {
        let finished = self
            .state
            .lock()
            .await
            .complete_generation(&self.task_id, results, error);
        if let Some(quota) = &self.quota {
            refund_units(quota, &self.mode, &self.resolution, refund.min(self.units)).await;
        }
        finished
    }
}

/// Slot and quota held by one running generation.
pub(crate) struct Reservation {
    claim: Option<Claim>,
}

impl Reservation {
    pub(crate) fn new(
        session: &GenerationSession,
        quota: &QuotaHandle,
        task: &GenerationTask,
        mode: &str,
        units: u32,
    ) -> Self {
        Self {
            claim: Some(Claim {
                state: session.shared_state(),
                quota: session.is_trial().then(|| quota.clone()),
                task_id: task.id.clone(),
                mode: mode.to_string(),
                resolution: task.resolution.clone(),
                units,
            }),
        }
    }

    /// Complete the task and refund `refund` of the reserved units.
    ///
    /// The release runs on its own task, so it finishes even if the caller
    /// stops polling while it is in progress. Returns `None` when the task
    /// had already been reaped.
    pub(crate) async fn settle(
        mut self,
        results: Option<Vec<GenerationResult>>,
        error: Option<String>,
        refund: u32,
    ) -> Option<GenerationTask> {
        let claim = self.claim.take()?;
        let release = claim.release(results, error, refund).in_current_span();
        match tokio::spawn(release).await {
            Ok(finished) => finished,
            Err(e) => {
                warn!(error = %e, "generation release task failed");
                None
            }
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let Some(claim) = self.claim.take() else {
            return;
        };
        warn!(
            task_id = %claim.task_id,
            units = claim.units,
            "generation dropped before completion, releasing slot"
        );
        let units = claim.units;
        let release = claim
            .release(None, Some(GENERATION_ABANDONED_MESSAGE.to_string()), units)
            .in_current_span();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(release);
            }
            Err(_) => warn!("no runtime to release the abandoned generation"),
        }
    }
}
