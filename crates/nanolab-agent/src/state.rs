// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session generation FSM and single-flight slot.
//!
//! A task moves `Generating -> {Completed | Cancelled | Failed}`; the
//! session itself is `Idle` whenever the current-task slot is empty.
//! Terminal tasks are pushed to the front of a bounded history and the
//! slot is cleared.
//!
//! Cancellation is advisory: [`GenerationStateMachine::cancel_generation`]
//! flags the task and trips its [`CancellationToken`], which the batch
//! runner checks between items. Calls already dispatched run to completion.
//!
//! A task that outlives its watchdog deadline no longer holds the slot. The
//! deadline covers every item of the task and every retry each item may
//! make, so only a call that is genuinely stuck gets reaped. Completion is
//! keyed by task id: a late completion of a reaped task is dropped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nanolab_config::GenerationConfig;
use nanolab_core::{Clock, GenerationMode, GenerationResult};
use nanolab_resilience::RetryPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reason returned by [`GenerationStateMachine::can_start_generation`].
pub const GENERATION_IN_PROGRESS: &str = "generation_in_progress";

/// Error recorded on a task reaped by the watchdog.
pub const WATCHDOG_TIMEOUT_MESSAGE: &str = "generation timed out";

/// Error recorded on a task whose caller went away before it finished.
pub const GENERATION_ABANDONED_MESSAGE: &str = "generation abandoned";

const DEFAULT_ESTIMATE: Duration = Duration::from_secs(10);

/// Expected wall time for one image at `resolution`.
pub fn estimated_duration(resolution: &str) -> Duration {
    match resolution {
        "1K" => Duration::from_secs(8),
        "2K" => Duration::from_secs(12),
        "4K" => Duration::from_secs(18),
        _ => DEFAULT_ESTIMATE,
    }
}

/// Work a task may legitimately spend time on before it counts as stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogBudget {
    /// Sub-generations run under the task (1 for a single generation).
    pub items: u32,
    /// Remote calls each item may make.
    pub attempts_per_item: u32,
    /// Backoff each item may sleep through between attempts.
    pub backoff_per_item: Duration,
}

impl WatchdogBudget {
    /// `items` sub-generations, each retried under `retry`.
    pub fn for_retry(items: u32, retry: &RetryPolicy) -> Self {
        Self {
            items: items.max(1),
            attempts_per_item: retry.max_attempts(),
            backoff_per_item: retry.total_backoff(),
        }
    }

    /// `multiplier x items x (attempts x estimate + backoff)`.
    fn deadline(&self, estimate: Duration, multiplier: f64) -> Duration {
        let per_item = estimate.as_secs_f64() * f64::from(self.attempts_per_item.max(1))
            + self.backoff_per_item.as_secs_f64();
        let secs = per_item * f64::from(self.items.max(1)) * multiplier;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

impl Default for WatchdogBudget {
    /// One item, one attempt.
    fn default() -> Self {
        Self {
            items: 1,
            attempts_per_item: 1,
            backoff_per_item: Duration::ZERO,
        }
    }
}

/// States in the generation FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Idle,
    Pending,
    Generating,
    Completed,
    Cancelled,
    Failed,
}

impl GenerationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl std::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationStatus::Idle => write!(f, "idle"),
            GenerationStatus::Pending => write!(f, "pending"),
            GenerationStatus::Generating => write!(f, "generating"),
            GenerationStatus::Completed => write!(f, "completed"),
            GenerationStatus::Cancelled => write!(f, "cancelled"),
            GenerationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One in-flight or finished generation.
#[derive(Debug, Clone)]
pub struct GenerationTask {
    /// First 8 characters of a v4 UUID.
    pub id: String,
    pub prompt: String,
    pub mode: GenerationMode,
    pub resolution: String,
    pub status: GenerationStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    /// Expected wall time for all items of the task.
    pub estimated_duration: Duration,
    /// Elapsed time after which the watchdog may reap the task.
    pub watchdog_deadline: Duration,
    pub error: Option<String>,
    pub results: Vec<GenerationResult>,
    pub cancelled: bool,
    cancel_token: CancellationToken,
}

impl GenerationTask {
    fn new(
        prompt: &str,
        mode: GenerationMode,
        resolution: &str,
        now: DateTime<Utc>,
        budget: WatchdogBudget,
        multiplier: f64,
    ) -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);
        let per_item = estimated_duration(resolution);
        Self {
            id,
            prompt: prompt.to_string(),
            mode,
            resolution: resolution.to_string(),
            status: GenerationStatus::Generating,
            created_at: now,
            started_at: Some(now),
            completed_at: None,
            progress: 0.0,
            estimated_duration: per_item.saturating_mul(budget.items.max(1)),
            watchdog_deadline: budget.deadline(per_item, multiplier),
            error: None,
            results: Vec::new(),
            cancelled: false,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Token tripped by [`GenerationStateMachine::cancel_generation`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        self.started_at
            .and_then(|started| (now - started).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

/// Single-flight generation state for one session.
pub struct GenerationStateMachine {
    current: Option<GenerationTask>,
    history: VecDeque<GenerationTask>,
    history_capacity: usize,
    watchdog_multiplier: f64,
    clock: Arc<dyn Clock>,
}

impl GenerationStateMachine {
    pub fn new(clock: Arc<dyn Clock>, history_capacity: usize, watchdog_multiplier: f64) -> Self {
        Self {
            current: None,
            history: VecDeque::with_capacity(history_capacity),
            history_capacity: history_capacity.max(1),
            watchdog_multiplier,
            clock,
        }
    }

    pub fn from_config(clock: Arc<dyn Clock>, config: &GenerationConfig) -> Self {
        Self::new(clock, config.history_capacity, config.watchdog_multiplier)
    }

    /// Current FSM state: the task's status, or `Idle` with an empty slot.
    pub fn status(&self) -> GenerationStatus {
        self.current
            .as_ref()
            .map_or(GenerationStatus::Idle, |task| task.status)
    }

    fn is_stale(&self, task: &GenerationTask) -> bool {
        task.elapsed(self.clock.now()) > task.watchdog_deadline
    }

    fn live_task(&self) -> Option<&GenerationTask> {
        self.current.as_ref().filter(|task| !self.is_stale(task))
    }

    /// Whether a new generation may start. Pure read.
    ///
    /// A slot held by a task past its watchdog deadline counts as free.
    pub fn can_start_generation(&self) -> (bool, &'static str) {
        match self.live_task() {
            Some(_) => (false, GENERATION_IN_PROGRESS),
            None => (true, ""),
        }
    }

    /// True while a task within its watchdog deadline holds the slot.
    /// Always the negation of [`Self::can_start_generation`].
    pub fn is_generating(&self) -> bool {
        self.live_task().is_some()
    }

    /// Fail a task stuck past its watchdog deadline and release the slot.
    /// Returns the reaped task id.
    pub fn reap_stale(&mut self) -> Option<String> {
        let id = self
            .current
            .as_ref()
            .filter(|task| self.is_stale(task))
            .map(|task| task.id.clone())?;
        warn!(task_id = %id, "watchdog reaped stale generation");
        self.finish(&id, None, Some(WATCHDOG_TIMEOUT_MESSAGE.to_string()));
        Some(id)
    }

    /// Occupy the slot with a new single-attempt `Generating` task.
    ///
    /// Returns `None` when a live task already holds the slot.
    pub fn start_generation(
        &mut self,
        prompt: &str,
        mode: GenerationMode,
        resolution: &str,
    ) -> Option<GenerationTask> {
        self.start_generation_with_budget(prompt, mode, resolution, WatchdogBudget::default())
    }

    /// Like [`Self::start_generation`], with a watchdog deadline sized for
    /// `budget`.
    pub fn start_generation_with_budget(
        &mut self,
        prompt: &str,
        mode: GenerationMode,
        resolution: &str,
        budget: WatchdogBudget,
    ) -> Option<GenerationTask> {
        self.reap_stale();
        if self.current.is_some() {
            debug!("start rejected, generation already in progress");
            return None;
        }
        let task = GenerationTask::new(
            prompt,
            mode,
            resolution,
            self.clock.now(),
            budget,
            self.watchdog_multiplier,
        );
        info!(
            task_id = %task.id,
            mode = %mode,
            resolution,
            items = budget.items,
            estimate_secs = task.estimated_duration.as_secs(),
            deadline_secs = task.watchdog_deadline.as_secs(),
            "generation started"
        );
        self.current = Some(task.clone());
        Some(task)
    }

    /// Clamp into `[0, 1]`. Ignored without a current task or for NaN.
    pub fn update_progress(&mut self, fraction: f64) {
        if fraction.is_nan() {
            return;
        }
        if let Some(task) = self.current.as_mut() {
            task.progress = fraction.clamp(0.0, 1.0);
        }
    }

    pub fn cancel_generation(&mut self) {
        if let Some(task) = self.current.as_mut() {
            task.cancelled = true;
            task.status = GenerationStatus::Cancelled;
            task.cancel_token.cancel();
            info!(task_id = %task.id, "generation cancel requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.current.as_ref().is_some_and(|task| task.cancelled)
    }

    /// Finish task `task_id` and clear the slot.
    ///
    /// `Failed` when `error` is given, else `Cancelled` if the cancel flag
    /// is set, else `Completed`. Returns the finished task, or `None` when
    /// `task_id` no longer holds the slot (it was reaped and replaced).
    pub fn complete_generation(
        &mut self,
        task_id: &str,
        results: Option<Vec<GenerationResult>>,
        error: Option<String>,
    ) -> Option<GenerationTask> {
        self.finish(task_id, results, error)
    }

    fn finish(
        &mut self,
        task_id: &str,
        results: Option<Vec<GenerationResult>>,
        error: Option<String>,
    ) -> Option<GenerationTask> {
        match self.current.as_ref() {
            Some(task) if task.id == task_id => {}
            current => {
                warn!(
                    task_id,
                    current = current.map_or("", |task| task.id.as_str()),
                    "ignoring completion of a task that no longer holds the slot"
                );
                return None;
            }
        }
        let mut task = self.current.take()?;
        task.completed_at = Some(self.clock.now());
        task.progress = 1.0;
        if let Some(results) = results {
            task.results = results;
        }
        task.status = if error.is_some() {
            GenerationStatus::Failed
        } else if task.cancelled {
            GenerationStatus::Cancelled
        } else {
            GenerationStatus::Completed
        };
        task.error = error;

        info!(
            task_id = %task.id,
            status = %task.status,
            elapsed_ms = task.elapsed(self.clock.now()).as_millis() as u64,
            "generation finished"
        );

        self.history.push_front(task.clone());
        self.history.truncate(self.history_capacity);
        Some(task)
    }

    /// `max(0, estimate - elapsed)`; zero with no current task.
    pub fn get_estimated_remaining_time(&self) -> Duration {
        self.current.as_ref().map_or(Duration::ZERO, |task| {
            task.estimated_duration
                .saturating_sub(task.elapsed(self.clock.now()))
        })
    }

    pub fn get_elapsed_time(&self) -> Duration {
        self.current
            .as_ref()
            .map_or(Duration::ZERO, |task| task.elapsed(self.clock.now()))
    }

    pub fn current_task(&self) -> Option<&GenerationTask> {
        self.current.as_ref()
    }

    /// Finished tasks, newest first.
    pub fn history(&self) -> impl Iterator<Item = &GenerationTask> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use nanolab_core::ManualClock;
    use proptest::prelude::*;

    use super::*;

    fn machine() -> (Arc<ManualClock>, GenerationStateMachine) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 2, 12, 0, 0).unwrap(),
        ));
        let fsm = GenerationStateMachine::new(clock.clone(), 20, 3.0);
        (clock, fsm)
    }

    #[test]
    fn estimates_by_resolution() {
        assert_eq!(estimated_duration("1K"), Duration::from_secs(8));
        assert_eq!(estimated_duration("2K"), Duration::from_secs(12));
        assert_eq!(estimated_duration("4K"), Duration::from_secs(18));
        assert_eq!(estimated_duration("8K"), Duration::from_secs(10));
    }

    #[test]
    fn second_start_is_rejected() {
        let (_, mut fsm) = machine();
        assert_eq!(fsm.can_start_generation(), (true, ""));
        let task = fsm
            .start_generation("a fox", GenerationMode::Basic, "1K")
            .unwrap();
        assert_eq!(task.id.len(), 8);
        assert_eq!(task.status, GenerationStatus::Generating);
        assert_eq!(fsm.status(), GenerationStatus::Generating);
        assert_eq!(fsm.can_start_generation(), (false, GENERATION_IN_PROGRESS));
        assert!(fsm
            .start_generation("another", GenerationMode::Basic, "1K")
            .is_none());
    }

    #[test]
    fn completion_sets_full_progress_and_frees_slot() {
        let (_, mut fsm) = machine();
        let task = fsm
            .start_generation("p", GenerationMode::Chat, "2K")
            .unwrap();
        fsm.update_progress(0.4);
        let done = fsm
            .complete_generation(&task.id, Some(vec![GenerationResult::default()]), None)
            .unwrap();
        assert_eq!(done.status, GenerationStatus::Completed);
        assert_eq!(done.progress, 1.0);
        assert_eq!(done.results.len(), 1);
        assert!(done.completed_at.is_some());
        assert_eq!(fsm.status(), GenerationStatus::Idle);
        assert!(!fsm.is_generating());
        assert_eq!(fsm.history().next().unwrap().id, done.id);
    }

    #[test]
    fn error_wins_over_cancel_flag() {
        let (_, mut fsm) = machine();
        let task = fsm
            .start_generation("p", GenerationMode::Basic, "1K")
            .unwrap();
        fsm.cancel_generation();
        let done = fsm
            .complete_generation(&task.id, None, Some("boom".into()))
            .unwrap();
        assert_eq!(done.status, GenerationStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("boom"));
    }

    #[test]
    fn cancel_is_advisory_until_completion() {
        let (_, mut fsm) = machine();
        let task = fsm
            .start_generation("p", GenerationMode::Batch, "1K")
            .unwrap();
        let token = task.cancel_token();
        fsm.cancel_generation();
        assert!(fsm.is_cancelled());
        assert!(token.is_cancelled());
        assert_eq!(fsm.status(), GenerationStatus::Cancelled);
        // Slot stays taken until the dispatched call returns.
        assert!(!fsm.can_start_generation().0);

        let done = fsm.complete_generation(&task.id, None, None).unwrap();
        assert_eq!(done.status, GenerationStatus::Cancelled);
        assert!(!fsm.is_cancelled());
    }

    #[test]
    fn remaining_and_elapsed_follow_clock() {
        let (clock, mut fsm) = machine();
        assert_eq!(fsm.get_estimated_remaining_time(), Duration::ZERO);
        fsm.start_generation("p", GenerationMode::Basic, "1K");
        clock.advance(chrono::Duration::seconds(3));
        assert_eq!(fsm.get_elapsed_time(), Duration::from_secs(3));
        assert_eq!(fsm.get_estimated_remaining_time(), Duration::from_secs(5));
        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(fsm.get_estimated_remaining_time(), Duration::ZERO);
    }

    #[test]
    fn history_is_bounded_newest_first() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 2, 12, 0, 0).unwrap(),
        ));
        let mut fsm = GenerationStateMachine::new(clock, 3, 3.0);
        let mut ids = Vec::new();
        for i in 0..5 {
            let task = fsm
                .start_generation(&format!("p{i}"), GenerationMode::Basic, "1K")
                .unwrap();
            fsm.complete_generation(&task.id, None, None);
            ids.push(task.id);
        }
        let kept: Vec<_> = fsm.history().map(|t| t.id.clone()).collect();
        assert_eq!(kept, vec![ids[4].clone(), ids[3].clone(), ids[2].clone()]);
    }

    #[test]
    fn watchdog_frees_stuck_slot() {
        let (clock, mut fsm) = machine();
        let stuck = fsm
            .start_generation("p", GenerationMode::Basic, "1K")
            .unwrap();
        // 1K estimate is 8s; stale after 24s.
        clock.advance(chrono::Duration::seconds(24));
        assert!(!fsm.can_start_generation().0);
        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(fsm.can_start_generation(), (true, ""));

        let next = fsm
            .start_generation("q", GenerationMode::Basic, "1K")
            .unwrap();
        assert_ne!(next.id, stuck.id);
        let reaped = fsm.history().next().unwrap();
        assert_eq!(reaped.id, stuck.id);
        assert_eq!(reaped.status, GenerationStatus::Failed);
        assert_eq!(reaped.error.as_deref(), Some(WATCHDOG_TIMEOUT_MESSAGE));
    }

    #[test]
    fn reap_stale_leaves_live_task_alone() {
        let (clock, mut fsm) = machine();
        fsm.start_generation("p", GenerationMode::Basic, "4K");
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(fsm.reap_stale(), None);
        assert!(fsm.is_generating());
    }

    #[test]
    fn stale_slot_is_not_generating() {
        let (clock, mut fsm) = machine();
        fsm.start_generation("p", GenerationMode::Basic, "1K");
        assert!(fsm.is_generating());
        clock.advance(chrono::Duration::seconds(25));
        assert!(!fsm.is_generating());
        assert!(fsm.can_start_generation().0);
        // The stale task is still visible until reaped.
        assert!(fsm.current_task().is_some());
    }

    #[test]
    fn late_completion_of_reaped_task_is_ignored() {
        let (clock, mut fsm) = machine();
        let first = fsm
            .start_generation("first", GenerationMode::Basic, "1K")
            .unwrap();
        clock.advance(chrono::Duration::seconds(25));
        let second = fsm
            .start_generation("second", GenerationMode::Basic, "1K")
            .unwrap();

        let late = fsm.complete_generation(
            &first.id,
            Some(vec![GenerationResult::default()]),
            None,
        );
        assert!(late.is_none());
        assert_eq!(fsm.current_task().unwrap().id, second.id);
        assert!(fsm.is_generating());

        let done = fsm.complete_generation(&second.id, None, None).unwrap();
        assert_eq!(done.prompt, "second");
        assert!(done.results.is_empty());
        let reaped = fsm.history().nth(1).unwrap();
        assert_eq!(reaped.id, first.id);
        assert_eq!(reaped.error.as_deref(), Some(WATCHDOG_TIMEOUT_MESSAGE));
    }

    #[test]
    fn completion_without_task_is_ignored() {
        let (_, mut fsm) = machine();
        assert!(fsm.complete_generation("deadbeef", None, None).is_none());
        assert_eq!(fsm.history_len(), 0);
    }

    #[test]
    fn deadline_covers_retries_and_items() {
        let (clock, mut fsm) = machine();
        let retry = RetryPolicy::default();
        let task = fsm
            .start_generation_with_budget(
                "p",
                GenerationMode::Basic,
                "1K",
                WatchdogBudget::for_retry(1, &retry),
            )
            .unwrap();
        // 3 x (4 attempts x 8s + 14s backoff)
        assert_eq!(task.watchdog_deadline, Duration::from_secs(138));
        clock.advance(chrono::Duration::seconds(100));
        assert!(fsm.is_generating());
        fsm.complete_generation(&task.id, None, None);

        let batch = fsm
            .start_generation_with_budget(
                "p",
                GenerationMode::Batch,
                "1K",
                WatchdogBudget::for_retry(8, &RetryPolicy::no_retry()),
            )
            .unwrap();
        assert_eq!(batch.estimated_duration, Duration::from_secs(64));
        assert_eq!(batch.watchdog_deadline, Duration::from_secs(192));
        clock.advance(chrono::Duration::seconds(150));
        assert_eq!(fsm.reap_stale(), None);
        clock.advance(chrono::Duration::seconds(43));
        assert_eq!(fsm.reap_stale(), Some(batch.id));
    }

    #[test]
    fn progress_without_task_is_noop() {
        let (_, mut fsm) = machine();
        fsm.update_progress(0.5);
        assert!(fsm.current_task().is_none());
    }

    proptest! {
        #[test]
        fn progress_is_clamped(fraction in proptest::num::f64::ANY) {
            let (_, mut fsm) = machine();
            fsm.start_generation("p", GenerationMode::Basic, "1K");
            fsm.update_progress(0.25);
            fsm.update_progress(fraction);
            let progress = fsm.current_task().unwrap().progress;
            prop_assert!((0.0..=1.0).contains(&progress));
            if fraction.is_nan() {
                prop_assert_eq!(progress, 0.25);
            }
        }
    }
}
