// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Generation orchestration for Nanolab.
//!
//! This crate ties the pieces together:
//! - **State machine**: per-session single-flight slot, progress,
//!   cooperative cancellation and a watchdog for stuck tasks
//! - **Pipeline**: quota reservation, retrying client call, completion and
//!   refund, for single generations and batches
//! - **Chat**: per-session turn history replayed with every message
//! - **Health monitor**: cached API probe with slow/empty/error reporting

mod batch;
pub mod chat;
pub mod health;
pub mod pipeline;
mod reservation;
pub mod session;
pub mod state;

pub use chat::{ChatHistory, ChatOptions, DEFAULT_CHAT_ASPECT_RATIO};
pub use health::{describe_probe_error, HealthCheckResult, HealthMonitor};
pub use pipeline::{GenerationJob, GenerationPipeline, JobRequest};
pub use session::GenerationSession;
pub use state::{
    estimated_duration, GenerationStateMachine, GenerationStatus, GenerationTask, WatchdogBudget,
    GENERATION_ABANDONED_MESSAGE, GENERATION_IN_PROGRESS, WATCHDOG_TIMEOUT_MESSAGE,
};
