// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilience primitives for remote generation calls.
//!
//! - [`retry`]: bounded retry with a configurable backoff schedule.
//! - [`classify`]: safety / transient / fatal classification and the
//!   user-facing error taxonomy.

pub mod classify;
pub mod retry;

pub use classify::{
    categorize, classify_error, classify_message, friendly_message, is_safety_block,
    ErrorCategory, FailureKind, SAFETY_BLOCKED_MESSAGE,
};
pub use retry::{execute_with_retry, RetryPolicy};
