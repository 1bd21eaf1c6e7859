// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Nanolab integration tests.
//!
//! Provides mock adapters and test harness infrastructure for fast,
//! deterministic tests without external services.
//!
//! # Components
//!
//! - [`MockGenerationClient`] - scripted generation client
//! - [`TestHarness`] - pipeline, quota service and in-memory store on a
//!   manual clock
//! - [`fixed_clock`] - deterministic clock helpers

pub mod clock;
pub mod harness;
pub mod mock_client;

pub use clock::{clock_before_midnight, fixed_clock, fixed_start};
pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_client::{image_reply, MockGenerationClient, MockOutcome, MockProbe};
