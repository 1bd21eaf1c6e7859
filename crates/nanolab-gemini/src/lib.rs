// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Google Gemini adapter for Nanolab.
//!
//! Implements [`nanolab_core::GenerationClient`] over the REST
//! `generateContent` endpoint: text-to-image, multi-image blend and
//! search-grounded generation, plus a cheap text probe for health checks.

pub mod client;
pub mod types;

pub use client::{GeminiClient, PROBE_PROMPT};
