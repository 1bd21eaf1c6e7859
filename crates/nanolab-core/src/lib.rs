// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Nanolab generation orchestration & quota core.
//!
//! This crate provides the foundational trait definitions, error types,
//! clock abstraction and common types used throughout the workspace. The
//! remote generation client and the quota blob store implement traits
//! defined here.

pub mod clock;
pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::NanolabError;
pub use types::{
    AdapterType, BlendRequest, ChatRequest, ChatRole, ChatTurn, GenerateRequest, GeneratedImage,
    GenerationMode, GenerationResult, HealthStatus, ProviderReply, QuotaScope, SafetyLevel,
    SafetyRating, SearchRequest, SessionId,
};

pub use traits::{BlobStore, GenerationClient, PluginAdapter};
