// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions for the external collaborators of the core.
//!
//! Both adapters extend the [`PluginAdapter`] base trait and use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod generator;
pub mod store;

pub use adapter::PluginAdapter;
pub use generator::GenerationClient;
pub use store::BlobStore;
