// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remote generation client trait (text-to-image, blend, search-grounded).

use async_trait::async_trait;

use crate::error::NanolabError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{BlendRequest, ChatRequest, GenerateRequest, ProviderReply, SearchRequest};

/// Adapter for the external image-generation API.
///
/// Each method performs exactly one remote request. Retries and safety
/// classification are layered on top by `nanolab-resilience`; a safety block
/// may surface either as a reply with a `SAFETY` finish reason or as an error
/// whose message mentions the block.
#[async_trait]
pub trait GenerationClient: PluginAdapter {
    /// Generates an image from a text prompt.
    async fn generate(&self, request: &GenerateRequest) -> Result<ProviderReply, NanolabError>;

    /// Combines several input images according to a prompt.
    async fn blend_images(&self, request: &BlendRequest) -> Result<ProviderReply, NanolabError>;

    /// Generates an image grounded on live search results.
    async fn generate_with_search(
        &self,
        request: &SearchRequest,
    ) -> Result<ProviderReply, NanolabError>;

    /// Continues a conversation: every earlier turn is sent along with the
    /// new message so the provider can refine its previous image.
    async fn chat(&self, request: &ChatRequest) -> Result<ProviderReply, NanolabError>;

    /// Sends a minimal text-only request. Returns `true` when the provider
    /// produced at least one candidate.
    async fn probe(&self) -> Result<bool, NanolabError>;
}
