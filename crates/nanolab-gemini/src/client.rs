// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the Gemini `generateContent` API.
//!
//! [`GeminiClient`] performs exactly one request per call. Retry and safety
//! classification live in `nanolab-resilience`, so HTTP failures are
//! surfaced as [`NanolabError::Provider`] with the status code attached.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use nanolab_config::GeminiConfig;
use nanolab_core::{
    AdapterType, BlendRequest, ChatRequest, ChatRole, ChatTurn, GenerateRequest, GeneratedImage,
    GenerationClient, HealthStatus, NanolabError, PluginAdapter, ProviderReply, SafetyRating,
    SearchRequest,
};
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, warn};

use crate::types::{
    ApiErrorResponse, Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
    ImageConfig, Part, ThinkingConfig, Tool, WireSafetyRating, safety_settings,
};

/// Prompt sent by [`GeminiClient::probe`].
pub const PROBE_PROMPT: &str = "Say 'OK' if you can read this.";

const PROBE_MAX_OUTPUT_TOKENS: u32 = 10;

/// HTTP client for Gemini API communication.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    model: String,
    health_model: String,
    base_url: String,
}

impl GeminiClient {
    /// Creates a client authenticated with `api_key`.
    pub fn new(
        api_key: &str,
        model: impl Into<String>,
        health_model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NanolabError> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key)
            .map_err(|e| NanolabError::Config(format!("invalid API key header value: {e}")))?;
        key.set_sensitive(true);
        headers.insert("x-goog-api-key", key);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| NanolabError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                status: None,
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            model: model.into(),
            health_model: health_model.into(),
            base_url: base_url.into(),
        })
    }

    /// Builds a client from the `[gemini]` section. The key is passed
    /// separately because a session may bring its own.
    pub fn from_config(config: &GeminiConfig, api_key: &str) -> Result<Self, NanolabError> {
        Self::new(
            api_key,
            &config.model,
            &config.health_model,
            &config.base_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Overrides the base URL (for testing with wiremock).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{model}:generateContent",
            self.base_url.trim_end_matches('/')
        )
    }

    async fn send(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, NanolabError> {
        let response = self
            .client
            .post(self.endpoint(model))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        debug!(status = %status, model, "generateContent response received");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(api_err) => format!(
                    "API returned {status}: {} ({})",
                    api_err.error.message, api_err.error.status
                ),
                Err(_) => format!("API returned {status}: {body}"),
            };
            warn!(status = %status, "generateContent request failed");
            return Err(NanolabError::Provider {
                message,
                status: Some(status.as_u16()),
                source: None,
            });
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| NanolabError::Provider {
                message: format!("failed to parse response: {e}"),
                status: None,
                source: Some(Box::new(e)),
            })
    }
}

fn transport_error(e: reqwest::Error) -> NanolabError {
    // Phrasing feeds the retry classifier's keyword tables.
    let message = if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("network error: {e}")
    } else {
        format!("HTTP request failed: {e}")
    };
    NanolabError::Provider {
        message,
        status: None,
        source: Some(Box::new(e)),
    }
}

fn image_modalities() -> Vec<String> {
    vec!["TEXT".to_string(), "IMAGE".to_string()]
}

/// `imageSize` is only sent for resolutions above 1K.
fn image_size(resolution: &str) -> Option<String> {
    matches!(resolution, "2K" | "4K").then(|| resolution.to_string())
}

pub(crate) fn build_generate_request(request: &GenerateRequest) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content::user(vec![Part::text(&request.prompt)])],
        generation_config: Some(GenerationConfig {
            response_modalities: image_modalities(),
            image_config: Some(ImageConfig {
                aspect_ratio: request.aspect_ratio.clone(),
                image_size: image_size(&request.resolution),
            }),
            thinking_config: request.enable_thinking.then_some(ThinkingConfig {
                include_thoughts: true,
            }),
            max_output_tokens: None,
        }),
        tools: if request.enable_search {
            vec![Tool::google_search()]
        } else {
            Vec::new()
        },
        safety_settings: safety_settings(request.safety_level),
    }
}

pub(crate) fn build_blend_request(request: &BlendRequest) -> GenerateContentRequest {
    let mut parts = vec![Part::text(&request.prompt)];
    parts.extend(
        request
            .images
            .iter()
            .map(|image| Part::inline(&image.mime_type, STANDARD.encode(&image.data))),
    );
    GenerateContentRequest {
        contents: vec![Content::user(parts)],
        generation_config: Some(GenerationConfig {
            response_modalities: image_modalities(),
            image_config: Some(ImageConfig {
                aspect_ratio: request.aspect_ratio.clone(),
                image_size: None,
            }),
            ..GenerationConfig::default()
        }),
        tools: Vec::new(),
        safety_settings: safety_settings(request.safety_level),
    }
}

pub(crate) fn build_search_request(request: &SearchRequest) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content::user(vec![Part::text(&request.prompt)])],
        generation_config: Some(GenerationConfig {
            response_modalities: image_modalities(),
            image_config: Some(ImageConfig {
                aspect_ratio: request.aspect_ratio.clone(),
                image_size: None,
            }),
            ..GenerationConfig::default()
        }),
        tools: vec![Tool::google_search()],
        safety_settings: safety_settings(request.safety_level),
    }
}

fn turn_content(turn: &ChatTurn) -> Content {
    let mut parts = Vec::with_capacity(2);
    if !turn.text.is_empty() {
        parts.push(Part::text(&turn.text));
    }
    if let Some(image) = &turn.image {
        parts.push(Part::inline(&image.mime_type, STANDARD.encode(&image.data)));
    }
    match turn.role {
        ChatRole::User => Content::user(parts),
        ChatRole::Model => Content::model(parts),
    }
}

/// History turns in order, then the new message as the final user turn.
/// Turns with neither text nor image are skipped.
pub(crate) fn build_chat_request(request: &ChatRequest) -> GenerateContentRequest {
    let mut contents: Vec<Content> = request
        .history
        .iter()
        .map(turn_content)
        .filter(|content| !content.parts.is_empty())
        .collect();
    contents.push(Content::user(vec![Part::text(&request.prompt)]));
    GenerateContentRequest {
        contents,
        generation_config: Some(GenerationConfig {
            response_modalities: image_modalities(),
            image_config: Some(ImageConfig {
                aspect_ratio: request.aspect_ratio.clone(),
                image_size: image_size(&request.resolution),
            }),
            ..GenerationConfig::default()
        }),
        tools: Vec::new(),
        safety_settings: safety_settings(request.safety_level),
    }
}

fn build_probe_request() -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content::user(vec![Part::text(PROBE_PROMPT)])],
        generation_config: Some(GenerationConfig {
            response_modalities: vec!["TEXT".to_string()],
            max_output_tokens: Some(PROBE_MAX_OUTPUT_TOKENS),
            ..GenerationConfig::default()
        }),
        tools: Vec::new(),
        safety_settings: Vec::new(),
    }
}

fn convert_ratings(ratings: Vec<WireSafetyRating>) -> Vec<SafetyRating> {
    ratings
        .into_iter()
        .map(|r| SafetyRating {
            category: r.category,
            probability: r.probability,
            blocked: r.blocked,
        })
        .collect()
}

fn append(slot: &mut Option<String>, text: String) {
    match slot {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(&text);
        }
        None => *slot = Some(text),
    }
}

/// Flattens the first candidate into a [`ProviderReply`].
///
/// A response without candidates is only valid when the prompt itself was
/// blocked; otherwise it is reported as a provider error.
pub(crate) fn into_reply(response: GenerateContentResponse) -> Result<ProviderReply, NanolabError> {
    let mut reply = ProviderReply::default();

    if let Some(feedback) = response.prompt_feedback {
        reply.block_reason = feedback.block_reason;
        reply.safety_ratings = convert_ratings(feedback.safety_ratings);
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        if reply.block_reason.is_some() {
            return Ok(reply);
        }
        return Err(NanolabError::provider("API returned no candidates"));
    };

    reply.finish_reason = candidate.finish_reason;
    if !candidate.safety_ratings.is_empty() {
        reply.safety_ratings = convert_ratings(candidate.safety_ratings);
    }
    reply.search_sources = candidate
        .grounding_metadata
        .and_then(|g| g.search_entry_point)
        .and_then(|s| s.rendered_content);

    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(inline) = part.inline_data {
            let data = STANDARD
                .decode(inline.data.as_bytes())
                .map_err(|e| NanolabError::Provider {
                    message: format!("invalid inline image data: {e}"),
                    status: None,
                    source: Some(Box::new(e)),
                })?;
            reply.image = Some(GeneratedImage {
                mime_type: inline.mime_type,
                data,
            });
        } else if let Some(text) = part.text {
            if part.thought.unwrap_or(false) {
                append(&mut reply.thinking, text);
            } else {
                append(&mut reply.text, text);
            }
        }
    }

    Ok(reply)
}

#[async_trait]
impl PluginAdapter for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Generator
    }

    async fn health_check(&self) -> Result<HealthStatus, NanolabError> {
        match self.probe().await {
            Ok(true) => Ok(HealthStatus::Healthy),
            Ok(false) => Ok(HealthStatus::Unhealthy(
                "API returned empty response".to_string(),
            )),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<ProviderReply, NanolabError> {
        debug!(
            resolution = %request.resolution,
            aspect_ratio = %request.aspect_ratio,
            thinking = request.enable_thinking,
            search = request.enable_search,
            "sending generate request"
        );
        let response = self
            .send(&self.model, &build_generate_request(request))
            .await?;
        into_reply(response)
    }

    async fn blend_images(&self, request: &BlendRequest) -> Result<ProviderReply, NanolabError> {
        if request.images.is_empty() {
            return Err(NanolabError::InvalidInput(
                "blend requires at least one image".to_string(),
            ));
        }
        debug!(images = request.images.len(), "sending blend request");
        let response = self.send(&self.model, &build_blend_request(request)).await?;
        into_reply(response)
    }

    async fn generate_with_search(
        &self,
        request: &SearchRequest,
    ) -> Result<ProviderReply, NanolabError> {
        debug!("sending search-grounded request");
        let response = self
            .send(&self.model, &build_search_request(request))
            .await?;
        into_reply(response)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ProviderReply, NanolabError> {
        debug!(turns = request.history.len(), "sending chat request");
        let response = self.send(&self.model, &build_chat_request(request)).await?;
        into_reply(response)
    }

    async fn probe(&self) -> Result<bool, NanolabError> {
        let response = self
            .send(&self.health_model, &build_probe_request())
            .await?;
        Ok(!response.candidates.is_empty())
    }
}
