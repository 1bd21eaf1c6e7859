// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-turn chat: iterative refinement of an image across messages.
//!
//! Each session keeps a [`ChatHistory`]. A message is sent with every
//! earlier turn, so the provider sees its previous images and can edit
//! them. Only exchanges that produced a reply are recorded; a failed or
//! blocked message leaves the history as it was.

use nanolab_core::{ChatRequest, ChatTurn, GenerationResult, NanolabError, SafetyLevel};
use tracing::{debug, info};

use crate::pipeline::{GenerationJob, GenerationPipeline};
use crate::session::GenerationSession;

/// Aspect ratio of a chat started implicitly by its first message.
pub const DEFAULT_CHAT_ASPECT_RATIO: &str = "16:9";

/// Conversation state of one session.
#[derive(Debug, Clone)]
pub struct ChatHistory {
    turns: Vec<ChatTurn>,
    aspect_ratio: String,
    active: bool,
    /// Bumped on every start or clear, so a reply to a message sent before
    /// a reset is not recorded into the new conversation.
    epoch: u64,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self {
            turns: Vec::new(),
            aspect_ratio: DEFAULT_CHAT_ASPECT_RATIO.to_string(),
            active: false,
            epoch: 0,
        }
    }

    /// Begin a fresh conversation with `aspect_ratio` as its default.
    pub fn start_session(&mut self, aspect_ratio: &str) {
        self.turns.clear();
        self.aspect_ratio = aspect_ratio.to_string();
        self.active = true;
        self.epoch += 1;
    }

    /// Drop the conversation. The next message starts a new one.
    pub fn clear_session(&mut self) {
        self.turns.clear();
        self.active = false;
        self.epoch += 1;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Recorded turns, oldest first.
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn aspect_ratio(&self) -> &str {
        &self.aspect_ratio
    }

    fn record(&mut self, epoch: u64, prompt: &str, result: &GenerationResult) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.turns.push(ChatTurn::user(prompt));
        self.turns.push(ChatTurn::model(
            result.text.clone().unwrap_or_default(),
            result.image.clone(),
        ));
        true
    }
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-message overrides for [`GenerationPipeline::send_message`].
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Overrides the conversation's aspect ratio for this message only.
    pub aspect_ratio: Option<String>,
    /// Defaults to `1K`.
    pub resolution: Option<String>,
    pub safety_level: SafetyLevel,
}

impl GenerationPipeline {
    /// Send the next chat message for `session`.
    ///
    /// Starts a conversation if none is active. The call goes through
    /// [`GenerationPipeline::run`] under the `chat` billing mode, so the
    /// single-flight slot, trial quota and retries apply as for any other
    /// generation.
    pub async fn send_message(
        &self,
        session: &GenerationSession,
        message: &str,
        options: ChatOptions,
    ) -> Result<GenerationResult, NanolabError> {
        let (request, epoch) = {
            let mut chat = session.chat().await;
            if !chat.is_active() {
                chat.start_session(DEFAULT_CHAT_ASPECT_RATIO);
            }
            let request = ChatRequest {
                history: chat.turns().to_vec(),
                prompt: message.to_string(),
                aspect_ratio: options
                    .aspect_ratio
                    .unwrap_or_else(|| chat.aspect_ratio().to_string()),
                resolution: options.resolution.unwrap_or_else(|| "1K".to_string()),
                safety_level: options.safety_level,
            };
            (request, chat.epoch)
        };
        let prior_turns = request.history.len();

        let result = self.run(session, GenerationJob::chat(request)).await?;

        if result.error.is_none() {
            let recorded = session.chat().await.record(epoch, message, &result);
            if !recorded {
                debug!(session = %session.id().0, "chat was reset while a message was in flight");
            }
        }
        info!(
            session = %session.id().0,
            prior_turns,
            success = result.is_success(),
            "chat message complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use nanolab_core::{ChatRole, GeneratedImage};

    use super::*;

    fn reply_with_image() -> GenerationResult {
        GenerationResult {
            image: Some(GeneratedImage {
                mime_type: "image/png".into(),
                data: vec![1],
            }),
            text: Some("here".into()),
            ..GenerationResult::default()
        }
    }

    #[test]
    fn record_appends_user_then_model() {
        let mut chat = ChatHistory::new();
        chat.start_session("1:1");
        assert!(chat.record(chat.epoch, "a fox", &reply_with_image()));
        let roles: Vec<_> = chat.turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::Model]);
        assert_eq!(chat.turns()[1].text, "here");
        assert!(chat.turns()[1].image.is_some());
        assert_eq!(chat.aspect_ratio(), "1:1");
    }

    #[test]
    fn reply_after_reset_is_not_recorded() {
        let mut chat = ChatHistory::new();
        chat.start_session("16:9");
        let stale = chat.epoch;
        chat.clear_session();
        assert!(!chat.is_active());
        assert!(!chat.record(stale, "a fox", &reply_with_image()));
        assert!(chat.turns().is_empty());
    }

    #[test]
    fn start_session_forgets_previous_turns() {
        let mut chat = ChatHistory::new();
        chat.start_session("16:9");
        chat.record(chat.epoch, "one", &reply_with_image());
        chat.start_session("4:3");
        assert!(chat.turns().is_empty());
        assert!(chat.is_active());
        assert_eq!(chat.aspect_ratio(), "4:3");
    }
}
