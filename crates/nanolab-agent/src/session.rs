// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A browser/user session: its identity, trial status, generation FSM and
//! chat history.

use std::sync::Arc;

use nanolab_config::NanolabConfig;
use nanolab_core::{Clock, SessionId};
use nanolab_cost::is_trial_mode;
use tokio::sync::{Mutex, MutexGuard};

use crate::chat::ChatHistory;
use crate::state::{GenerationStateMachine, GenerationStatus};

/// Owns the single-flight state of one session.
pub struct GenerationSession {
    id: SessionId,
    trial: bool,
    state: Arc<Mutex<GenerationStateMachine>>,
    chat: Mutex<ChatHistory>,
}

impl GenerationSession {
    pub fn new(id: SessionId, trial: bool, state: GenerationStateMachine) -> Self {
        Self {
            id,
            trial,
            state: Arc::new(Mutex::new(state)),
            chat: Mutex::new(ChatHistory::new()),
        }
    }

    /// Build a session from configuration. `user_api_key` is the key the
    /// session brought itself, if any; trial mode applies when neither it
    /// nor a server key is present, or when forced.
    pub fn from_config(
        id: SessionId,
        config: &NanolabConfig,
        user_api_key: Option<&str>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let trial = is_trial_mode(
            config.quota.force_trial_mode,
            user_api_key,
            config.gemini.api_key.as_deref(),
        );
        Self::new(
            id,
            trial,
            GenerationStateMachine::from_config(clock, &config.generation),
        )
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Whether generations in this session draw on the trial quota.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Exclusive access to the generation FSM.
    pub async fn state(&self) -> MutexGuard<'_, GenerationStateMachine> {
        self.state.lock().await
    }

    /// Handle to the FSM that outlives a borrow of the session.
    pub(crate) fn shared_state(&self) -> Arc<Mutex<GenerationStateMachine>> {
        Arc::clone(&self.state)
    }

    /// Exclusive access to the conversation used by chat messages.
    pub async fn chat(&self) -> MutexGuard<'_, ChatHistory> {
        self.chat.lock().await
    }

    pub async fn status(&self) -> GenerationStatus {
        self.state.lock().await.status()
    }

    /// Request cooperative cancellation of the current generation.
    pub async fn cancel(&self) {
        self.state.lock().await.cancel_generation();
    }
}

#[cfg(test)]
mod tests {
    use nanolab_core::SystemClock;

    use super::*;

    #[tokio::test]
    async fn trial_follows_key_presence() {
        let mut config = NanolabConfig::default();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let anonymous =
            GenerationSession::from_config(SessionId("a".into()), &config, None, clock.clone());
        assert!(anonymous.is_trial());

        let own_key = GenerationSession::from_config(
            SessionId("b".into()),
            &config,
            Some("user-key"),
            clock.clone(),
        );
        assert!(!own_key.is_trial());

        config.quota.force_trial_mode = true;
        let forced =
            GenerationSession::from_config(SessionId("c".into()), &config, Some("user-key"), clock);
        assert!(forced.is_trial());
        assert_eq!(forced.status().await, GenerationStatus::Idle);
    }
}
