// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-turn chat over the test harness.

use std::time::Duration;

use nanolab_agent::{ChatOptions, GenerationStatus};
use nanolab_core::{ChatRole, GenerationMode, NanolabError};
use nanolab_test_utils::{MockOutcome, TestHarness};

fn harness() -> TestHarness {
    TestHarness::builder()
        .with_quota(|q| q.cooldown_seconds = 0)
        .build()
}

#[tokio::test]
async fn second_message_carries_the_first_exchange() {
    let harness = harness();
    let session = harness.trial_session("chat");

    let first = harness
        .pipeline
        .send_message(&session, "a fox in a meadow", ChatOptions::default())
        .await
        .unwrap();
    assert!(first.is_success());
    let second = harness
        .pipeline
        .send_message(&session, "now make it night", ChatOptions::default())
        .await
        .unwrap();
    assert!(second.is_success());

    let requests = harness.client.chat_requests().await;
    assert_eq!(requests.len(), 2);
    assert!(requests[0].history.is_empty());
    assert_eq!(requests[0].aspect_ratio, "16:9");

    let history = &requests[1].history;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, ChatRole::User);
    assert_eq!(history[0].text, "a fox in a meadow");
    assert_eq!(history[1].role, ChatRole::Model);
    assert_eq!(history[1].text, "mock image");
    assert!(history[1].image.is_some());
    assert_eq!(requests[1].prompt, "now make it night");

    assert_eq!(session.chat().await.turns().len(), 4);

    let status = harness.quota.get_quota_status().await.unwrap();
    let chat = status.modes.iter().find(|m| m.key == "chat").unwrap();
    assert_eq!(chat.used, 2);

    let state = session.state().await;
    let task = state.history().next().unwrap();
    assert_eq!(task.mode, GenerationMode::Chat);
    assert_eq!(task.status, GenerationStatus::Completed);
}

#[tokio::test]
async fn failed_message_is_left_out_of_the_history() {
    let harness = TestHarness::builder()
        .with_quota(|q| q.cooldown_seconds = 0)
        .with_script(vec![
            MockOutcome::Image,
            MockOutcome::http(400, "Request contains an invalid argument"),
            MockOutcome::SafetyFinish,
        ])
        .build();
    let session = harness.trial_session("chat");

    for message in ["a lighthouse", "add a dragon", "something blocked"] {
        harness
            .pipeline
            .send_message(&session, message, ChatOptions::default())
            .await
            .unwrap();
    }
    harness
        .pipeline
        .send_message(&session, "add fog", ChatOptions::default())
        .await
        .unwrap();

    let requests = harness.client.chat_requests().await;
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[3].history.len(), 2);
    assert_eq!(requests[3].history[0].text, "a lighthouse");
    assert_eq!(session.chat().await.turns().len(), 4);

    // Only the two exchanges that produced an image stay charged.
    let status = harness.quota.get_quota_status().await.unwrap();
    assert_eq!(status.global_used, 2);
}

#[tokio::test]
async fn clear_and_restart_begin_a_new_conversation() {
    let harness = harness();
    let session = harness.keyed_session("chat");

    harness
        .pipeline
        .send_message(&session, "a castle", ChatOptions::default())
        .await
        .unwrap();
    session.chat().await.clear_session();
    assert!(!session.chat().await.is_active());

    harness
        .pipeline
        .send_message(&session, "a boat", ChatOptions::default())
        .await
        .unwrap();
    session.chat().await.start_session("1:1");
    harness
        .pipeline
        .send_message(&session, "a square boat", ChatOptions::default())
        .await
        .unwrap();
    harness
        .pipeline
        .send_message(
            &session,
            "same boat, tall",
            ChatOptions {
                aspect_ratio: Some("9:16".into()),
                ..ChatOptions::default()
            },
        )
        .await
        .unwrap();

    let requests = harness.client.chat_requests().await;
    assert!(requests[1].history.is_empty());
    assert!(requests[2].history.is_empty());
    assert_eq!(requests[2].aspect_ratio, "1:1");
    assert_eq!(requests[3].history.len(), 2);
    assert_eq!(requests[3].aspect_ratio, "9:16");
    // The override applies to one message only.
    assert_eq!(session.chat().await.aspect_ratio(), "1:1");
}

#[tokio::test(start_paused = true)]
async fn chat_shares_the_generation_slot() {
    let harness = TestHarness::builder()
        .with_quota(|q| q.cooldown_seconds = 0)
        .with_latency(Duration::from_secs(2))
        .build();
    let session = harness.trial_session("chat");

    let (chat, single) = tokio::join!(
        harness
            .pipeline
            .send_message(&session, "a fox", ChatOptions::default()),
        harness.generate(&session, "a hare", "1K"),
    );
    assert!(chat.unwrap().is_success());
    assert!(matches!(single, Err(NanolabError::GenerationInProgress)));
    assert_eq!(harness.client.calls(), 1);
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let harness = harness();
    let session = harness.trial_session("chat");
    let err = harness
        .pipeline
        .send_message(&session, "  ", ChatOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, NanolabError::InvalidInput(_)));
    assert!(harness.client.chat_requests().await.is_empty());
    assert!(session.chat().await.turns().is_empty());
}
