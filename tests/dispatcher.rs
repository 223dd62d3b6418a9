//! End-to-end session scenarios over fake engines

use std::time::Duration;

use hearth_gateway::Error;
use hearth_gateway::cascade::EngineId;
use hearth_gateway::intent::Action;
use hearth_gateway::session::{ManagerConfig, PreemptPolicy, SessionMode, SessionState, TurnOutcome, Utterance};
use hearth_gateway::transport::{DisplayAction, TransportMessage};

mod common;
use common::{FakeLlm, Harness, RecordingExecutor, ScriptedRecognizer, SpeechLog, reply_events, sentences, wait_for, wav};

#[tokio::test]
async fn matched_command_executes_and_acknowledges_without_llm() {
    let h = Harness::builder().build();
    let id = h.manager.start_session("kitchen", SessionMode::MultiTurn).await.unwrap();
    let mut events = h.bus.subscribe_session("kitchen", &id);

    let outcome = h
        .manager
        .submit_utterance(&id, Utterance::Text("turn on the lights".into()))
        .await
        .unwrap()
        .outcome()
        .await;

    assert_eq!(outcome, TurnOutcome::Executed);
    assert_eq!(h.executor.actions(), vec![Action::new("light", "turn_on", "all")]);
    assert_eq!(h.llm.complete_calls(), 0);
    assert_eq!(h.llm.stream_calls(), 0);

    let seen = reply_events(&mut events).await;
    assert_eq!(sentences(&seen), vec!["Done"]);
    assert!(seen.contains(&TransportMessage::StateChange {
        state: SessionState::Executing
    }));

    wait_for(|| h.speech.completed() == vec!["Done"]).await;
    assert_eq!(h.manager.session(&id).await.unwrap().state(), SessionState::Listening);
}

#[tokio::test]
async fn entity_target_is_shown_on_room_display() {
    let h = Harness::builder().build();
    let id = h.manager.start_session("kitchen", SessionMode::MultiTurn).await.unwrap();
    let mut events = h.bus.subscribe_session("kitchen", &id);

    h.manager
        .submit_utterance(&id, Utterance::Text("turn on the kitchen lights".into()))
        .await
        .unwrap()
        .outcome()
        .await;

    let seen = reply_events(&mut events).await;
    assert!(seen.contains(&TransportMessage::DisplayAction {
        action: DisplayAction::ShowEntity {
            entity_id: "light.kitchen".to_string()
        }
    }));
}

#[tokio::test]
async fn conversational_reply_streams_through_segmenter() {
    let h = Harness::builder()
        .llm(FakeLlm::new(&["Why", " did", " the", " programmer", "..."]))
        .build();
    let id = h.manager.start_session("den", SessionMode::MultiTurn).await.unwrap();
    let mut events = h.bus.subscribe_session("den", &id);

    let outcome = h
        .manager
        .submit_utterance(&id, Utterance::Text("tell me a joke".into()))
        .await
        .unwrap()
        .outcome()
        .await;

    assert_eq!(outcome, TurnOutcome::Replied);
    assert!(h.executor.actions().is_empty());
    assert_eq!(h.llm.complete_calls(), 1, "classifier tier consulted once");
    assert_eq!(h.llm.stream_calls(), 1);

    let seen = reply_events(&mut events).await;
    assert_eq!(sentences(&seen), vec!["Why did the programmer..."]);

    wait_for(|| h.speech.completed().len() == 1).await;
    assert_eq!(
        h.speech.started(),
        vec![(EngineId::Vits, "Why did the programmer...".to_string())]
    );
}

#[tokio::test]
async fn wake_mid_stream_cancels_playback_and_drops_pending() {
    let speech = SpeechLog::blocking();
    let h = Harness::builder()
        .llm(FakeLlm::new(&["One. ", "Two. ", "Three. "]).hanging())
        .speech(speech.clone())
        .build();
    let id = h.manager.start_session("office", SessionMode::MultiTurn).await.unwrap();
    let session = h.manager.session(&id).await.unwrap();

    let turn = h
        .manager
        .submit_utterance(&id, Utterance::Text("tell me three things".into()))
        .await
        .unwrap();

    // One playing, two queued, generation still open
    wait_for(|| speech.started().len() == 1 && session.queue().len() == 2).await;
    assert_eq!(session.state(), SessionState::Streaming);

    let woken = h.manager.wake("office").await.unwrap();
    assert_eq!(woken, id);
    assert_eq!(session.state(), SessionState::Listening);
    assert!(session.queue().is_empty());

    assert_eq!(turn.outcome().await, TurnOutcome::Interrupted);
    wait_for(|| speech.interrupted() == vec!["One."]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(speech.started_texts(), vec!["One."]);
    assert_eq!(session.state(), SessionState::Listening);
}

#[tokio::test]
async fn newer_utterance_supersedes_running_turn() {
    let h = Harness::builder()
        .llm(FakeLlm::new(&["Let me think. "]).hanging())
        .build();
    let id = h.manager.start_session("den", SessionMode::MultiTurn).await.unwrap();

    let first = h
        .manager
        .submit_utterance(&id, Utterance::Text("tell me a story".into()))
        .await
        .unwrap();
    wait_for(|| h.llm.stream_calls() == 1).await;

    let second = h
        .manager
        .submit_utterance(&id, Utterance::Text("turn off the lights".into()))
        .await
        .unwrap();

    assert_eq!(first.outcome().await, TurnOutcome::Interrupted);
    assert_eq!(second.outcome().await, TurnOutcome::Executed);
    assert_eq!(h.executor.actions(), vec![Action::new("light", "turn_off", "all")]);
}

#[tokio::test]
async fn action_failure_is_reported_and_session_continues() {
    let h = Harness::builder().executor(RecordingExecutor::failing()).build();
    let id = h.manager.start_session("garage", SessionMode::MultiTurn).await.unwrap();
    let mut events = h.bus.subscribe_session("garage", &id);

    let outcome = h
        .manager
        .submit_utterance(&id, Utterance::Text("open the garage door cover".into()))
        .await
        .unwrap()
        .outcome()
        .await;

    assert_eq!(outcome, TurnOutcome::ActionFailed);
    assert_eq!(sentences(&reply_events(&mut events).await), vec!["Sorry, I couldn't do that"]);
    assert!(h.manager.session(&id).await.is_some());
    assert_eq!(h.manager.session(&id).await.unwrap().state(), SessionState::Listening);
}

#[tokio::test]
async fn gibberish_short_circuits_before_llm() {
    let h = Harness::builder().build();
    let id = h.manager.start_session("hall", SessionMode::MultiTurn).await.unwrap();
    let mut events = h.bus.subscribe_session("hall", &id);

    let outcome = h
        .manager
        .submit_utterance(&id, Utterance::Text("zzkrt bfft".into()))
        .await
        .unwrap()
        .outcome()
        .await;

    assert_eq!(outcome, TurnOutcome::NotUnderstood);
    assert_eq!(sentences(&reply_events(&mut events).await), vec!["I don't understand"]);
    assert_eq!(h.llm.complete_calls() + h.llm.stream_calls(), 0);
}

#[tokio::test]
async fn reply_stream_failure_speaks_error_phrase() {
    let h = Harness::builder()
        .llm(FakeLlm::new(&[]).failing_stream())
        .build();
    let id = h.manager.start_session("hall", SessionMode::MultiTurn).await.unwrap();
    let mut events = h.bus.subscribe_session("hall", &id);

    let outcome = h
        .manager
        .submit_utterance(&id, Utterance::Text("what is the weather like".into()))
        .await
        .unwrap()
        .outcome()
        .await;

    assert_eq!(outcome, TurnOutcome::Failed);
    let seen = reply_events(&mut events).await;
    assert!(seen.iter().any(|m| matches!(m, TransportMessage::Error { .. })));
    assert_eq!(sentences(&seen), vec!["Sorry, something went wrong"]);
}

#[tokio::test]
async fn audio_falls_back_to_second_stt_tier() {
    let h = Harness::builder()
        .stt(
            ScriptedRecognizer::new(EngineId::Vosk, "turn on the", 0.4),
            ScriptedRecognizer::new(EngineId::Whisper, "turn on the desk lamp", 0.7),
        )
        .build();
    let id = h.manager.start_session("study", SessionMode::MultiTurn).await.unwrap();
    let mut events = h.bus.subscribe_session("study", &id);

    let outcome = h
        .manager
        .submit_utterance(&id, Utterance::Audio(wav(800)))
        .await
        .unwrap()
        .outcome()
        .await;

    assert_eq!(outcome, TurnOutcome::Executed);
    assert_eq!((h.vosk.calls(), h.whisper.calls()), (1, 1));
    assert_eq!(h.executor.actions(), vec![Action::new("light", "turn_on", "light.desk")]);

    let seen = reply_events(&mut events).await;
    assert!(seen.contains(&TransportMessage::StateChange {
        state: SessionState::Transcribing
    }));
    assert!(seen.iter().any(|m| matches!(
        m,
        TransportMessage::Transcript { engine: EngineId::Whisper, .. }
    )));
}

#[tokio::test]
async fn short_audio_never_reaches_stt() {
    let h = Harness::builder().build();
    let id = h.manager.start_session("study", SessionMode::MultiTurn).await.unwrap();

    let outcome = h
        .manager
        .submit_utterance(&id, Utterance::Audio(wav(50)))
        .await
        .unwrap()
        .outcome()
        .await;

    assert_eq!(outcome, TurnOutcome::NotUnderstood);
    assert_eq!(h.vosk.calls(), 0);
}

#[tokio::test]
async fn stt_outage_is_not_fatal_to_session() {
    let h = Harness::builder()
        .stt(
            ScriptedRecognizer::failing(EngineId::Vosk),
            ScriptedRecognizer::new(EngineId::Whisper, "unused", 0.9),
        )
        .build();
    let id = h.manager.start_session("study", SessionMode::MultiTurn).await.unwrap();

    let outcome = h
        .manager
        .submit_utterance(&id, Utterance::Audio(wav(800)))
        .await
        .unwrap()
        .outcome()
        .await;

    assert_eq!(outcome, TurnOutcome::Failed);
    assert_eq!(h.whisper.calls(), 0);
    assert_eq!(h.manager.session(&id).await.unwrap().state(), SessionState::Listening);
}

#[tokio::test]
async fn single_command_session_ends_after_reply_plays() {
    let h = Harness::builder().build();
    let id = h.manager.start_session("porch", SessionMode::SingleCommand).await.unwrap();

    let outcome = h
        .manager
        .submit_utterance(&id, Utterance::Text("turn on the porch lights".into()))
        .await
        .unwrap()
        .outcome()
        .await;

    assert_eq!(outcome, TurnOutcome::Executed);
    assert_eq!(h.speech.completed(), vec!["Done"]);
    assert!(h.manager.session(&id).await.is_none());
    assert!(h.manager.room_session("porch").await.is_none());
}

#[tokio::test]
async fn end_phrase_ends_multi_turn_session() {
    let h = Harness::builder().build();
    let id = h.manager.start_session("den", SessionMode::MultiTurn).await.unwrap();

    let outcome = h
        .manager
        .submit_utterance(&id, Utterance::Text("Never mind.".into()))
        .await
        .unwrap()
        .outcome()
        .await;

    assert_eq!(outcome, TurnOutcome::EndRequested);
    assert!(h.manager.session(&id).await.is_none());
}

#[tokio::test]
async fn ignore_policy_keeps_existing_session() {
    let h = Harness::builder()
        .config(ManagerConfig {
            policy: PreemptPolicy::Ignore,
            ..ManagerConfig::default()
        })
        .build();

    let id = h.manager.start_session("den", SessionMode::MultiTurn).await.unwrap();
    let busy = h.manager.start_session("den", SessionMode::SingleCommand).await;
    assert!(matches!(busy, Err(Error::RoomBusy(_))));
    assert_eq!(h.manager.wake("den").await.unwrap(), id);
    assert_eq!(h.manager.list().await.len(), 1);
}

#[tokio::test]
async fn preempt_policy_replaces_session_on_start() {
    let h = Harness::builder().build();

    let first = h.manager.start_session("den", SessionMode::MultiTurn).await.unwrap();
    let second = h.manager.start_session("den", SessionMode::MultiTurn).await.unwrap();

    assert_ne!(first, second);
    assert!(h.manager.session(&first).await.is_none());
    assert_eq!(h.manager.room_session("den").await, Some(second));
}

#[tokio::test]
async fn wake_opens_session_in_empty_room() {
    let h = Harness::builder().build();

    let id = h.manager.wake("attic").await.unwrap();
    let session = h.manager.session(&id).await.unwrap();

    assert_eq!(session.mode(), SessionMode::SingleCommand);
    assert_eq!(session.state(), SessionState::Listening);
    assert!(matches!(h.manager.wake("").await, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn unknown_session_is_reported() {
    let h = Harness::builder().build();
    let result = h
        .manager
        .submit_utterance("nope", Utterance::Text("hello there".into()))
        .await;
    assert!(matches!(result, Err(Error::SessionNotFound(_))));
    assert!(matches!(h.manager.end_session("nope").await, Err(Error::SessionNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn idle_sessions_are_reaped() {
    let h = Harness::builder()
        .config(ManagerConfig {
            idle_timeout: Duration::from_secs(30),
            ..ManagerConfig::default()
        })
        .build();

    let idle = h.manager.start_session("den", SessionMode::MultiTurn).await.unwrap();
    let mut events = h.bus.subscribe_session("den", &idle);
    tokio::time::advance(Duration::from_secs(20)).await;
    let fresh = h.manager.start_session("hall", SessionMode::MultiTurn).await.unwrap();
    tokio::time::advance(Duration::from_secs(11)).await;

    assert_eq!(h.manager.reap_idle().await, vec![idle.clone()]);
    assert!(h.manager.session(&idle).await.is_none());
    assert!(h.manager.session(&fresh).await.is_some());
    assert_eq!(until_closed(&mut events).await.last(), Some(&TransportMessage::SessionEnded));
}

/// Every event up to the end of a session's stream
async fn until_closed(events: &mut hearth_gateway::transport::SessionEvents) -> Vec<TransportMessage> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(msg) = events.recv().await {
            seen.push(msg);
        }
    })
    .await
    .expect("session event stream still open after 2s");
    seen
}

#[tokio::test]
async fn event_stream_closes_when_session_is_ended() {
    let h = Harness::builder().build();
    let id = h.manager.start_session("den", SessionMode::MultiTurn).await.unwrap();
    let mut events = h.bus.subscribe_session("den", &id);

    h.manager.end_session(&id).await.unwrap();

    let seen = until_closed(&mut events).await;
    assert_eq!(seen.last(), Some(&TransportMessage::SessionEnded));
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn event_stream_closes_after_single_command_reply() {
    let h = Harness::builder().build();
    let id = h.manager.start_session("porch", SessionMode::SingleCommand).await.unwrap();
    let mut events = h.bus.subscribe_session("porch", &id);

    h.manager
        .submit_utterance(&id, Utterance::Text("turn on the porch lights".into()))
        .await
        .unwrap()
        .outcome()
        .await;

    let seen = until_closed(&mut events).await;
    assert_eq!(sentences(&seen), vec!["Done"]);
    assert_eq!(seen.last(), Some(&TransportMessage::SessionEnded));
}
