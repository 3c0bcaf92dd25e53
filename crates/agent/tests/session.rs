//! Turn taking, events, greetings, and failure recovery

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use voice_loop_agent::{AgentError, AgentEvent, AgentEventKind, UsageEvent, VoiceAgent};
use voice_loop_config::constants::generation::FALLBACK_MESSAGE;
use voice_loop_core::{Error, Participant, PipelineState, TurnRole};
use voice_loop_pipeline::PipelineError;

fn greeter_script() -> ScriptedGenerator {
    ScriptedGenerator::new(|_| vec![text("Hi! "), text("How can I help?")])
}

#[tokio::test(start_paused = true)]
async fn test_single_turn_event_order() {
    let h = HarnessBuilder::new(greeter_script()).start().await;

    h.user_says("Hello?").await;
    let history = h
        .wait_for_history(|turns| last_assistant(turns).is_some_and(|t| t.text == "Hi! How can I help?"))
        .await;
    h.wait_for_events(|events| events.iter().any(|e| e.kind() == AgentEventKind::AgentSpeechCommitted))
        .await;

    let kinds: Vec<AgentEventKind> = h
        .events()
        .iter()
        .map(AgentEvent::kind)
        .filter(|k| !matches!(k, AgentEventKind::MetricsCollected | AgentEventKind::StateChanged))
        .collect();
    assert_eq!(
        kinds,
        vec![
            AgentEventKind::UserStartedSpeaking,
            AgentEventKind::UserStoppedSpeaking,
            AgentEventKind::UserSpeechCommitted,
            AgentEventKind::AgentStartedSpeaking,
            AgentEventKind::AgentStoppedSpeaking,
            AgentEventKind::AgentSpeechCommitted,
        ]
    );

    let states: Vec<PipelineState> = h
        .events()
        .iter()
        .filter_map(|e| match e {
            AgentEvent::StateChanged { new, .. } => Some(*new),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            PipelineState::ListeningToUser,
            PipelineState::Generating,
            PipelineState::Speaking,
            PipelineState::ListeningToUser,
        ]
    );
    assert_eq!(h.handle.state(), PipelineState::ListeningToUser);

    assert_eq!(history.len(), 3);
    assert_eq!(history[1].role, TurnRole::User);
    assert_eq!(history[1].text, "Hello?");
    assert!(!history[2].interrupted);
}

#[tokio::test(start_paused = true)]
async fn test_greeting_spoken_at_start() {
    let h = HarnessBuilder::new(greeter_script())
        .options(test_options().with_greeting(Some("Hello there!".into())))
        .start()
        .await;

    let history = h
        .wait_for_history(|turns| last_assistant(turns).is_some())
        .await;
    assert_eq!(last_assistant(&history).map(|t| t.text.as_str()), Some("Hello there!"));
    assert_eq!(h.sink.frame_count(), "Hello there!".chars().count());
    assert_eq!(h.generator.request_count(), 0);

    match &h.events_of(AgentEventKind::AgentStartedSpeaking)[0] {
        AgentEvent::AgentStartedSpeaking { speech_id } => assert_eq!(speech_id, "speech_1"),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_silence_without_words_is_not_a_turn() {
    let h = HarnessBuilder::new(greeter_script()).start().await;

    h.vad.send(voice_loop_core::VoiceActivity::start(Duration::ZERO)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.vad.send(voice_loop_core::VoiceActivity::stop(Duration::ZERO)).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.generator.request_count(), 0);
    assert_eq!(h.handle.history().await.unwrap().len(), 1);
    assert!(h.events_of(AgentEventKind::UserSpeechCommitted).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_generation_failure_speaks_fallback() {
    let script = ScriptedGenerator::new(|_| {
        vec![Err(Error::GenerationFailure("model overloaded".into()))]
    });
    let h = HarnessBuilder::new(script).start().await;

    h.user_says("Hello?").await;
    h.wait_for_events(|events| events.iter().any(|e| e.kind() == AgentEventKind::AgentStoppedSpeaking))
        .await;

    let errors = h.events_of(AgentEventKind::Error);
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        AgentEvent::Error(e) => {
            assert_eq!(e.kind(), "generation_failure");
            assert!(!e.is_fatal());
        },
        other => panic!("unexpected event {:?}", other),
    }
    assert!(h.sink.frame_count() > 0);

    // Neither the failed reply nor the apology enters history
    let history = h.handle.history().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, TurnRole::User);
    assert!(!history.iter().any(|t| t.text == FALLBACK_MESSAGE));

    // The session keeps going
    h.user_says("Are you there?").await;
    h.wait_for_frames(h.sink.frame_count() + 1).await;
    assert_eq!(h.generator.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_recognition_error_drops_turn() {
    let h = HarnessBuilder::new(greeter_script()).start().await;

    h.vad.send(voice_loop_core::VoiceActivity::start(Duration::ZERO)).unwrap();
    h.stt.send(Ok(voice_loop_core::RecognizerOutput::final_text("Book a table"))).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.stt.send(Err(Error::RecognitionFailure("socket reset".into()))).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.vad.send(voice_loop_core::VoiceActivity::stop(Duration::ZERO)).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    match &h.events_of(AgentEventKind::Error)[0] {
        AgentEvent::Error(e) => assert_eq!(e.kind(), "recognition_failure"),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(h.generator.request_count(), 0);

    // Recognition recovers for the next turn
    h.user_says("Book a table for two.").await;
    h.wait_for_history(|turns| last_assistant(turns).is_some()).await;
    assert_eq!(h.generator.request(0).last_user_text(), Some("Book a table for two."));
}

#[tokio::test(start_paused = true)]
async fn test_end_of_turn_model_shortens_wait() {
    let options = test_options().with_endpointing(Duration::from_millis(100), Duration::from_secs(2));
    let h = HarnessBuilder::new(greeter_script())
        .options(options)
        .end_of_turn(Arc::new(FixedEndOfTurn(0.9)))
        .start()
        .await;

    h.user_says("What are your opening hours?").await;
    let stopped_at = tokio::time::Instant::now();
    h.wait_for_history(|turns| last_assistant(turns).is_some()).await;

    let requested_at = h.generator.requests.lock()[0].0;
    assert!(requested_at - stopped_at < Duration::from_millis(500));

    let confirmed = h.events().into_iter().any(|e| {
        matches!(
            e,
            AgentEvent::MetricsCollected(UsageEvent::EndOfUtterance { confirmed: true, .. })
        )
    });
    assert!(confirmed);
}

#[tokio::test(start_paused = true)]
async fn test_unsure_end_of_turn_model_waits_for_max_delay() {
    let options = test_options().with_endpointing(Duration::from_millis(100), Duration::from_secs(2));
    let h = HarnessBuilder::new(greeter_script())
        .options(options)
        .end_of_turn(Arc::new(FixedEndOfTurn(0.1)))
        .start()
        .await;

    h.user_says("So I was wondering").await;
    let stopped_at = tokio::time::Instant::now();
    h.wait_for_history(|turns| last_assistant(turns).is_some()).await;

    let requested_at = h.generator.requests.lock()[0].0;
    assert!(requested_at - stopped_at >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_sip_participant_uses_telephony_model() {
    let h = HarnessBuilder::new(greeter_script())
        .participant(Participant::sip("+15550100"))
        .start()
        .await;

    let options = h.recognizer.connected_with.lock().clone().expect("connected");
    assert_eq!(options.model, "nova-2-phonecall");
}

#[tokio::test(start_paused = true)]
async fn test_start_fails_when_recognizer_refuses() {
    let agent = VoiceAgent::builder()
        .recognizer(refusing_recognizer())
        .vad(Arc::new(SilentVad))
        .generator(Arc::new(greeter_script()))
        .synthesizer(Arc::new(CharSynthesizer))
        .sink(Arc::new(RecordingSink::default()))
        .build()
        .unwrap();

    let err = agent.start(Participant::new("caller")).await.err().unwrap();
    assert!(matches!(err, AgentError::Pipeline(PipelineError::Recognition(_))));
}

#[tokio::test(start_paused = true)]
async fn test_session_subscriber_only_sees_its_session() {
    let h = HarnessBuilder::new(greeter_script()).start().await;
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    h.handle.on(AgentEventKind::UserSpeechCommitted, move |event| {
        if let AgentEvent::UserSpeechCommitted { text } = event {
            sink.lock().push(text.clone());
        }
    });

    h.user_says("Hello?").await;
    h.wait_for_history(|turns| last_assistant(turns).is_some()).await;

    assert_eq!(seen.lock().clone(), vec!["Hello?".to_string()]);
    assert_eq!(h.events_of(AgentEventKind::UserSpeechCommitted).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_handle_after_shutdown() {
    let h = HarnessBuilder::new(greeter_script()).start().await;
    let summary = h.handle.shutdown().await.unwrap();
    assert_eq!(summary, voice_loop_agent::UsageSummary::default());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.handle.is_closed());
    assert!(matches!(h.handle.history().await, Err(AgentError::SessionClosed)));
}
