//! End-to-end session behavior against scripted capabilities, on paused time.

mod common;

use common::{eventually, init_tracing, samples_for, utterances, Device, Rig, ScriptedTts};
use mentor_voice::{
    RecognitionEvent, SessionConfig, SessionController, SessionState, VoiceError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_test::{assert_err, assert_ok};

const GREETING: &str = "Hello. How are you? Great, let's begin.";

fn greeting_samples() -> Vec<usize> {
    ["Hello.", "How are you?", "Great, let's begin."]
        .iter()
        .map(|s| samples_for(s))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn greeting_plays_in_order_then_listens() {
    init_tracing();
    let rig = Rig::default();
    let (on_utterance, _rx) = utterances();
    let handle = SessionController::start(
        SessionConfig::default(),
        rig.caps(&["k1", "k2"], ScriptedTts::new(&rig)),
        GREETING,
        on_utterance,
    )
    .unwrap();

    assert_ok!(handle.wait_for_state(SessionState::Listening).await);
    assert_eq!(rig.plays(), greeting_samples());
    assert_eq!(rig.keys_used(), vec!["k1", "k2", "k1"]);
    assert_eq!(rig.count(&Device::Resume), 1);
    assert_eq!(rig.log().last(), Some(&Device::CaptureStarted));
    assert_eq!(rig.overlaps(), 0);
    assert!(rig.capture_live());
}

#[tokio::test(start_paused = true)]
async fn playback_starts_while_later_sentences_synthesize() {
    let rig = Rig::default();
    let gate = Arc::new(Semaphore::new(0));
    let (on_utterance, _rx) = utterances();
    let handle = SessionController::start(
        SessionConfig::default(),
        rig.caps(&["k1", "k2"], ScriptedTts::gated(&rig, 1, Arc::clone(&gate))),
        GREETING,
        on_utterance,
    )
    .unwrap();

    eventually("first sentence to play", || !rig.plays().is_empty()).await;
    assert_eq!(rig.plays(), vec![samples_for("Hello.")]);
    // Sentence two is in flight, sentence three still queued.
    assert_eq!(rig.synth_calls(), 2);
    assert_eq!(handle.state(), SessionState::Speaking);

    gate.add_permits(2);
    assert_ok!(handle.wait_for_state(SessionState::Listening).await);
    assert_eq!(rig.plays(), greeting_samples());
}

#[tokio::test(start_paused = true)]
async fn silence_gap_finalizes_exactly_once() {
    let rig = Rig::default();
    let (on_utterance, mut rx) = utterances();
    let handle = SessionController::start(
        SessionConfig::default(),
        rig.caps(&["k"], ScriptedTts::new(&rig)),
        "",
        on_utterance,
    )
    .unwrap();
    assert_ok!(handle.wait_for_state(SessionState::Listening).await);

    rig.say(RecognitionEvent::final_text("I want to"));
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(handle.telemetry().live_transcript, "I want to");

    rig.say(RecognitionEvent::interim("become a"));
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(rx.try_recv().is_err());

    assert_eq!(rx.recv().await.as_deref(), Some("I want to become a"));
    assert_eq!(handle.state(), SessionState::Processing);
    assert!(!rig.capture_live());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn whitespace_keeps_listening() {
    let rig = Rig::default();
    let (on_utterance, mut rx) = utterances();
    let handle = SessionController::start(
        SessionConfig::default(),
        rig.caps(&["k"], ScriptedTts::new(&rig)),
        "",
        on_utterance,
    )
    .unwrap();
    assert_ok!(handle.wait_for_state(SessionState::Listening).await);

    rig.say(RecognitionEvent::final_text("   "));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(handle.state(), SessionState::Listening);

    rig.say(RecognitionEvent::final_text("ok"));
    assert_eq!(rx.recv().await.as_deref(), Some("ok"));
}

#[tokio::test(start_paused = true)]
async fn failed_sentence_returns_to_listening() {
    let rig = Rig::default();
    let (on_utterance, mut rx) = utterances();
    let handle = SessionController::start(
        SessionConfig::default(),
        rig.caps(&["k"], ScriptedTts::new(&rig)),
        "",
        on_utterance,
    )
    .unwrap();
    assert_ok!(handle.wait_for_state(SessionState::Listening).await);
    rig.say(RecognitionEvent::final_text("hi"));
    assert_eq!(rx.recv().await.as_deref(), Some("hi"));

    handle.speak("This will fail.").unwrap();
    assert_ok!(handle.wait_for_state(SessionState::Listening).await);
    assert!(rig.plays().is_empty());
    assert_eq!(rig.count(&Device::CaptureStarted), 2);
}

#[tokio::test(start_paused = true)]
async fn no_credentials_skips_every_sentence() {
    let rig = Rig::default();
    let (on_utterance, _rx) = utterances();
    let handle = SessionController::start(
        SessionConfig::default(),
        rig.caps(&[], ScriptedTts::new(&rig)),
        GREETING,
        on_utterance,
    )
    .unwrap();
    assert_ok!(handle.wait_for_state(SessionState::Listening).await);
    assert!(rig.plays().is_empty());
    assert_eq!(rig.synth_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn barge_in_stops_speech_before_listening() {
    let rig = Rig::default();
    let (on_utterance, mut rx) = utterances();
    let handle = SessionController::start(
        SessionConfig::default(),
        rig.caps(&["k"], ScriptedTts::new(&rig)),
        "",
        on_utterance,
    )
    .unwrap();
    assert_ok!(handle.wait_for_state(SessionState::Listening).await);
    rig.say(RecognitionEvent::final_text("tell me about interviews"));
    assert_eq!(rx.recv().await.as_deref(), Some("tell me about interviews"));

    handle
        .speak("Interviews take practice. Start with your story. Then rehearse.")
        .unwrap();
    eventually("reply to start playing", || !rig.plays().is_empty()).await;
    // Whatever the recognizer hears now is the assistant's own voice.
    rig.say_late(RecognitionEvent::final_text("echo"));

    handle.listen().unwrap();
    assert_ok!(handle.wait_for_state(SessionState::Listening).await);

    let log = rig.log();
    let stop = log.iter().rposition(|d| *d == Device::Stop).unwrap();
    let started = log.iter().rposition(|d| *d == Device::CaptureStarted).unwrap();
    assert!(stop < started, "playback must stop before capture starts: {log:?}");
    assert_eq!(rig.plays().len(), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(rig.plays().len(), 1, "no queued sentence may play after a stop");
    assert_eq!(handle.telemetry().volume, 0);
    assert_eq!(rig.overlaps(), 0);

    rig.say(RecognitionEvent::final_text("what about salary"));
    assert_eq!(rx.recv().await.as_deref(), Some("what about salary"));
}

#[tokio::test(start_paused = true)]
async fn speak_while_speaking_appends() {
    let rig = Rig::default();
    let (on_utterance, _rx) = utterances();
    let handle = SessionController::start(
        SessionConfig::default(),
        rig.caps(&["k"], ScriptedTts::new(&rig)),
        "Welcome.",
        on_utterance,
    )
    .unwrap();
    handle.speak("Shall we start?").unwrap();
    assert_ok!(handle.wait_for_state(SessionState::Listening).await);
    assert_eq!(
        rig.plays(),
        vec![samples_for("Welcome."), samples_for("Shall we start?")]
    );
}

#[tokio::test(start_paused = true)]
async fn telemetry_reports_output_level() {
    let rig = Rig::default();
    let (on_utterance, _rx) = utterances();
    let handle = SessionController::start(
        SessionConfig::default(),
        rig.caps(&["k"], ScriptedTts::new(&rig)),
        GREETING,
        on_utterance,
    )
    .unwrap();
    let mut telemetry = handle.subscribe();
    let loud = telemetry
        .wait_for(|t| t.speaking && t.volume > 50)
        .await
        .map(|t| t.clone())
        .unwrap();
    assert_eq!(loud.state, SessionState::Speaking);
    assert!(!loud.listening);

    assert_ok!(handle.wait_for_state(SessionState::Listening).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let quiet = handle.telemetry();
    assert_eq!(quiet.volume, 0);
    assert!(quiet.listening && !quiet.speaking && !quiet.processing);
}

#[tokio::test(start_paused = true)]
async fn resume_listening_after_reply_failure() {
    let rig = Rig::default();
    let (on_utterance, mut rx) = utterances();
    let handle = SessionController::start(
        SessionConfig::default(),
        rig.caps(&["k"], ScriptedTts::new(&rig)),
        "",
        on_utterance,
    )
    .unwrap();
    assert_ok!(handle.wait_for_state(SessionState::Listening).await);
    rig.say(RecognitionEvent::final_text("hello?"));
    assert_eq!(rx.recv().await.as_deref(), Some("hello?"));

    handle.resume_listening().unwrap();
    assert_ok!(handle.wait_for_state(SessionState::Listening).await);
    assert!(rig.capture_live());
}

#[tokio::test(start_paused = true)]
async fn end_is_idempotent_and_releases_devices() {
    let rig = Rig::default();
    let (on_utterance, _rx) = utterances();
    let handle = SessionController::start(
        SessionConfig::default(),
        rig.caps(&["k"], ScriptedTts::new(&rig)),
        GREETING,
        on_utterance,
    )
    .unwrap();
    eventually("greeting to start", || !rig.plays().is_empty()).await;

    handle.end();
    handle.end();
    assert_ok!(handle.join().await);
    assert_ok!(handle.join().await);
    assert_eq!(handle.state(), SessionState::Idle);

    let log = rig.log();
    assert_eq!(&log[log.len() - 2..], &[Device::Stop, Device::Release]);
    assert_eq!(rig.count(&Device::Release), 1);
    assert!(matches!(handle.speak("anyone there?"), Err(VoiceError::SessionClosed)));
}

#[tokio::test(start_paused = true)]
async fn unavailable_recognizer_fails_start() {
    let rig = Rig::default();
    let mut recognizer = rig.recognizer();
    recognizer.unavailable = true;
    let (on_utterance, _rx) = utterances();
    let result = SessionController::start(
        SessionConfig::default(),
        rig.caps_with(Box::new(recognizer), &["k"], ScriptedTts::new(&rig)),
        GREETING,
        on_utterance,
    );
    assert!(matches!(result, Err(VoiceError::RecognitionUnavailable(_))));
    assert!(rig.log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn recognizer_loss_ends_the_session() {
    let rig = Rig::default();
    let (on_utterance, _rx) = utterances();
    let handle = SessionController::start(
        SessionConfig::default(),
        rig.caps(&["k"], ScriptedTts::new(&rig)),
        "",
        on_utterance,
    )
    .unwrap();
    assert_ok!(handle.wait_for_state(SessionState::Listening).await);

    rig.kill_recognizer();
    let result = handle.join().await;
    assert_err!(&result);
    assert!(matches!(result, Err(VoiceError::RecognitionUnavailable(_))));
    assert_eq!(handle.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn answer_for_an_earlier_turn_is_dropped() {
    let rig = Rig::default();
    let (on_utterance, mut rx) = utterances();
    let handle = SessionController::start(
        SessionConfig::default(),
        rig.caps(&["k"], ScriptedTts::new(&rig)),
        "",
        on_utterance,
    )
    .unwrap();
    assert_ok!(handle.wait_for_state(SessionState::Listening).await);

    rig.say(RecognitionEvent::final_text("first"));
    assert_eq!(rx.recv().await.as_deref(), Some("first"));
    assert_eq!(handle.telemetry().turn, 1);

    handle.listen().unwrap();
    assert_ok!(handle.wait_for_state(SessionState::Listening).await);
    rig.say(RecognitionEvent::final_text("second"));
    assert_eq!(rx.recv().await.as_deref(), Some("second"));
    assert_eq!(handle.telemetry().turn, 2);

    handle.answer(1, "Old news.").unwrap();
    handle.resume_listening_after(1).unwrap();
    handle.answer(2, "Fresh start.").unwrap();
    eventually("fresh answer to play out", || {
        rig.plays().len() == 1 && rig.capture_live()
    })
    .await;

    assert_eq!(rig.sentences(), vec!["Fresh start."]);
    assert_eq!(rig.plays(), vec![samples_for("Fresh start.")]);
    assert_eq!(rig.overlaps(), 0);
}
