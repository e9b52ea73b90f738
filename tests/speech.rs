//! Speech output and barge-in tests

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use peepers::Error;
use peepers::config::Config;
use peepers::voice::{Interruption, SpeechOutcome};
use tokio::time::Instant;

mod common;

use common::Rig;

fn rig(play_for: Duration) -> Rig {
    Rig::new(Config::default(), play_for)
}

#[tokio::test(start_paused = true)]
async fn test_plays_to_completion() {
    let rig = rig(Duration::from_secs(2));
    let mut speech = rig.speech();

    let started = Instant::now();
    let outcome = speech.say("Hello there").await.unwrap();

    assert_eq!(outcome, SpeechOutcome::Done);
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(rig.synthesizer.spoken(), vec!["Hello there"]);
    assert!(rig.speaker.stops().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_signal_interrupts_within_one_poll() {
    let rig = rig(Duration::from_secs(10));
    let poll = rig.config.audio.playback_poll;
    let mut speech = rig.speech();
    let signal = speech.cancel_signal();

    let triggered_at = Arc::new(Mutex::new(None));
    let at = Arc::clone(&triggered_at);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        *at.lock().unwrap() = Some(Instant::now());
        signal.trigger(Interruption::External);
    });

    let outcome = speech.say("A very long story").await.unwrap();
    let returned = Instant::now();
    assert_eq!(outcome, SpeechOutcome::Interrupted(Interruption::External));

    let triggered = triggered_at.lock().unwrap().unwrap();
    assert!(
        returned - triggered <= poll,
        "say returned {:?} after trigger",
        returned - triggered
    );
    assert_eq!(rig.microphone.active.load(Ordering::SeqCst), 0);

    let stops = rig.speaker.stops();
    assert_eq!(stops.len(), 1);
    assert!(stops[0] - triggered <= poll, "stopped {:?} after trigger", stops[0] - triggered);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_mid_transcription_returns_promptly() {
    let mut rig = rig(Duration::from_secs(10));
    rig.transcribe_delay = Duration::from_secs(20);
    let poll = rig.config.audio.playback_poll;
    // Heard at 100 ms; the trigger lands while it is being transcribed
    rig.microphone.push_all(["just chatting"]);
    let mut speech = rig.speech();
    let signal = speech.cancel_signal();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        signal.trigger(Interruption::External);
    });

    let started = Instant::now();
    let outcome = speech.say("Another long story").await.unwrap();
    assert_eq!(outcome, SpeechOutcome::Interrupted(Interruption::External));
    assert!(started.elapsed() <= Duration::from_millis(1_500) + poll);
}

#[tokio::test(start_paused = true)]
async fn test_done_returns_within_one_poll_of_clip_end() {
    let clip = Duration::from_millis(2_025);
    let rig = rig(clip);
    let poll = rig.config.audio.playback_poll;
    let mut speech = rig.speech();

    let started = Instant::now();
    assert_eq!(speech.say("Almost done").await.unwrap(), SpeechOutcome::Done);

    let elapsed = started.elapsed();
    assert!(elapsed >= clip);
    assert!(elapsed - clip <= poll, "returned {:?} after the clip ended", elapsed - clip);
    assert!(rig.microphone.listens.load(Ordering::SeqCst) >= 1);
    assert_eq!(rig.microphone.active.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_temp_audio_is_removed() {
    let rig = rig(Duration::from_secs(10));
    let mut speech = rig.speech();
    let signal = speech.cancel_signal();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        signal.trigger(Interruption::External);
    });
    speech.say("Interrupted").await.unwrap();

    let short = Rig::new(Config::default(), Duration::from_millis(200));
    let mut finished = short.speech();
    finished.say("Finished").await.unwrap();

    for rig in [&rig, &short] {
        let log = rig.speaker.log.lock().unwrap();
        assert_eq!(log.loaded.len(), 1);
        assert!(log.existed_on_load[0]);
        assert!(!log.loaded[0].exists(), "{:?} left behind", log.loaded[0]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_barge_in_wake_phrase_interrupts() {
    let rig = rig(Duration::from_secs(10));
    rig.microphone.push_all(["hey hey"]);
    let mut speech = rig.speech();

    let started = Instant::now();
    let outcome = speech.say("Let me tell you about servos").await.unwrap();

    assert_eq!(outcome, SpeechOutcome::Interrupted(Interruption::WakePhrase));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(rig.speaker.stops().len(), 1);
    assert!(!rig.speaker.loaded()[0].exists());
}

#[tokio::test(start_paused = true)]
async fn test_barge_in_exit_phrases_interrupt() {
    for phrase in ["goodbye", "end chat", "terminate"] {
        let rig = rig(Duration::from_secs(10));
        rig.microphone.push_all([phrase]);
        let mut speech = rig.speech();

        let outcome = speech.say("Something long").await.unwrap();
        assert_eq!(
            outcome,
            SpeechOutcome::Interrupted(Interruption::ExitPhrase),
            "{phrase}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_other_speech_does_not_interrupt() {
    let rig = rig(Duration::from_secs(2));
    rig.microphone.push_all(["what time is it", "nice weather"]);
    let mut speech = rig.speech();

    assert_eq!(speech.say("Listening").await.unwrap(), SpeechOutcome::Done);
    assert_eq!(rig.microphone.remaining(), 0);
    assert!(rig.speaker.stops().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_listener_ends_with_playback() {
    let rig = rig(Duration::from_secs(3));
    let mut speech = rig.speech();

    speech.say("Short and sweet").await.unwrap();

    assert!(rig.microphone.listens.load(Ordering::SeqCst) >= 1);
    assert_eq!(rig.microphone.active.load(Ordering::SeqCst), 0);
    assert!(rig.arbiter.try_acquire().is_some());

    // Nothing keeps listening afterwards
    let listens = rig.microphone.listens.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.microphone.listens.load(Ordering::SeqCst), listens);
}

#[tokio::test(start_paused = true)]
async fn test_instant_playback_skips_listening() {
    let rig = rig(Duration::ZERO);
    let mut speech = rig.speech();

    assert_eq!(speech.say("Hi").await.unwrap(), SpeechOutcome::Done);
    assert_eq!(rig.microphone.listens.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_signal_is_discarded() {
    let rig = rig(Duration::from_millis(500));
    let mut speech = rig.speech();
    speech.cancel_signal().trigger(Interruption::External);

    assert_eq!(speech.say("Fresh start").await.unwrap(), SpeechOutcome::Done);
    assert!(!speech.cancel_signal().is_set());
}

#[tokio::test(start_paused = true)]
async fn test_synthesis_failure_is_reported() {
    let rig = rig(Duration::from_secs(1));
    rig.synthesizer.fail.store(true, Ordering::SeqCst);
    let mut speech = rig.speech();

    let result = speech.say("Never heard").await;
    assert!(matches!(result, Err(Error::Tts(_))));
    assert!(rig.speaker.loaded().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_blank_text_is_silent() {
    let rig = rig(Duration::from_secs(1));
    let mut speech = rig.speech();

    assert_eq!(speech.say("   ").await.unwrap(), SpeechOutcome::Done);
    assert!(rig.synthesizer.spoken().is_empty());
}
