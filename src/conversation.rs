//! Conversation state machine
//!
//! Idle → WaitingForWake → Active → (timeout | end phrase) → WaitingForWake,
//! with a terminate phrase or a fatal resource error leading to ShuttingDown.
//! The state machine is the only writer of [`ConversationState`], the
//! history and the liveness clock.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::chat::{ChatModel, ConversationHistory};
use crate::config::{AudioConfig, Config, ConversationConfig};
use crate::eyes::Eyes;
use crate::voice::{
    Capture, Intent, Interruption, MicrophoneArbiter, PhraseBook, SpeechOutcome, SpeechOutput,
    Transcriber,
};

/// Phase of the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Not started; eyes at rest
    Idle,
    /// Listening for the wake phrase
    WaitingForWake,
    /// Talking with someone
    Active,
    /// Terminal
    ShuttingDown,
}

/// Time of the last meaningful interaction
#[derive(Debug)]
pub struct LivenessClock {
    last: Mutex<Instant>,
}

impl Default for LivenessClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessClock {
    /// Start the clock now
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    /// Record an interaction now
    pub fn touch(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time since the last interaction
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Time left before `timeout` is reached
    #[must_use]
    pub fn remaining(&self, timeout: Duration) -> Duration {
        timeout.saturating_sub(self.elapsed())
    }
}

/// The top-level controller
pub struct Conversation {
    config: ConversationConfig,
    audio: AudioConfig,
    eyes: Eyes,
    speech: SpeechOutput,
    microphone: Arc<MicrophoneArbiter>,
    transcriber: Arc<dyn Transcriber>,
    chat: Arc<dyn ChatModel>,
    phrases: PhraseBook,
    history: ConversationHistory,
    clock: Arc<LivenessClock>,
    state: watch::Sender<ConversationState>,
}

impl Conversation {
    /// Assemble the state machine in the `Idle` state
    #[must_use]
    pub fn new(
        config: &Config,
        eyes: Eyes,
        speech: SpeechOutput,
        microphone: Arc<MicrophoneArbiter>,
        transcriber: Arc<dyn Transcriber>,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        let conversation = config.conversation.clone();
        let (state, _) = watch::channel(ConversationState::Idle);

        Self {
            phrases: PhraseBook::new(&conversation),
            history: ConversationHistory::new(&conversation.system_prompt, conversation.history_cap),
            audio: config.audio.clone(),
            config: conversation,
            eyes,
            speech,
            microphone,
            transcriber,
            chat,
            clock: Arc::new(LivenessClock::new()),
            state,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConversationState {
        *self.state.borrow()
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.subscribe()
    }

    /// Conversation history of the current (or last) Active phase
    #[must_use]
    pub const fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Shared liveness clock
    #[must_use]
    pub fn clock(&self) -> Arc<LivenessClock> {
        Arc::clone(&self.clock)
    }

    /// The eyes driven by this conversation
    #[must_use]
    pub const fn eyes(&self) -> &Eyes {
        &self.eyes
    }

    fn set_state(&self, next: ConversationState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(from = ?previous, to = ?next, "conversation state changed");
        }
    }

    /// Run until `ShuttingDown` or until `shutdown` is cancelled
    ///
    /// # Errors
    ///
    /// Returns the resource error that forced the shutdown, if any
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let result = loop {
            if self.state() == ConversationState::ShuttingDown {
                break Ok(());
            }

            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::info!("shutdown requested");
                    self.set_state(ConversationState::ShuttingDown);
                    break Ok(());
                }
                result = self.step() => {
                    if let Err(e) = result {
                        break Err(e);
                    }
                }
            }
        };

        self.release().await;
        result
    }

    /// Advance the state machine by one iteration
    ///
    /// Service failures are handled inside the step. Resource failures move
    /// the machine to `ShuttingDown` and are returned.
    ///
    /// # Errors
    ///
    /// Returns `Error::Bus`/`Error::Device`/`Error::Audio` on resource failure
    pub async fn step(&mut self) -> Result<ConversationState> {
        let result = match self.state() {
            ConversationState::Idle => self.enter_standby().await,
            ConversationState::WaitingForWake => self.listen_for_wake().await,
            ConversationState::Active => self.converse().await,
            ConversationState::ShuttingDown => Ok(()),
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_resource() => {
                tracing::error!(error = %e, "resource failure, shutting down");
                self.set_state(ConversationState::ShuttingDown);
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(error = %e, state = ?self.state(), "step failed, continuing");
            }
        }
        Ok(self.state())
    }

    async fn enter_standby(&mut self) -> Result<()> {
        self.eyes.rest().await?;
        self.set_state(ConversationState::WaitingForWake);
        Ok(())
    }

    async fn listen_for_wake(&mut self) -> Result<()> {
        let Some(transcript) = self
            .capture_transcript(self.audio.wake_timeout, self.audio.wake_phrase_limit)
            .await?
        else {
            return Ok(());
        };

        if !self.phrases.is_wake(&transcript) {
            tracing::debug!(transcript = %transcript, "not the wake phrase");
            return Ok(());
        }

        tracing::info!("wake phrase detected");
        self.eyes.open().await?;
        self.eyes.blink(self.config.wake_blinks).await?;
        self.eyes.start_animation();
        self.history.reset();
        self.set_state(ConversationState::Active);
        self.clock.touch();

        let greeting = self.config.greeting.clone();
        self.reply(&greeting).await
    }

    async fn converse(&mut self) -> Result<()> {
        self.eyes.check_animation().await?;

        let remaining = self.clock.remaining(self.config.liveness_timeout);
        if remaining.is_zero() {
            tracing::info!(timeout = ?self.config.liveness_timeout, "conversation timed out");
            let farewell = self.config.timeout_farewell.clone();
            return self.finish(&farewell, ConversationState::WaitingForWake).await;
        }

        // Never wait past the liveness deadline for speech to start
        let timeout = self.audio.listen_timeout.min(remaining);
        let transcript = match self.capture_transcript(timeout, self.audio.max_phrase).await {
            Ok(Some(transcript)) => transcript,
            Ok(None) => return Ok(()),
            Err(e) if e.is_service() => {
                tracing::warn!(error = %e, "transcription failed");
                let apology = self.config.not_understood.clone();
                return self.reply(&apology).await;
            }
            Err(e) => return Err(e),
        };

        self.clock.touch();

        match self.phrases.classify(&transcript) {
            Intent::Terminate => {
                tracing::info!("terminate phrase heard");
                let farewell = self.config.terminate_farewell.clone();
                self.finish(&farewell, ConversationState::ShuttingDown).await
            }
            Intent::EndConversation => {
                tracing::info!("end phrase heard");
                self.end_conversation().await
            }
            Intent::Wake => {
                let acknowledgement = self.config.acknowledgement.clone();
                self.reply(&acknowledgement).await
            }
            Intent::Utterance(text) => self.exchange(text).await,
        }
    }

    /// One user turn and the assistant's reply
    ///
    /// The history only changes once the reply arrives, so a failed request
    /// leaves it exactly as it was.
    async fn exchange(&mut self, text: String) -> Result<()> {
        tracing::info!(user = %text, "user said");
        let request = self.history.request_with(&text);

        match self.chat.complete(&request).await {
            Ok(reply) => {
                self.history.record_exchange(text, reply.clone());
                self.reply(&reply).await
            }
            Err(e) if e.is_service() => {
                tracing::warn!(error = %e, "chat failed");
                let apology = self.config.chat_apology.clone();
                self.reply(&apology).await
            }
            Err(e) => Err(e),
        }
    }

    /// Speak inside an Active conversation, handling barge-in
    ///
    /// A wake phrase over the speech is acknowledged and the conversation
    /// continues; an end phrase ends it.
    async fn reply(&mut self, text: &str) -> Result<()> {
        let mut text = text.to_string();
        loop {
            match self.speak(&text).await? {
                SpeechOutcome::Done => {
                    self.clock.touch();
                    return Ok(());
                }
                SpeechOutcome::Interrupted(Interruption::WakePhrase) => {
                    self.clock.touch();
                    text.clone_from(&self.config.acknowledgement);
                }
                SpeechOutcome::Interrupted(Interruption::ExitPhrase) => {
                    return self.end_conversation().await;
                }
                SpeechOutcome::Interrupted(Interruption::External) => return Ok(()),
            }
        }
    }

    async fn end_conversation(&mut self) -> Result<()> {
        let farewell = self.config.farewell.clone();
        self.finish(&farewell, ConversationState::WaitingForWake).await
    }

    /// Say goodbye, put the eyes to sleep and move to `next`
    async fn finish(&mut self, farewell: &str, next: ConversationState) -> Result<()> {
        self.speak(farewell).await?;
        self.eyes.sleep().await?;
        self.set_state(next);
        Ok(())
    }

    /// Speak, treating a synthesis failure as finished speech
    async fn speak(&mut self, text: &str) -> Result<SpeechOutcome> {
        match self.speech.say(text).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_service() => {
                tracing::warn!(error = %e, text = %text, "speech synthesis failed");
                Ok(SpeechOutcome::Done)
            }
            Err(e) => Err(e),
        }
    }

    /// Capture one utterance and transcribe it outside the microphone lease
    async fn capture_transcript(
        &self,
        timeout: Duration,
        phrase_limit: Duration,
    ) -> Result<Option<String>> {
        let audio = match self.microphone.capture_utterance(timeout, phrase_limit).await? {
            Capture::Audio(audio) => audio,
            Capture::TimedOut => return Ok(None),
        };

        match self.transcriber.transcribe(&audio).await {
            Ok(transcript) => Ok(transcript),
            Err(e) if self.state() != ConversationState::Active && e.is_service() => {
                tracing::debug!(error = %e, "transcription failed while waiting for wake");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Stop speech and animation and put the eyes to sleep
    async fn release(&mut self) {
        self.speech.stop();
        if let Err(e) = self.eyes.stop_animation().await {
            tracing::warn!(error = %e, "eye animation ended with error");
        }
        if let Err(e) = self.eyes.sleep().await {
            tracing::error!(error = %e, "failed to close eyes on shutdown");
        }
        tracing::info!("conversation stopped");
    }
}
