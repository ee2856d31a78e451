//! **SessionController** - the listening → processing → speaking loop.
//!
//! One controller owns one session: its capture, its synthesis pipeline, its
//! playback graph and its key cursor. Everything runs on a single actor task that
//! multiplexes commands, recognition events, the silence deadline, the in-flight
//! synthesis fetch, the end of the current buffer and the telemetry tick, so no
//! state is ever shared across threads.
//!
//! ```text
//!   Idle ──start(greeting)──► Speaking ──drained──► Listening
//!   Idle ──start("")────────► Listening ──silence──► Processing ──speak──► Speaking
//! ```
//!
//! The microphone is live only in `Listening` and the speaker only in `Speaking`;
//! entering either one shuts the other off first.

use crate::capture::{CaptureSignal, SpeechCapture, SpeechRecognizer};
use crate::config::SessionConfig;
use crate::decode::{AudioBuffer, AudioDecoder};
use crate::error::{VoiceError, VoiceResult};
use crate::pipeline::SynthesisPipeline;
use crate::playback::{AudioOutput, PlaybackEngine, PlaybackStep};
use crate::synthesis::SynthesisClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

/// A finalized user utterance, tagged with the turn it opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub turn: u64,
    pub text: String,
}

/// Called with each finalized user utterance. Runs on the session task, so it
/// must hand the text off (e.g. into a channel) rather than do the work inline.
pub type OnUtterance = Arc<dyn Fn(Utterance) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Processing => "processing",
            SessionState::Speaking => "speaking",
        }
    }

    /// The transition table. Anything not listed here is rejected.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Listening)
                | (Idle, Speaking)
                | (Listening, Processing)
                | (Listening, Speaking)
                | (Processing, Speaking)
                | (Processing, Listening)
                | (Speaking, Listening)
                | (Speaking, Processing)
                | (Listening | Processing | Speaking, Idle)
        )
    }
}

/// Snapshot for the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Telemetry {
    pub state: SessionState,
    pub listening: bool,
    pub speaking: bool,
    pub processing: bool,
    /// Output level, 0..=100.
    pub volume: u8,
    pub live_transcript: String,
    /// Number of utterances finalized so far; the current turn while processing.
    pub turn: u64,
}

/// Platform capabilities a session is built from.
pub struct VoiceCapabilities {
    pub recognizer: Box<dyn SpeechRecognizer>,
    pub synthesis: Arc<SynthesisClient>,
    pub decoder: Arc<dyn AudioDecoder>,
    pub output: Box<dyn AudioOutput>,
}

#[derive(Debug)]
enum Command {
    /// `turn: Some(n)` only applies while turn `n` is still being processed.
    Speak { text: String, turn: Option<u64> },
    Listen,
    ResumeListening { turn: Option<u64> },
    End,
}

enum Event {
    Command(Command),
    Capture(CaptureSignal),
    SilenceElapsed,
    Fetched(VoiceResult<AudioBuffer>),
    SourceEnded,
    Tick,
}

enum Flow {
    Continue,
    Stop,
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

pub struct SessionController {
    config: SessionConfig,
    state: SessionState,
    turn: u64,
    volume: u8,
    capture: SpeechCapture,
    pipeline: SynthesisPipeline,
    playback: PlaybackEngine,
    on_utterance: OnUtterance,
    commands: mpsc::UnboundedReceiver<Command>,
    telemetry: watch::Sender<Telemetry>,
}

impl SessionController {
    /// Start a session on the current tokio runtime.
    ///
    /// A non-empty `greeting` is spoken first and listening begins once it has
    /// played out; an empty one starts listening straight away. Fails with
    /// `RecognitionUnavailable` if the recognizer reports itself unusable.
    pub fn start(
        config: SessionConfig,
        caps: VoiceCapabilities,
        greeting: impl Into<String>,
        on_utterance: OnUtterance,
    ) -> VoiceResult<SessionHandle> {
        caps.recognizer.check_available().map_err(|e| match e {
            VoiceError::RecognitionUnavailable(_) => e,
            other => VoiceError::RecognitionUnavailable(other.to_string()),
        })?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (telemetry_tx, telemetry_rx) = watch::channel(Telemetry::default());
        let controller = SessionController {
            capture: SpeechCapture::new(caps.recognizer, config.silence_timeout()),
            pipeline: SynthesisPipeline::new(caps.synthesis, caps.decoder),
            playback: PlaybackEngine::new(caps.output, config.output_gain, config.sentence_pause()),
            config,
            state: SessionState::Idle,
            turn: 0,
            volume: 0,
            on_utterance,
            commands: command_rx,
            telemetry: telemetry_tx,
        };
        let task = tokio::spawn(controller.run(greeting.into()));

        Ok(SessionHandle {
            commands: command_tx,
            telemetry: telemetry_rx,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    async fn run(mut self, greeting: String) -> VoiceResult<()> {
        info!(target: "mentor::voice", "Voice session started");
        let mut ticker = tokio::time::interval(self.config.telemetry_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut outcome = self.open(&greeting).map(|_| Flow::Continue);
        while let Ok(Flow::Continue) = outcome {
            let silence = self.capture.deadline();
            let buffer_end = self.playback.deadline();
            let event = tokio::select! {
                cmd = self.commands.recv() => Event::Command(cmd.unwrap_or(Command::End)),
                signal = self.capture.next_signal() => Event::Capture(signal),
                () = until(silence) => Event::SilenceElapsed,
                result = self.pipeline.fetched() => Event::Fetched(result),
                () = until(buffer_end) => Event::SourceEnded,
                _ = ticker.tick() => Event::Tick,
            };
            outcome = self.handle(event);
        }

        self.shutdown();
        match outcome {
            Err(e) => {
                error!(target: "mentor::voice", "Voice session failed: {}", e);
                Err(e)
            }
            Ok(_) => {
                info!(target: "mentor::voice", "Voice session ended");
                Ok(())
            }
        }
    }

    fn open(&mut self, greeting: &str) -> VoiceResult<()> {
        if greeting.trim().is_empty() {
            return self.enter_listening();
        }
        self.transition(SessionState::Speaking);
        self.pipeline.enqueue_reply(greeting);
        self.advance_playback()
    }

    fn handle(&mut self, event: Event) -> VoiceResult<Flow> {
        match event {
            Event::Command(Command::Speak { text, turn }) => {
                if self.is_current(turn) {
                    self.speak(&text)?;
                }
            }
            Event::Command(Command::Listen) => {
                if self.state != SessionState::Listening {
                    info!("User barge-in: cutting speech, listening");
                    self.enter_listening()?;
                }
            }
            Event::Command(Command::ResumeListening { turn }) => match self.state {
                SessionState::Processing if self.is_current(turn) => self.enter_listening()?,
                SessionState::Processing => {}
                other => debug!("resume_listening ignored in {}", other.as_str()),
            },
            Event::Command(Command::End) => return Ok(Flow::Stop),
            Event::Capture(CaptureSignal::Event(ev)) => {
                if self.state == SessionState::Listening {
                    self.capture.handle_event(ev, Instant::now());
                    self.publish();
                }
            }
            Event::Capture(CaptureSignal::Closed) => {
                return Err(VoiceError::RecognitionUnavailable(
                    "recognizer stopped delivering events".to_string(),
                ));
            }
            Event::SilenceElapsed => {
                if let Some(text) = self.capture.finalize() {
                    self.utterance_finalized(text);
                }
                self.publish();
            }
            Event::Fetched(result) => {
                self.pipeline.complete_fetch(result);
                if self.state == SessionState::Speaking && !self.playback.is_active() {
                    self.advance_playback()?;
                }
            }
            Event::SourceEnded => self.advance_playback()?,
            Event::Tick => {
                self.volume = self.playback.volume(Instant::now());
                self.publish();
            }
        }
        Ok(Flow::Continue)
    }

    fn utterance_finalized(&mut self, text: String) {
        // Cut any speech still going before the turn is handed off.
        self.playback.stop(&mut self.pipeline);
        if !self.transition(SessionState::Processing) {
            return;
        }
        self.turn += 1;
        self.publish();
        info!("🎯 Utterance finalized (turn {}, {} chars)", self.turn, text.len());
        (self.on_utterance)(Utterance {
            turn: self.turn,
            text,
        });
    }

    /// Whether a command tagged with `turn` still belongs to the turn in progress.
    fn is_current(&self, turn: Option<u64>) -> bool {
        let Some(turn) = turn else {
            return true;
        };
        if self.state == SessionState::Processing && turn == self.turn {
            return true;
        }
        debug!(
            "dropping command for turn {} (now turn {}, {})",
            turn,
            self.turn,
            self.state.as_str()
        );
        false
    }

    fn speak(&mut self, text: &str) -> VoiceResult<()> {
        match self.state {
            SessionState::Idle => {
                warn!("speak() on an idle session ignored");
                return Ok(());
            }
            SessionState::Listening => self.capture.stop(),
            SessionState::Processing | SessionState::Speaking => {}
        }
        if self.state != SessionState::Speaking {
            self.transition(SessionState::Speaking);
        }
        self.pipeline.enqueue_reply(text);
        if self.playback.is_active() {
            return Ok(());
        }
        self.advance_playback()
    }

    /// Play the next buffer, or hand the turn back to the user once everything
    /// queued for this reply has been fetched and played.
    fn advance_playback(&mut self) -> VoiceResult<()> {
        match self.playback.play_next(&mut self.pipeline) {
            PlaybackStep::Started(_) => {}
            PlaybackStep::Idle => {
                if self.state == SessionState::Speaking && self.pipeline.is_drained() {
                    debug!("speech drained; back to listening");
                    self.enter_listening()?;
                }
            }
        }
        self.volume = self.playback.volume(Instant::now());
        self.publish();
        Ok(())
    }

    fn enter_listening(&mut self) -> VoiceResult<()> {
        self.playback.stop(&mut self.pipeline);
        self.volume = 0;
        if !self.transition(SessionState::Listening) {
            return Ok(());
        }
        self.capture.start()?;
        self.publish();
        Ok(())
    }

    /// Apply `next` if the table allows it. Rejections are logged, never applied.
    fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            let err = VoiceError::InvalidTransition {
                from: self.state.as_str(),
                to: next.as_str(),
            };
            warn!("{}", err);
            return false;
        }
        debug!("session {} -> {}", self.state.as_str(), next.as_str());
        self.state = next;
        self.publish();
        true
    }

    fn shutdown(&mut self) {
        self.capture.stop();
        self.playback.release(&mut self.pipeline);
        self.volume = 0;
        if self.state != SessionState::Idle {
            self.transition(SessionState::Idle);
        }
        self.publish();
    }

    fn publish(&self) {
        debug_assert!(
            !(self.capture.is_live() && self.playback.is_active()),
            "microphone and speaker live at the same time"
        );
        let snapshot = Telemetry {
            state: self.state,
            listening: self.state == SessionState::Listening,
            speaking: self.state == SessionState::Speaking,
            processing: self.state == SessionState::Processing,
            volume: self.volume,
            live_transcript: self.capture.live_transcript(),
            turn: self.turn,
        };
        self.telemetry.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

/// Cheap, cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    telemetry: watch::Receiver<Telemetry>,
    task: Arc<Mutex<Option<JoinHandle<VoiceResult<()>>>>>,
}

impl SessionHandle {
    fn send(&self, cmd: Command) -> VoiceResult<()> {
        self.commands.send(cmd).map_err(|_| VoiceError::SessionClosed)
    }

    /// Speak a finished reply. Stops listening first.
    pub fn speak(&self, text: impl Into<String>) -> VoiceResult<()> {
        self.send(Command::Speak {
            text: text.into(),
            turn: None,
        })
    }

    /// Speak the reply to utterance `turn`. Dropped by the session if that turn
    /// is no longer being processed (barge-in, a newer utterance, end).
    pub fn answer(&self, turn: u64, text: impl Into<String>) -> VoiceResult<()> {
        self.send(Command::Speak {
            text: text.into(),
            turn: Some(turn),
        })
    }

    /// Barge in: cut any speech and start listening.
    pub fn listen(&self) -> VoiceResult<()> {
        self.send(Command::Listen)
    }

    /// Go back to listening after the reply collaborator failed.
    pub fn resume_listening(&self) -> VoiceResult<()> {
        self.send(Command::ResumeListening { turn: None })
    }

    /// `resume_listening`, but only if turn `turn` is still being processed.
    pub fn resume_listening_after(&self, turn: u64) -> VoiceResult<()> {
        self.send(Command::ResumeListening { turn: Some(turn) })
    }

    /// Stop everything and release devices. Safe to call more than once.
    pub fn end(&self) {
        let _ = self.send(Command::End);
    }

    pub fn state(&self) -> SessionState {
        self.telemetry.borrow().state
    }

    pub fn telemetry(&self) -> Telemetry {
        self.telemetry.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Telemetry> {
        self.telemetry.clone()
    }

    pub fn telemetry_stream(&self) -> WatchStream<Telemetry> {
        WatchStream::new(self.telemetry.clone())
    }

    /// Wait until the session reaches `state`.
    pub async fn wait_for_state(&self, state: SessionState) -> VoiceResult<()> {
        let mut rx = self.telemetry.clone();
        rx.wait_for(|t| t.state == state)
            .await
            .map(|_| ())
            .map_err(|_| VoiceError::SessionClosed)
    }

    /// Wait for the session task to finish and return how it ended.
    /// Only the first caller sees the outcome; later calls return `Ok(())`.
    pub async fn join(&self) -> VoiceResult<()> {
        let task = self.task.lock().await.take();
        match task {
            Some(task) => task.await.map_err(|_| VoiceError::SessionClosed)?,
            None => Ok(()),
        }
    }
}
