//! **SpeechCapture** - one finalized transcript per user turn.
//!
//! Recognition events feed an accumulating utterance: final fragments are kept,
//! interim fragments are only shown live. Every event pushes the silence deadline
//! out again (debounced), so only the latest silence window can finalize. When it
//! elapses the utterance is emitted and capture stops until restarted.

use crate::error::{VoiceError, VoiceResult};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

/// One recognition hypothesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub is_final: bool,
}

/// A batch of hypotheses from the recognizer. An event with no fragments is a
/// pure activity signal: speech is happening but no text is available yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognitionEvent {
    pub fragments: Vec<Fragment>,
}

impl RecognitionEvent {
    pub fn activity() -> Self {
        Self::default()
    }

    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            fragments: vec![Fragment {
                text: text.into(),
                is_final: false,
            }],
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            fragments: vec![Fragment {
                text: text.into(),
                is_final: true,
            }],
        }
    }
}

/// Where a recognizer delivers its events.
pub type RecognitionSink = mpsc::UnboundedSender<RecognitionEvent>;

/// Speech-to-text capability. Implement for a native engine or a remote ASR.
pub trait SpeechRecognizer: Send {
    /// Report up front whether capture can work at all (device present, permission granted).
    fn check_available(&self) -> VoiceResult<()> {
        Ok(())
    }

    /// Begin capturing; events go to `sink` until `stop_capture`.
    fn start_capture(&mut self, sink: RecognitionSink) -> VoiceResult<()>;

    fn stop_capture(&mut self);
}

/// What the capture side produced for the session loop.
#[derive(Debug)]
pub enum CaptureSignal {
    Event(RecognitionEvent),
    /// The recognizer dropped its sink while capture was live.
    Closed,
}

fn append_text(buf: &mut String, piece: &str) {
    let piece = piece.trim();
    if piece.is_empty() {
        return;
    }
    if !buf.is_empty() {
        buf.push(' ');
    }
    buf.push_str(piece);
}

pub struct SpeechCapture {
    recognizer: Box<dyn SpeechRecognizer>,
    silence: Duration,
    events: Option<mpsc::UnboundedReceiver<RecognitionEvent>>,
    base: String,
    interim: String,
    deadline: Option<Instant>,
}

impl SpeechCapture {
    pub fn new(recognizer: Box<dyn SpeechRecognizer>, silence: Duration) -> Self {
        Self {
            recognizer,
            silence,
            events: None,
            base: String::new(),
            interim: String::new(),
            deadline: None,
        }
    }

    /// Start a fresh utterance. Each start gets its own channel, so events from an
    /// earlier capture can never leak into this one.
    pub fn start(&mut self) -> VoiceResult<()> {
        if self.is_live() {
            return Ok(());
        }
        self.reset();
        let (tx, rx) = mpsc::unbounded_channel();
        self.recognizer.start_capture(tx).map_err(|e| match e {
            VoiceError::RecognitionUnavailable(_) => e,
            other => VoiceError::RecognitionUnavailable(other.to_string()),
        })?;
        self.events = Some(rx);
        info!("🎤 Capture started");
        Ok(())
    }

    /// Stop capturing and discard whatever was accumulated.
    pub fn stop(&mut self) {
        if self.events.take().is_some() {
            self.recognizer.stop_capture();
            info!("🎤 Capture stopped");
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.base.clear();
        self.interim.clear();
        self.deadline = None;
    }

    pub fn is_live(&self) -> bool {
        self.events.is_some()
    }

    /// Next recognizer signal; pending while capture is stopped.
    pub async fn next_signal(&mut self) -> CaptureSignal {
        let Some(rx) = self.events.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Some(event) => CaptureSignal::Event(event),
            None => CaptureSignal::Closed,
        }
    }

    /// Fold one event into the utterance and restart the silence window.
    /// Ignored unless capture is live.
    pub fn handle_event(&mut self, event: RecognitionEvent, now: Instant) {
        if !self.is_live() {
            debug!("dropping recognition event while capture is stopped");
            return;
        }
        if !event.fragments.is_empty() {
            self.interim.clear();
            for fragment in &event.fragments {
                if fragment.is_final {
                    append_text(&mut self.base, &fragment.text);
                } else {
                    append_text(&mut self.interim, &fragment.text);
                }
            }
        }
        self.deadline = Some(now + self.silence);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Close the silence window. Returns the utterance and stops capture, or
    /// `None` (still listening) when nothing but whitespace was heard.
    pub fn finalize(&mut self) -> Option<String> {
        self.deadline = None;
        let text = self.live_transcript();
        if text.is_empty() {
            debug!("silence with no text; still listening");
            return None;
        }
        self.stop();
        Some(text)
    }

    /// Finals plus trailing interim, as shown to the user.
    pub fn live_transcript(&self) -> String {
        let mut text = self.base.clone();
        append_text(&mut text, &self.interim);
        text
    }
}
