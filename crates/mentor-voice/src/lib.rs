//! # Mentor Voice - Spoken Mentoring Sessions
//!
//! A voice session engine for the career mentor: it listens to the user, decides
//! when they have finished talking, hands the utterance to the conversation and
//! speaks the reply back sentence by sentence.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     SessionController (actor)                    │
//! │  ┌───────────────┐   ┌───────────────┐   ┌────────────────────┐  │
//! │  │ SpeechCapture │ → │  Processing   │ → │ SynthesisPipeline  │  │
//! │  │ (1.2s silence)│   │ on_utterance  │   │ text → TTS → PCM   │  │
//! │  └───────────────┘   └───────────────┘   └────────────────────┘  │
//! │          ↑                                          ↓            │
//! │  ┌───────────────┐                       ┌────────────────────┐  │
//! │  │ Recognizer    │                       │  PlaybackEngine    │  │
//! │  │ (mic/VAD/STT) │ ←── drained/barge-in ─│  (rodio, level)    │  │
//! │  └───────────────┘                       └────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Device capabilities (`SpeechRecognizer`, `TtsBackend`, `AudioDecoder`,
//! `AudioOutput`) are traits; `MicRecognizer`, `HttpTts`, `RodioDecoder` and
//! `RodioOutput` are the native implementations. `ChatSessionBinding` connects a
//! session to a reply generator and a transcript sink.

pub mod audio;
pub mod binding;
pub mod capture;
pub mod config;
pub mod decode;
pub mod error;
pub mod keys;
pub mod mic;
pub mod phrase;
pub mod pipeline;
pub mod playback;
pub mod sentences;
pub mod session;
pub mod stt;
pub mod synthesis;
pub mod vad;

pub use binding::{
    BoundSession, ChatSessionBinding, HttpReplyGenerator, MemoryTranscript, ReplyGenerator, Role,
    TracingTranscript, TranscriptEntry, TranscriptSink,
};
pub use capture::{
    CaptureSignal, Fragment, RecognitionEvent, RecognitionSink, SpeechCapture, SpeechRecognizer,
};
pub use config::{MicConfig, SessionConfig, TranscriberConfig, TtsConfig, VoiceParams};
pub use decode::{AudioBuffer, AudioDecoder, RodioDecoder};
pub use error::{VoiceError, VoiceResult};
pub use keys::KeyRotator;
pub use mic::MicRecognizer;
pub use pipeline::SynthesisPipeline;
pub use playback::{level_percent, AudioOutput, PlaybackEngine, PlaybackStep, RodioOutput};
pub use sentences::split_sentences;
pub use session::{
    OnUtterance, SessionController, SessionHandle, SessionState, Telemetry, Utterance,
    VoiceCapabilities,
};
pub use stt::{HttpTranscriber, PhraseTranscriber};
pub use synthesis::{HttpTts, PlaceholderTts, SynthesisClient, TtsBackend};
