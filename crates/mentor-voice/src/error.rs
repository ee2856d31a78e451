//! Error types for the mentor voice session

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while running a voice session.
///
/// Per-sentence failures (`NoCredentials`, `SynthesisUnavailable`, `DecodeFailure`)
/// are recovered locally by skipping the sentence. `RecognitionUnavailable` is the
/// only one that ends a session.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("No synthesis credentials available")]
    NoCredentials,

    #[error("Synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    #[error("Speech recognition unavailable: {0}")]
    RecognitionUnavailable(String),

    #[error("Audio decode failed: {0}")]
    DecodeFailure(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("VAD error: {0}")]
    Vad(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("Reply generation failed: {0}")]
    Reply(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// Failures that only cost one sentence; the pipeline keeps going.
    pub fn is_per_sentence(&self) -> bool {
        matches!(
            self,
            VoiceError::NoCredentials
                | VoiceError::SynthesisUnavailable(_)
                | VoiceError::DecodeFailure(_)
                | VoiceError::Playback(_)
        )
    }
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}
