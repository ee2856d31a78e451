//! Decoding synthesized payloads into playable PCM buffers.

use crate::error::{VoiceError, VoiceResult};
use rodio::Source;
use std::io::Cursor;
use std::time::Duration;

/// Decoded PCM for one sentence (interleaved f32, -1.0..1.0).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = self.frames() as u128 * 1_000_000_000 / self.sample_rate as u128;
        Duration::from_nanos(nanos as u64)
    }

    /// Interleaved samples for the frame window starting at `offset`.
    pub fn window_at(&self, offset: Duration, frames: usize) -> &[f32] {
        let channels = self.channels.max(1) as usize;
        let first = (offset.as_secs_f64() * self.sample_rate as f64) as usize * channels;
        if first >= self.samples.len() {
            return &[];
        }
        let last = (first + frames * channels).min(self.samples.len());
        &self.samples[first..last]
    }
}

/// Turns encoded audio bytes into an `AudioBuffer`.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> VoiceResult<AudioBuffer>;
}

/// Decoder backed by rodio (MP3, WAV, FLAC, Vorbis).
#[derive(Debug, Default, Clone, Copy)]
pub struct RodioDecoder;

impl AudioDecoder for RodioDecoder {
    fn decode(&self, bytes: &[u8]) -> VoiceResult<AudioBuffer> {
        if bytes.is_empty() {
            return Err(VoiceError::DecodeFailure("empty payload".to_string()));
        }
        let decoder = rodio::Decoder::new(Cursor::new(bytes.to_vec()))
            .map_err(|e| VoiceError::DecodeFailure(e.to_string()))?;
        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        let samples: Vec<f32> = decoder.convert_samples::<f32>().collect();
        if samples.is_empty() {
            return Err(VoiceError::DecodeFailure("payload decoded to no samples".to_string()));
        }
        Ok(AudioBuffer::new(samples, sample_rate, channels))
    }
}
