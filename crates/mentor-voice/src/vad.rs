//! Frame-level voice activity detection using WebRTC VAD.
//!
//! `webrtc_vad::Vad` wraps a raw C handle and is not `Send`; build it on the
//! thread that uses it.

use crate::error::{VoiceError, VoiceResult};
use tracing::debug;
use webrtc_vad::{SampleRate, Vad, VadMode};

fn sample_rate_of(hz: u32) -> VoiceResult<SampleRate> {
    match hz {
        8000 => Ok(SampleRate::Rate8kHz),
        16000 => Ok(SampleRate::Rate16kHz),
        32000 => Ok(SampleRate::Rate32kHz),
        48000 => Ok(SampleRate::Rate48kHz),
        other => Err(VoiceError::Config(format!(
            "WebRTC VAD only supports 8000, 16000, 32000, or 48000 Hz, got {}",
            other
        ))),
    }
}

fn mode_of(mode: u8) -> VoiceResult<VadMode> {
    match mode {
        0 => Ok(VadMode::Quality),
        1 => Ok(VadMode::LowBitrate),
        2 => Ok(VadMode::Aggressive),
        3 => Ok(VadMode::VeryAggressive),
        other => Err(VoiceError::Config(format!("VAD mode must be 0-3, got {}", other))),
    }
}

/// Check a rate / frame / mode combination without building a detector.
/// Frames must be 10, 20 or 30 ms long.
pub fn validate(sample_rate: u32, frame_samples: usize, mode: u8) -> VoiceResult<()> {
    sample_rate_of(sample_rate)?;
    mode_of(mode)?;
    let per_10ms = sample_rate as usize / 100;
    if ![per_10ms, per_10ms * 2, per_10ms * 3].contains(&frame_samples) {
        return Err(VoiceError::Config(format!(
            "VAD frames must be 10/20/30ms ({}, {} or {} samples at {}Hz), got {}",
            per_10ms,
            per_10ms * 2,
            per_10ms * 3,
            sample_rate,
            frame_samples
        )));
    }
    Ok(())
}

pub struct FrameVad {
    vad: Vad,
    frame_samples: usize,
    scratch: Vec<i16>,
}

impl FrameVad {
    pub fn new(sample_rate: u32, frame_samples: usize, mode: u8) -> VoiceResult<Self> {
        validate(sample_rate, frame_samples, mode)?;
        let mut vad = Vad::new();
        vad.set_mode(mode_of(mode)?);
        vad.set_sample_rate(sample_rate_of(sample_rate)?);
        debug!("VAD ready ({}Hz, {} samples/frame, mode {})", sample_rate, frame_samples, mode);
        Ok(Self {
            vad,
            frame_samples,
            scratch: Vec::with_capacity(frame_samples),
        })
    }

    /// Classify one frame of exactly `frame_samples` f32 samples.
    pub fn is_speech(&mut self, frame: &[f32]) -> VoiceResult<bool> {
        if frame.len() != self.frame_samples {
            return Err(VoiceError::Vad(format!(
                "Expected {} samples, got {}",
                self.frame_samples,
                frame.len()
            )));
        }
        self.scratch.clear();
        self.scratch
            .extend(frame.iter().map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16));
        self.vad
            .is_voice_segment(&self.scratch)
            .map_err(|_| VoiceError::Vad("invalid frame length".to_string()))
    }
}
