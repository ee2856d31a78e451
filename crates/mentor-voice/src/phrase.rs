//! Phrase segmentation: VAD decisions in, complete spoken phrases out.
//!
//! Counts frames rather than reading the clock, so a phrase boundary depends
//! only on the audio that was captured.

use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum PhraseEvent {
    /// First speech frame of a new phrase.
    Started,
    /// Speech followed by enough silence (or the length cap was hit).
    Committed(Vec<f32>),
    /// Too little speech to be worth transcribing.
    Discarded(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Speaking,
    Gap,
}

pub struct PhraseSegmenter {
    phase: Phase,
    frame_ms: u64,
    gap_frames: u64,
    min_speech_frames: u64,
    max_frames: u64,
    speech_frames: u64,
    silent_frames: u64,
    buffer: Vec<f32>,
    frames: u64,
}

impl PhraseSegmenter {
    /// `gap` of trailing silence commits a phrase; phrases with less than
    /// `min_speech` of speech are dropped; a phrase is cut at `max_phrase`.
    pub fn new(frame_ms: u64, gap: Duration, min_speech: Duration, max_phrase: Duration) -> Self {
        let frame_ms = frame_ms.max(1);
        let frames_for = |d: Duration| (d.as_millis() as u64).div_ceil(frame_ms).max(1);
        Self {
            phase: Phase::Idle,
            frame_ms,
            gap_frames: frames_for(gap),
            min_speech_frames: (min_speech.as_millis() as u64).div_ceil(frame_ms),
            max_frames: frames_for(max_phrase),
            speech_frames: 0,
            silent_frames: 0,
            buffer: Vec::new(),
            frames: 0,
        }
    }

    /// A phrase is being collected.
    pub fn is_active(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn push(&mut self, is_speech: bool, frame: &[f32]) -> Option<PhraseEvent> {
        match (self.phase, is_speech) {
            (Phase::Idle, false) => None,
            (Phase::Idle, true) => {
                self.phase = Phase::Speaking;
                self.append(frame, true);
                debug!("phrase started");
                if self.frames >= self.max_frames {
                    return Some(self.commit());
                }
                Some(PhraseEvent::Started)
            }
            (Phase::Speaking | Phase::Gap, true) => {
                self.phase = Phase::Speaking;
                self.silent_frames = 0;
                self.append(frame, true);
                self.cap()
            }
            (Phase::Speaking | Phase::Gap, false) => {
                self.phase = Phase::Gap;
                self.silent_frames += 1;
                self.append(frame, false);
                if self.silent_frames >= self.gap_frames {
                    return Some(self.commit());
                }
                self.cap()
            }
        }
    }

    fn append(&mut self, frame: &[f32], speech: bool) {
        self.buffer.extend_from_slice(frame);
        self.frames += 1;
        if speech {
            self.speech_frames += 1;
        }
    }

    fn cap(&mut self) -> Option<PhraseEvent> {
        if self.frames >= self.max_frames {
            info!("⏱️ Max phrase length reached, committing");
            return Some(self.commit());
        }
        None
    }

    fn commit(&mut self) -> PhraseEvent {
        let speech = Duration::from_millis(self.speech_frames * self.frame_ms);
        let event = if self.speech_frames < self.min_speech_frames {
            debug!("⏭️ Phrase too short ({:?}), dropping", speech);
            PhraseEvent::Discarded(speech)
        } else {
            debug!("phrase committed: {:?} speech, {} samples", speech, self.buffer.len());
            PhraseEvent::Committed(std::mem::take(&mut self.buffer))
        };
        self.reset();
        event
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.speech_frames = 0;
        self.silent_frames = 0;
        self.frames = 0;
        self.buffer.clear();
    }
}
