//! **PlaybackEngine** - gapless sentence playback with a hard-stop kill-switch.
//!
//! The engine plays buffers from the pipeline's audio queue one after another,
//! scheduling the next one when the current buffer ends plus a short
//! inter-sentence pause. The output graph (analysis → gain → device) is acquired
//! lazily on the first buffer and kept for the whole session.

use crate::audio::retire_thread;
use crate::decode::AudioBuffer;
use crate::error::{VoiceError, VoiceResult};
use crate::pipeline::SynthesisPipeline;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Frames per analysis window (~40ms at 24kHz).
const ANALYSIS_FRAMES: usize = 1024;

/// Level floor; anything quieter reads as 0.
const FLOOR_DB: f32 = -60.0;

/// Device-side playback capability.
pub trait AudioOutput: Send {
    /// Acquire or resume the output device. Called before the first buffer.
    fn resume(&mut self) -> VoiceResult<()>;
    /// Start playing `buffer` immediately; returns without waiting for it to end.
    fn play(&mut self, buffer: &AudioBuffer) -> VoiceResult<()>;
    /// Silence whatever is playing now.
    fn stop(&mut self);
    fn set_gain(&mut self, gain: f32);
    /// Give the device back.
    fn release(&mut self);
}

/// Result of advancing the playback queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStep {
    /// A buffer of this length started.
    Started(Duration),
    /// Queue empty; nothing is playing.
    Idle,
}

struct NowPlaying {
    buffer: AudioBuffer,
    started: Instant,
}

pub struct PlaybackEngine {
    output: Box<dyn AudioOutput>,
    graph_ready: bool,
    gain: f32,
    pause: Duration,
    current: Option<NowPlaying>,
    next_at: Option<Instant>,
}

impl PlaybackEngine {
    pub fn new(output: Box<dyn AudioOutput>, gain: f32, pause: Duration) -> Self {
        Self {
            output,
            graph_ready: false,
            gain,
            pause,
            current: None,
            next_at: None,
        }
    }

    fn ensure_graph(&mut self) -> VoiceResult<()> {
        if self.graph_ready {
            return Ok(());
        }
        self.output.resume()?;
        self.output.set_gain(self.gain);
        self.graph_ready = true;
        info!("🔊 Output graph ready (gain {:.2})", self.gain);
        Ok(())
    }

    /// Start the next queued buffer. Buffers the device rejects are skipped.
    pub fn play_next(&mut self, pipeline: &mut SynthesisPipeline) -> PlaybackStep {
        while let Some(buffer) = pipeline.pop_audio() {
            match self.ensure_graph().and_then(|_| self.output.play(&buffer)) {
                Ok(()) => {
                    let length = buffer.duration();
                    let now = Instant::now();
                    self.next_at = Some(now + length + self.pause);
                    self.current = Some(NowPlaying {
                        buffer,
                        started: now,
                    });
                    debug!("▶️ Playing sentence ({:?})", length);
                    return PlaybackStep::Started(length);
                }
                Err(e) => warn!("Skipping buffer: {}", e),
            }
        }
        self.current = None;
        self.next_at = None;
        PlaybackStep::Idle
    }

    /// Hard stop: silence the device and discard all queued audio and text.
    pub fn stop(&mut self, pipeline: &mut SynthesisPipeline) {
        if self.current.take().is_some() {
            self.output.stop();
            info!("⏹️ Playback stopped");
        }
        self.next_at = None;
        pipeline.clear();
    }

    /// Playing a buffer or waiting out the pause after one.
    pub fn is_active(&self) -> bool {
        self.next_at.is_some()
    }

    /// When the current buffer (plus pause) is over.
    pub fn deadline(&self) -> Option<Instant> {
        self.next_at
    }

    /// Output level 0..=100 at `now`, measured before the gain stage.
    pub fn volume(&self, now: Instant) -> u8 {
        let Some(playing) = self.current.as_ref() else {
            return 0;
        };
        let offset = now.saturating_duration_since(playing.started);
        level_percent(playing.buffer.window_at(offset, ANALYSIS_FRAMES))
    }

    /// Stop and hand the device back. The graph is rebuilt on next use.
    pub fn release(&mut self, pipeline: &mut SynthesisPipeline) {
        self.stop(pipeline);
        if self.graph_ready {
            self.output.release();
            self.graph_ready = false;
        }
    }
}

/// RMS of `window` mapped from [-60 dBFS, 0 dBFS] onto 0..=100.
pub fn level_percent(window: &[f32]) -> u8 {
    if window.is_empty() {
        return 0;
    }
    let sum: f32 = window.iter().map(|s| s * s).sum();
    let rms = (sum / window.len() as f32).sqrt();
    if rms <= 0.0 {
        return 0;
    }
    let db = 20.0 * rms.log10();
    let scaled = (db - FLOOR_DB) / -FLOOR_DB * 100.0;
    scaled.clamp(0.0, 100.0).round() as u8
}

enum PlayerCommand {
    Play(AudioBuffer),
    Stop,
    Gain(f32),
    Shutdown,
}

/// Default-device output through rodio. The output stream is not `Send` on every
/// platform, so it lives on a dedicated player thread fed by a command channel.
///
/// Nothing here waits on the device: `resume` returns once the thread is
/// spawned, and a device that fails to open shows up as `play` errors.
#[derive(Default)]
pub struct RodioOutput {
    tx: Option<std_mpsc::Sender<PlayerCommand>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RodioOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn send(&self, cmd: PlayerCommand) -> VoiceResult<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| VoiceError::Playback("output not resumed".to_string()))?;
        tx.send(cmd)
            .map_err(|_| VoiceError::Playback("player thread gone".to_string()))
    }
}

fn run_player(rx: std_mpsc::Receiver<PlayerCommand>, previous: Option<thread::JoinHandle<()>>) {
    // The device is opened only after the previous player has let go of it.
    if let Some(previous) = previous {
        if previous.join().is_err() {
            warn!("Previous player thread panicked");
        }
    }
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(s) => s,
        Err(e) => {
            error!("Audio output unavailable: {}", e);
            return;
        }
    };
    let mut sink = match Sink::try_new(&handle) {
        Ok(s) => s,
        Err(e) => {
            error!("Audio output unavailable: {}", e);
            return;
        }
    };
    let mut gain = 1.0;

    while let Ok(cmd) = rx.recv() {
        match cmd {
            PlayerCommand::Play(buffer) => {
                sink.append(SamplesBuffer::new(
                    buffer.channels,
                    buffer.sample_rate,
                    buffer.samples,
                ));
            }
            PlayerCommand::Stop => {
                sink.stop();
                // A stopped sink stays stopped; start over with a fresh one.
                match Sink::try_new(&handle) {
                    Ok(fresh) => {
                        fresh.set_volume(gain);
                        sink = fresh;
                    }
                    Err(e) => warn!("Player: sink rebuild failed: {}", e),
                }
            }
            PlayerCommand::Gain(g) => {
                gain = g;
                sink.set_volume(g);
            }
            PlayerCommand::Shutdown => break,
        }
    }
    sink.stop();
    debug!("Player thread exiting");
}

impl AudioOutput for RodioOutput {
    fn resume(&mut self) -> VoiceResult<()> {
        if self.tx.is_some() {
            return Ok(());
        }
        let (tx, rx) = std_mpsc::channel();
        let previous = self.thread.take();
        let handle = thread::Builder::new()
            .name("mentor-voice-player".to_string())
            .spawn(move || run_player(rx, previous))?;
        self.tx = Some(tx);
        self.thread = Some(handle);
        Ok(())
    }

    fn play(&mut self, buffer: &AudioBuffer) -> VoiceResult<()> {
        self.send(PlayerCommand::Play(buffer.clone()))
    }

    fn stop(&mut self) {
        let _ = self.send(PlayerCommand::Stop);
    }

    fn set_gain(&mut self, gain: f32) {
        let _ = self.send(PlayerCommand::Gain(gain));
    }

    /// Asks the player to shut down without waiting for it. The exiting thread
    /// is kept so the next `resume` joins it before reopening the device.
    fn release(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(PlayerCommand::Shutdown);
        }
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        self.release();
        if let Some(handle) = self.thread.take() {
            retire_thread(handle, "player");
        }
    }
}
