//! Microphone capture using CPAL, plus housekeeping for device threads.
//!
//! The device is opened at its own default rate and layout; the callback
//! downmixes to mono, resamples to the recognizer rate and cuts fixed-size frames
//! for the VAD.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::sync::mpsc as std_mpsc;
use std::thread;
use tracing::{info, warn};

/// Downmixes, resamples (linear) and frames raw device samples.
#[derive(Debug)]
pub struct FrameAssembler {
    channels: usize,
    /// Source samples consumed per output sample.
    step: f64,
    /// Fractional read position relative to `prev`.
    pos: f64,
    prev: Option<f32>,
    frame_samples: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(device_rate: u32, channels: u16, target_rate: u32, frame_samples: usize) -> Self {
        Self {
            channels: channels.max(1) as usize,
            step: device_rate.max(1) as f64 / target_rate.max(1) as f64,
            pos: 0.0,
            prev: None,
            frame_samples: frame_samples.max(1),
            pending: Vec::with_capacity(frame_samples),
        }
    }

    /// Feed interleaved device samples; `emit` gets every completed frame.
    pub fn push(&mut self, interleaved: &[f32], mut emit: impl FnMut(Vec<f32>)) {
        for frame in interleaved.chunks_exact(self.channels) {
            let mono = frame.iter().sum::<f32>() / self.channels as f32;
            let Some(prev) = self.prev.replace(mono) else {
                continue;
            };
            // Interpolate every output point that falls between prev and mono.
            while self.pos < 1.0 {
                let t = self.pos as f32;
                self.pending.push(prev + (mono - prev) * t);
                self.pos += self.step;
                if self.pending.len() == self.frame_samples {
                    emit(std::mem::replace(
                        &mut self.pending,
                        Vec::with_capacity(self.frame_samples),
                    ));
                }
            }
            self.pos -= 1.0;
        }
    }
}

pub fn default_input_device() -> VoiceResult<Device> {
    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))
}

/// Open the default microphone and send `frame_samples`-long mono frames at
/// `target_rate` into `frames`. Keep the returned stream alive to keep capturing.
pub fn open_microphone(
    target_rate: u32,
    frame_samples: usize,
    frames: std_mpsc::Sender<Vec<f32>>,
) -> VoiceResult<Stream> {
    let device = default_input_device()?;
    let supported = device.default_input_config()?;
    let device_rate = supported.sample_rate().0;
    let channels = supported.channels();
    info!(
        "🎤 Microphone: {} ({}Hz, {} ch → {}Hz mono)",
        device.name().unwrap_or_else(|_| "Unknown".to_string()),
        device_rate,
        channels,
        target_rate
    );

    let config: StreamConfig = supported.clone().into();
    let mut assembler = FrameAssembler::new(device_rate, channels, target_rate, frame_samples);
    let err_fn = |err: cpal::StreamError| warn!("Audio input stream error: {}", err);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                assembler.push(data, |frame| {
                    let _ = frames.send(frame);
                });
            },
            err_fn,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let data: Vec<f32> = data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                assembler.push(&data, |frame| {
                    let _ = frames.send(frame);
                });
            },
            err_fn,
            None,
        )?,
        other => {
            return Err(VoiceError::AudioStream(format!(
                "Unsupported input sample format: {:?}",
                other
            )))
        }
    };
    stream.play()?;
    Ok(stream)
}

/// Names of the host's input devices.
pub fn list_input_devices() -> VoiceResult<Vec<String>> {
    let devices = cpal::default_host().input_devices()?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Join a device thread that has been told to exit. On a tokio runtime the join
/// goes to the blocking pool so the caller never waits on it.
pub(crate) fn retire_thread(handle: thread::JoinHandle<()>, what: &'static str) {
    let join = move || {
        if handle.join().is_err() {
            warn!("{} thread panicked", what);
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn_blocking(join);
        }
        Err(_) => join(),
    }
}
