//! **MicRecognizer** - native speech recognition from the default microphone.
//!
//! ```text
//!  cpal callback ──frames──► mic thread: VAD → PhraseSegmenter ──phrases──► transcribe task
//!                                 │                                              │
//!                                 └──── activity events ──► sink ◄── final text ─┘
//! ```
//!
//! The cpal stream and the WebRTC VAD are not `Send`, so both live on the mic
//! thread. Transcription runs on the session's tokio runtime. While a phrase is
//! being spoken or transcribed the mic thread keeps emitting activity events,
//! which hold the session's silence window open until the text lands.
//!
//! Starting and stopping never block the session task. A stopped mic thread is
//! joined by the next one before it reopens the device; a microphone that fails
//! to open ends the event stream, which the session reports as
//! `RecognitionUnavailable`.

use crate::audio::{default_input_device, open_microphone, retire_thread};
use crate::capture::{RecognitionEvent, RecognitionSink, SpeechRecognizer};
use crate::config::MicConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::phrase::{PhraseEvent, PhraseSegmenter};
use crate::stt::PhraseTranscriber;
use crate::vad::{self, FrameVad};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How often the mic thread wakes to check for a stop request.
const POLL: Duration = Duration::from_millis(100);

struct Worker {
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
    transcribe: tokio::task::JoinHandle<()>,
}

pub struct MicRecognizer {
    config: MicConfig,
    transcriber: Arc<dyn PhraseTranscriber>,
    worker: Option<Worker>,
    /// Mic thread told to stop but not yet joined.
    retiring: Option<thread::JoinHandle<()>>,
}

impl MicRecognizer {
    pub fn new(config: MicConfig, transcriber: Arc<dyn PhraseTranscriber>) -> Self {
        Self {
            config,
            transcriber,
            worker: None,
            retiring: None,
        }
    }
}

fn unavailable(e: VoiceError) -> VoiceError {
    match e {
        VoiceError::RecognitionUnavailable(_) => e,
        other => VoiceError::RecognitionUnavailable(other.to_string()),
    }
}

impl SpeechRecognizer for MicRecognizer {
    fn check_available(&self) -> VoiceResult<()> {
        vad::validate(
            self.config.sample_rate,
            self.config.frame_samples,
            self.config.vad_mode,
        )
        .map_err(unavailable)?;
        default_input_device().map(|_| ()).map_err(unavailable)
    }

    fn start_capture(&mut self, sink: RecognitionSink) -> VoiceResult<()> {
        self.stop_capture();
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            VoiceError::RecognitionUnavailable("no tokio runtime for transcription".to_string())
        })?;

        let stop = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));
        let (phrase_tx, phrase_rx) = mpsc::unbounded_channel::<Vec<f32>>();
        let transcribe = runtime.spawn(transcribe_phrases(
            Arc::clone(&self.transcriber),
            self.config.sample_rate,
            phrase_rx,
            sink.clone(),
            Arc::clone(&pending),
        ));

        let config = self.config.clone();
        let thread_stop = Arc::clone(&stop);
        let previous = self.retiring.take();
        let spawned = thread::Builder::new()
            .name("mentor-voice-mic".to_string())
            .spawn(move || run_mic(config, sink, phrase_tx, pending, thread_stop, previous));
        let thread = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                transcribe.abort();
                return Err(VoiceError::RecognitionUnavailable(e.to_string()));
            }
        };

        self.worker = Some(Worker {
            stop,
            thread,
            transcribe,
        });
        Ok(())
    }

    fn stop_capture(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.stop.store(true, Ordering::SeqCst);
        worker.transcribe.abort();
        if let Some(older) = self.retiring.replace(worker.thread) {
            retire_thread(older, "mic");
        }
        debug!("mic recognizer stopped");
    }
}

impl Drop for MicRecognizer {
    fn drop(&mut self) {
        self.stop_capture();
        if let Some(thread) = self.retiring.take() {
            retire_thread(thread, "mic");
        }
    }
}

fn run_mic(
    config: MicConfig,
    sink: RecognitionSink,
    phrases: mpsc::UnboundedSender<Vec<f32>>,
    pending: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    previous: Option<thread::JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        if previous.join().is_err() {
            warn!("Previous mic thread panicked");
        }
    }
    if stop.load(Ordering::SeqCst) {
        return;
    }
    let (frame_tx, frame_rx) = std_mpsc::channel();
    let setup = FrameVad::new(config.sample_rate, config.frame_samples, config.vad_mode).and_then(
        |vad| {
            let stream = open_microphone(config.sample_rate, config.frame_samples, frame_tx)?;
            Ok((vad, stream))
        },
    );
    let (mut vad, _stream) = match setup {
        Ok(parts) => parts,
        Err(e) => {
            error!("Microphone unavailable: {}", e);
            return;
        }
    };

    let mut segmenter = PhraseSegmenter::new(
        config.frame_ms(),
        config.phrase_gap(),
        config.min_phrase(),
        config.max_phrase(),
    );
    let activity_every = config.activity_frames();
    let mut since_activity = 0u64;
    info!(
        "👂 Mic listening ({}ms frames, {}ms phrase gap)",
        config.frame_ms(),
        config.phrase_gap_ms
    );

    while !stop.load(Ordering::SeqCst) {
        let frame = match frame_rx.recv_timeout(POLL) {
            Ok(frame) => frame,
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                error!("Microphone stream ended");
                break;
            }
        };
        let is_speech = match vad.is_speech(&frame) {
            Ok(v) => v,
            Err(e) => {
                debug!("VAD skipped a frame: {}", e);
                continue;
            }
        };

        match segmenter.push(is_speech, &frame) {
            Some(PhraseEvent::Started) => {
                // Report speech right away; the periodic cadence starts from here.
                since_activity = activity_every;
            }
            Some(PhraseEvent::Committed(samples)) => {
                pending.fetch_add(1, Ordering::SeqCst);
                if phrases.send(samples).is_err() {
                    break;
                }
            }
            Some(PhraseEvent::Discarded(speech)) => debug!("dropped {:?} blip", speech),
            None => {}
        }

        if segmenter.is_active() || pending.load(Ordering::SeqCst) > 0 {
            since_activity += 1;
            if since_activity >= activity_every {
                since_activity = 0;
                if sink.send(RecognitionEvent::activity()).is_err() {
                    break;
                }
            }
        } else {
            since_activity = 0;
        }
    }
    debug!("Mic thread exiting");
}

async fn transcribe_phrases(
    transcriber: Arc<dyn PhraseTranscriber>,
    sample_rate: u32,
    mut phrases: mpsc::UnboundedReceiver<Vec<f32>>,
    sink: RecognitionSink,
    pending: Arc<AtomicUsize>,
) {
    while let Some(samples) = phrases.recv().await {
        let result = transcriber.transcribe(&samples, sample_rate).await;
        let delivered = match result {
            Ok(text) if !text.trim().is_empty() => {
                debug!("phrase transcribed ({} chars)", text.len());
                sink.send(RecognitionEvent::final_text(text)).is_ok()
            }
            Ok(_) => true,
            Err(e) => {
                warn!("Phrase transcription failed: {}", e);
                true
            }
        };
        pending.fetch_sub(1, Ordering::SeqCst);
        if !delivered {
            break;
        }
    }
}
