//! Scripted capabilities for driving a session without devices.
#![allow(dead_code)]

use async_trait::async_trait;
use mentor_voice::{
    AudioBuffer, AudioDecoder, AudioOutput, KeyRotator, OnUtterance, RecognitionEvent,
    RecognitionSink, SpeechRecognizer, SynthesisClient, TtsBackend, Utterance,
    VoiceCapabilities, VoiceError, VoiceParams, VoiceResult,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Device {
    CaptureStarted,
    CaptureStopped,
    Resume,
    /// Samples in the buffer: ten per byte of sentence text.
    Play(usize),
    Stop,
    Release,
}

/// Shared view of everything the mocks did.
#[derive(Clone, Default)]
pub struct Rig {
    log: Arc<Mutex<Vec<Device>>>,
    sink: Arc<Mutex<Option<RecognitionSink>>>,
    stale: Arc<Mutex<Option<RecognitionSink>>>,
    synthesized: Arc<Mutex<Vec<(String, String)>>>,
    overlaps: Arc<Mutex<usize>>,
}

impl Rig {
    pub fn log(&self) -> Vec<Device> {
        self.log.lock().unwrap().clone()
    }

    pub fn plays(&self) -> Vec<usize> {
        self.log()
            .into_iter()
            .filter_map(|d| match d {
                Device::Play(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, device: &Device) -> usize {
        self.log().iter().filter(|d| *d == device).count()
    }

    /// Keys used for each synthesis call, in call order.
    pub fn keys_used(&self) -> Vec<String> {
        self.synthesized
            .lock()
            .unwrap()
            .iter()
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Sentences sent for synthesis, in call order.
    pub fn sentences(&self) -> Vec<String> {
        self.synthesized
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn synth_calls(&self) -> usize {
        self.synthesized.lock().unwrap().len()
    }

    /// Buffers that started while the microphone was live.
    pub fn overlaps(&self) -> usize {
        *self.overlaps.lock().unwrap()
    }

    pub fn capture_live(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    /// Deliver a recognition event to the live capture.
    pub fn say(&self, event: RecognitionEvent) {
        let sink = self.sink.lock().unwrap();
        sink.as_ref()
            .expect("capture is not live")
            .send(event)
            .expect("capture receiver dropped");
    }

    /// Deliver through the sender of the most recent capture, live or not.
    pub fn say_late(&self, event: RecognitionEvent) {
        if let Some(sink) = self.stale.lock().unwrap().as_ref() {
            let _ = sink.send(event);
        }
    }

    /// The recognizer gives up: every sender goes away.
    pub fn kill_recognizer(&self) {
        self.sink.lock().unwrap().take();
        self.stale.lock().unwrap().take();
    }

    pub fn recognizer(&self) -> MockRecognizer {
        MockRecognizer {
            rig: self.clone(),
            unavailable: false,
        }
    }

    pub fn caps(&self, keys: &[&str], tts: ScriptedTts) -> VoiceCapabilities {
        self.caps_with(Box::new(self.recognizer()), keys, tts)
    }

    pub fn caps_with(
        &self,
        recognizer: Box<dyn SpeechRecognizer>,
        keys: &[&str],
        tts: ScriptedTts,
    ) -> VoiceCapabilities {
        let client = SynthesisClient::new(
            KeyRotator::new(keys.iter().map(|k| k.to_string()).collect()),
            Arc::new(tts),
            VoiceParams::default(),
            Duration::from_secs(15),
        );
        VoiceCapabilities {
            recognizer,
            synthesis: Arc::new(client),
            decoder: Arc::new(TextDecoder),
            output: Box::new(MockOutput { rig: self.clone() }),
        }
    }

    fn push(&self, device: Device) {
        self.log.lock().unwrap().push(device);
    }
}

pub struct MockRecognizer {
    rig: Rig,
    pub unavailable: bool,
}

impl SpeechRecognizer for MockRecognizer {
    fn check_available(&self) -> VoiceResult<()> {
        if self.unavailable {
            return Err(VoiceError::RecognitionUnavailable(
                "microphone permission denied".into(),
            ));
        }
        Ok(())
    }

    fn start_capture(&mut self, sink: RecognitionSink) -> VoiceResult<()> {
        *self.rig.stale.lock().unwrap() = Some(sink.clone());
        *self.rig.sink.lock().unwrap() = Some(sink);
        self.rig.push(Device::CaptureStarted);
        Ok(())
    }

    fn stop_capture(&mut self) {
        self.rig.sink.lock().unwrap().take();
        self.rig.push(Device::CaptureStopped);
    }
}

pub struct MockOutput {
    rig: Rig,
}

impl AudioOutput for MockOutput {
    fn resume(&mut self) -> VoiceResult<()> {
        self.rig.push(Device::Resume);
        Ok(())
    }

    fn play(&mut self, buffer: &AudioBuffer) -> VoiceResult<()> {
        if self.rig.capture_live() {
            *self.rig.overlaps.lock().unwrap() += 1;
        }
        self.rig.push(Device::Play(buffer.samples.len()));
        Ok(())
    }

    fn stop(&mut self) {
        self.rig.push(Device::Stop);
    }

    fn set_gain(&mut self, _gain: f32) {}

    fn release(&mut self) {
        self.rig.push(Device::Release);
    }
}

/// Synthesizes a sentence into its own text bytes. Sentences containing
/// "fail" are rejected; with a gate, every call after the first `free` ones
/// waits for a permit.
pub struct ScriptedTts {
    rig: Rig,
    gate: Option<(Arc<Semaphore>, usize)>,
}

impl ScriptedTts {
    pub fn new(rig: &Rig) -> Self {
        Self {
            rig: rig.clone(),
            gate: None,
        }
    }

    pub fn gated(rig: &Rig, free: usize, gate: Arc<Semaphore>) -> Self {
        Self {
            rig: rig.clone(),
            gate: Some((gate, free)),
        }
    }
}

#[async_trait]
impl TtsBackend for ScriptedTts {
    async fn synthesize(&self, text: &str, _voice: &VoiceParams, key: &str) -> VoiceResult<Vec<u8>> {
        let call = {
            let mut calls = self.rig.synthesized.lock().unwrap();
            calls.push((text.to_string(), key.to_string()));
            calls.len()
        };
        if let Some((gate, free)) = &self.gate {
            if call > *free {
                gate.acquire().await.unwrap().forget();
            }
        }
        if text.contains("fail") {
            return Err(VoiceError::SynthesisUnavailable("HTTP 500".into()));
        }
        Ok(text.as_bytes().to_vec())
    }
}

/// Ten samples per byte at 1 kHz: a sentence of n bytes plays for 10n ms.
pub struct TextDecoder;

impl AudioDecoder for TextDecoder {
    fn decode(&self, bytes: &[u8]) -> VoiceResult<AudioBuffer> {
        Ok(AudioBuffer::new(vec![0.5; bytes.len() * 10], 1000, 1))
    }
}

pub fn samples_for(sentence: &str) -> usize {
    sentence.len() * 10
}

pub fn utterances() -> (OnUtterance, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let on_utterance: OnUtterance = Arc::new(move |utterance: Utterance| {
        let _ = tx.send(utterance.text);
    });
    (on_utterance, rx)
}

/// Poll `cond` on simulated time until it holds.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
