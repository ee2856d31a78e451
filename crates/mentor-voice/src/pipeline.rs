//! **SynthesisPipeline** - reply text in, decoded sentence buffers out.
//!
//! Holds an ordered text queue and an ordered audio queue. At most one synthesis
//! request is in flight; as soon as it resolves (either way) the next sentence is
//! fetched, so later sentences are synthesized while earlier ones play. Decoding
//! is part of the fetch and runs on the blocking pool, off the session task. A
//! sentence that fails to synthesize or decode is dropped and the pump moves on.

use crate::decode::{AudioBuffer, AudioDecoder};
use crate::error::{VoiceError, VoiceResult};
use crate::sentences::split_sentences;
use crate::synthesis::SynthesisClient;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct SynthesisPipeline {
    client: Arc<SynthesisClient>,
    decoder: Arc<dyn AudioDecoder>,
    text_queue: VecDeque<String>,
    audio_queue: VecDeque<AudioBuffer>,
    in_flight: Option<BoxFuture<'static, VoiceResult<AudioBuffer>>>,
}

async fn fetch_sentence(
    client: Arc<SynthesisClient>,
    decoder: Arc<dyn AudioDecoder>,
    sentence: String,
) -> VoiceResult<AudioBuffer> {
    let bytes = client.synthesize(&sentence).await?;
    tokio::task::spawn_blocking(move || decoder.decode(&bytes))
        .await
        .map_err(|e| VoiceError::DecodeFailure(format!("decode task failed: {}", e)))?
}

impl SynthesisPipeline {
    pub fn new(client: Arc<SynthesisClient>, decoder: Arc<dyn AudioDecoder>) -> Self {
        Self {
            client,
            decoder,
            text_queue: VecDeque::new(),
            audio_queue: VecDeque::new(),
            in_flight: None,
        }
    }

    /// Split `reply` into sentences, queue them and start fetching.
    /// Returns how many sentences were queued.
    pub fn enqueue_reply(&mut self, reply: &str) -> usize {
        let segments = split_sentences(reply);
        let count = segments.len();
        self.text_queue.extend(segments);
        debug!("queued {} sentence(s), {} pending", count, self.text_queue.len());
        self.pump();
        count
    }

    /// Start the next fetch unless one is already running.
    pub fn pump(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(sentence) = self.text_queue.pop_front() else {
            return;
        };
        self.in_flight = Some(Box::pin(fetch_sentence(
            Arc::clone(&self.client),
            Arc::clone(&self.decoder),
            sentence,
        )));
    }

    /// Resolves when the in-flight fetch finishes; pending forever when idle.
    /// Cancel-safe: dropping this future leaves the fetch in place.
    pub async fn fetched(&mut self) -> VoiceResult<AudioBuffer> {
        let Some(fetch) = self.in_flight.as_mut() else {
            return std::future::pending().await;
        };
        let result = fetch.await;
        self.in_flight = None;
        result
    }

    /// Queue a finished fetch, then pump the next sentence.
    /// Returns `true` when a buffer was added to the audio queue.
    pub fn complete_fetch(&mut self, result: VoiceResult<AudioBuffer>) -> bool {
        let queued = match result {
            Ok(buffer) => {
                debug!("sentence ready ({:?})", buffer.duration());
                self.audio_queue.push_back(buffer);
                true
            }
            Err(e) if e.is_per_sentence() => {
                warn!("Skipping sentence: {}", e);
                false
            }
            Err(e) => {
                error!("Skipping sentence after unexpected failure: {}", e);
                false
            }
        };
        self.pump();
        queued
    }

    /// Next buffer to play, in sentence order.
    pub fn pop_audio(&mut self) -> Option<AudioBuffer> {
        self.audio_queue.pop_front()
    }

    /// Drop everything not yet played, including the in-flight fetch.
    pub fn clear(&mut self) {
        self.text_queue.clear();
        self.audio_queue.clear();
        self.in_flight = None;
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn pending_text(&self) -> usize {
        self.text_queue.len()
    }

    pub fn queued_audio(&self) -> usize {
        self.audio_queue.len()
    }

    /// Nothing left to fetch, decode or play.
    pub fn is_drained(&self) -> bool {
        self.text_queue.is_empty() && self.audio_queue.is_empty() && self.in_flight.is_none()
    }
}
