//! **ChatSessionBinding** - wires a voice session to the conversation.
//!
//! Finalized utterances go to a `ReplyGenerator`; replies are spoken back and
//! both sides are written to a `TranscriptSink`. A failed reply never ends the
//! session: the binding either speaks a fallback line or sends the session back
//! to listening. Replies are tied to the turn they answer, so one that arrives
//! after the user has barged in or said something new is dropped. Typed text is
//! answered on its own task so it never holds up a spoken turn; it is recorded
//! but not spoken.

use crate::config::{env_opt_string, SessionConfig};
use crate::error::{VoiceError, VoiceResult};
use crate::session::{
    OnUtterance, SessionController, SessionHandle, SessionState, Utterance, VoiceCapabilities,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_CHAT_URL: &str = "http://127.0.0.1:8000/api/v1/chat";

/// Produces the assistant's reply to one user message.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn reply(&self, text: &str) -> VoiceResult<String>;
}

/// Chat endpoint speaking `{"prompt", "stream": false}` → `{"response"}`.
#[derive(Debug, Clone)]
pub struct HttpReplyGenerator {
    url: String,
    client: reqwest::Client,
}

impl HttpReplyGenerator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Reply(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// MENTOR_CHAT_URL (default local gateway), MENTOR_CHAT_TIMEOUT_SECS (default 60).
    pub fn from_env() -> VoiceResult<Self> {
        let url = env_opt_string("MENTOR_CHAT_URL").unwrap_or_else(|| DEFAULT_CHAT_URL.to_string());
        let secs = env_opt_string("MENTOR_CHAT_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);
        Self::new(url, Duration::from_secs(secs))
    }
}

#[async_trait]
impl ReplyGenerator for HttpReplyGenerator {
    async fn reply(&self, text: &str) -> VoiceResult<String> {
        let body = serde_json::json!({ "prompt": text, "stream": false });
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Reply(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VoiceError::Reply(format!("chat endpoint returned {}", resp.status())));
        }
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| VoiceError::Reply(e.to_string()))?;
        json.get("response")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| VoiceError::Reply("response field missing".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn now(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Write-only destination for finalized conversation text.
pub trait TranscriptSink: Send + Sync {
    fn record(&self, entry: TranscriptEntry);
}

/// Keeps the transcript in memory.
#[derive(Debug, Default)]
pub struct MemoryTranscript {
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl MemoryTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

impl TranscriptSink for MemoryTranscript {
    fn record(&self, entry: TranscriptEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

/// Logs each entry as a structured line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTranscript;

impl TranscriptSink for TracingTranscript {
    fn record(&self, entry: TranscriptEntry) {
        let line = serde_json::to_string(&entry).unwrap_or_else(|_| entry.text.clone());
        info!(target: "mentor::transcript", "{}", line);
    }
}

/// What a running binding hands back.
pub struct BoundSession {
    handle: SessionHandle,
    typed: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl BoundSession {
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Typed chat input: answered and recorded, not spoken.
    pub fn send_text(&self, text: impl Into<String>) -> VoiceResult<()> {
        self.typed
            .send(text.into())
            .map_err(|_| VoiceError::SessionClosed)
    }

    /// Wait for the session to end on its own (or via `handle().end()`).
    pub async fn wait(self) -> VoiceResult<()> {
        let result = self.handle.join().await;
        drop(self.typed);
        let _ = self.task.await;
        result
    }

    /// End the session and wait for everything to wind down.
    pub async fn finish(self) -> VoiceResult<()> {
        self.handle.end();
        self.wait().await
    }
}

pub struct ChatSessionBinding {
    generator: Arc<dyn ReplyGenerator>,
    transcript: Arc<dyn TranscriptSink>,
    fallback: Option<String>,
}

impl ChatSessionBinding {
    pub fn new(generator: Arc<dyn ReplyGenerator>, transcript: Arc<dyn TranscriptSink>) -> Self {
        Self {
            generator,
            transcript,
            fallback: None,
        }
    }

    /// Speak `reply` when generation fails instead of silently resuming listening.
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into()).filter(|r| !r.trim().is_empty());
        self
    }

    /// Start a voice session and drive it until it ends.
    pub fn start(
        self,
        config: SessionConfig,
        caps: VoiceCapabilities,
        greeting: impl Into<String>,
    ) -> VoiceResult<BoundSession> {
        let greeting = greeting.into();
        let (utterance_tx, utterances) = mpsc::unbounded_channel::<Utterance>();
        let on_utterance: OnUtterance = Arc::new(move |utterance| {
            let _ = utterance_tx.send(utterance);
        });
        let handle = SessionController::start(config, caps, greeting.clone(), on_utterance)?;
        if !greeting.trim().is_empty() {
            self.transcript
                .record(TranscriptEntry::now(Role::Assistant, greeting));
        }

        let (typed, typed_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Arc::new(self).run(handle.clone(), utterances, typed_rx));
        Ok(BoundSession {
            handle,
            typed,
            task,
        })
    }

    async fn run(
        self: Arc<Self>,
        handle: SessionHandle,
        mut utterances: mpsc::UnboundedReceiver<Utterance>,
        typed: mpsc::UnboundedReceiver<String>,
    ) {
        let typed_task = tokio::spawn(Arc::clone(&self).answer_typed(typed));

        let mut in_flight: Option<JoinHandle<()>> = None;
        while let Some(utterance) = utterances.recv().await {
            // A newer utterance means the older turn is over.
            if let Some(previous) = in_flight.take() {
                previous.abort();
            }
            in_flight = Some(tokio::spawn(
                Arc::clone(&self).on_utterance(handle.clone(), utterance),
            ));
        }
        if let Some(previous) = in_flight {
            previous.abort();
        }
        let _ = typed_task.await;
        debug!("chat binding finished");
    }

    /// Still processing `turn`: the reply is wanted.
    fn is_current(handle: &SessionHandle, turn: u64) -> bool {
        let telemetry = handle.telemetry();
        telemetry.state == SessionState::Processing && telemetry.turn == turn
    }

    async fn on_utterance(self: Arc<Self>, handle: SessionHandle, utterance: Utterance) {
        let Utterance { turn, text } = utterance;
        info!("🗣️ User: {}", text);
        self.transcript.record(TranscriptEntry::now(Role::User, text.as_str()));

        let reply = self.generator.reply(&text).await;
        if !Self::is_current(&handle, turn) {
            debug!("turn {} moved on while the reply was generated; dropping it", turn);
            return;
        }
        let spoken = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Reply generation failed: {}", e);
                match &self.fallback {
                    Some(fallback) => fallback.clone(),
                    None => {
                        let _ = handle.resume_listening_after(turn);
                        return;
                    }
                }
            }
        };
        self.transcript
            .record(TranscriptEntry::now(Role::Assistant, spoken.as_str()));
        if handle.answer(turn, spoken).is_err() {
            debug!("session closed before the reply could be spoken");
        }
    }

    async fn answer_typed(self: Arc<Self>, mut typed: mpsc::UnboundedReceiver<String>) {
        while let Some(text) = typed.recv().await {
            if text.trim().is_empty() {
                continue;
            }
            self.transcript.record(TranscriptEntry::now(Role::User, text.as_str()));
            match self.generator.reply(&text).await {
                Ok(reply) => self
                    .transcript
                    .record(TranscriptEntry::now(Role::Assistant, reply)),
                Err(e) => warn!("Typed reply failed: {}", e),
            }
        }
    }
}
