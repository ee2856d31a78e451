//! Example: a live mentoring session
//!
//! Talks to the default microphone and speaker, transcribes with an
//! OpenAI-compatible STT endpoint, answers through a chat endpoint and speaks
//! the reply through the configured TTS endpoint.
//!
//! ```text
//! MENTOR_TTS_URL=... MENTOR_TTS_API_KEYS=k1,k2 STT_API_KEY=... \
//!     cargo run -p mentor-voice --example voice_session_demo
//! ```

use mentor_voice::{
    ChatSessionBinding, HttpReplyGenerator, HttpTranscriber, MicConfig, MicRecognizer,
    RodioDecoder, RodioOutput, SessionConfig, SynthesisClient, TracingTranscript, TtsConfig,
    VoiceCapabilities,
};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

const GREETING: &str = "Hi, I'm your career mentor. What would you like to work on today?";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🎤 Mentor voice session");
    info!("Press Ctrl+C to stop.");

    let tts = TtsConfig::from_env()?;
    info!(target: "mentor::voice", "TTS: {} ({} key(s))", tts.endpoint, tts.api_keys.len());
    let caps = VoiceCapabilities {
        recognizer: Box::new(MicRecognizer::new(
            MicConfig::from_env(),
            Arc::new(HttpTranscriber::from_env()?),
        )),
        synthesis: Arc::new(SynthesisClient::from_config(&tts)?),
        decoder: Arc::new(RodioDecoder),
        output: Box::new(RodioOutput::new()),
    };

    let binding = ChatSessionBinding::new(
        Arc::new(HttpReplyGenerator::from_env()?),
        Arc::new(TracingTranscript),
    )
    .with_fallback("Sorry, I couldn't reach the mentor just now. Could you say that again?");
    let session = binding.start(SessionConfig::from_env(), caps, GREETING)?;

    let mut telemetry = session.handle().telemetry_stream();
    let watcher = tokio::spawn(async move {
        let mut last = None;
        while let Some(t) = telemetry.next().await {
            if last != Some(t.state) {
                info!("state: {}", t.state.as_str());
                last = Some(t.state);
            }
        }
    });

    let handle = session.handle().clone();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("👋 Stopping");
            session.finish().await?;
        }
        result = handle.join() => result?,
    }
    watcher.abort();
    Ok(())
}
