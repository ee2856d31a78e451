//! Session configuration loaded from the environment.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | MENTOR_SILENCE_MS | 1200 | Silence after the last recognition event before an utterance is finalized. |
//! | MENTOR_SENTENCE_PAUSE_MS | 200 | Pause inserted between spoken sentences. |
//! | MENTOR_TELEMETRY_INTERVAL_MS | 50 | Output level sampling period. |
//! | MENTOR_OUTPUT_GAIN | 1.0 | Gain applied after level analysis. |
//! | MENTOR_TTS_URL | (required for HTTP TTS) | Synthesis endpoint. |
//! | MENTOR_TTS_API_KEYS | (empty) | Comma-separated key pool, rotated round-robin. |
//! | MENTOR_TTS_VOICE / _STYLE / _RATE / _SAMPLE_RATE / _FORMAT | see `VoiceParams` | Fixed voice parameters. |
//! | MENTOR_TTS_TIMEOUT_SECS | 15 | Bound on a single synthesis request. |
//! | MENTOR_MIC_SAMPLE_RATE | 16000 | Recognizer rate (8000/16000/32000/48000). |
//! | MENTOR_MIC_FRAME_SAMPLES | 480 | VAD frame (10, 20 or 30 ms). |
//! | MENTOR_MIC_VAD_MODE | 2 | WebRTC VAD aggressiveness, 0-3. |
//! | MENTOR_MIC_PHRASE_GAP_MS | 600 | Trailing silence that closes a phrase. |
//! | MENTOR_MIC_MIN_PHRASE_MS | 200 | Shorter phrases are dropped. |
//! | MENTOR_MIC_MAX_PHRASE_MS | 30000 | Longer phrases are cut. |
//! | MENTOR_MIC_ACTIVITY_MS | 300 | Period of activity events while speech or text is pending. |
//! | STT_API_URL | https://api.openai.com/v1 | OpenAI-compatible transcription base URL. |
//! | STT_API_KEY | (required; falls back to OPENROUTER_API_KEY) | Bearer key. |
//! | STT_MODEL | whisper-1 | Transcription model. |
//! | STT_TIMEOUT_SECS | 30 | Bound on one transcription request. |

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_silence_ms() -> u64 {
    1200
}

fn default_sentence_pause_ms() -> u64 {
    200
}

fn default_telemetry_interval_ms() -> u64 {
    50
}

fn default_output_gain() -> f32 {
    1.0
}

fn default_timeout_secs() -> u64 {
    15
}

/// Timing knobs for one voice session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Silence after the last recognition event that ends an utterance.
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,
    /// Pause between consecutive sentences during playback.
    #[serde(default = "default_sentence_pause_ms")]
    pub sentence_pause_ms: u64,
    /// How often the output level is sampled for the UI.
    #[serde(default = "default_telemetry_interval_ms")]
    pub telemetry_interval_ms: u64,
    /// Output gain (post-analysis), 0.0..=2.0.
    #[serde(default = "default_output_gain")]
    pub output_gain: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            silence_ms: default_silence_ms(),
            sentence_pause_ms: default_sentence_pause_ms(),
            telemetry_interval_ms: default_telemetry_interval_ms(),
            output_gain: default_output_gain(),
        }
    }
}

impl SessionConfig {
    /// Load from environment. Unset or unparsable values fall back to defaults.
    pub fn from_env() -> Self {
        Self {
            silence_ms: env_parse("MENTOR_SILENCE_MS", default_silence_ms()),
            sentence_pause_ms: env_parse("MENTOR_SENTENCE_PAUSE_MS", default_sentence_pause_ms()),
            telemetry_interval_ms: env_parse(
                "MENTOR_TELEMETRY_INTERVAL_MS",
                default_telemetry_interval_ms(),
            ),
            output_gain: env_parse("MENTOR_OUTPUT_GAIN", default_output_gain()).clamp(0.0, 2.0),
        }
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }

    pub fn sentence_pause(&self) -> Duration {
        Duration::from_millis(self.sentence_pause_ms)
    }

    pub fn telemetry_interval(&self) -> Duration {
        // A zero period would make tokio's interval panic.
        Duration::from_millis(self.telemetry_interval_ms.max(1))
    }
}

/// Fixed voice parameters sent with every synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceParams {
    pub voice_id: String,
    pub style: String,
    /// Relative speaking rate; 0 is the voice's natural pace.
    pub rate: i32,
    pub sample_rate: u32,
    pub format: String,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice_id: "en-US-natalie".to_string(),
            style: "Conversational".to_string(),
            rate: 0,
            sample_rate: 24000,
            format: "MP3".to_string(),
        }
    }
}

/// Configuration for the HTTP synthesis backend and its key pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub voice: VoiceParams,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl TtsConfig {
    /// Build from `MENTOR_TTS_*` variables. An empty key pool is allowed here;
    /// synthesis then fails per sentence with `NoCredentials`.
    pub fn from_env() -> VoiceResult<Self> {
        let endpoint = env_opt_string("MENTOR_TTS_URL")
            .ok_or_else(|| VoiceError::Config("TTS requires MENTOR_TTS_URL".to_string()))?;
        let defaults = VoiceParams::default();
        let voice = VoiceParams {
            voice_id: env_opt_string("MENTOR_TTS_VOICE").unwrap_or(defaults.voice_id),
            style: env_opt_string("MENTOR_TTS_STYLE").unwrap_or(defaults.style),
            rate: env_parse("MENTOR_TTS_RATE", defaults.rate),
            sample_rate: env_parse("MENTOR_TTS_SAMPLE_RATE", defaults.sample_rate),
            format: env_opt_string("MENTOR_TTS_FORMAT").unwrap_or(defaults.format),
        };
        Ok(Self {
            endpoint,
            api_keys: env_list("MENTOR_TTS_API_KEYS"),
            voice,
            timeout_secs: env_parse("MENTOR_TTS_TIMEOUT_SECS", default_timeout_secs()),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_mic_sample_rate() -> u32 {
    16000
}

fn default_frame_samples() -> usize {
    480
}

fn default_vad_mode() -> u8 {
    2
}

fn default_phrase_gap_ms() -> u64 {
    600
}

fn default_min_phrase_ms() -> u64 {
    200
}

fn default_max_phrase_ms() -> u64 {
    30_000
}

fn default_activity_ms() -> u64 {
    300
}

/// Native microphone recognizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicConfig {
    #[serde(default = "default_mic_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_frame_samples")]
    pub frame_samples: usize,
    #[serde(default = "default_vad_mode")]
    pub vad_mode: u8,
    #[serde(default = "default_phrase_gap_ms")]
    pub phrase_gap_ms: u64,
    #[serde(default = "default_min_phrase_ms")]
    pub min_phrase_ms: u64,
    #[serde(default = "default_max_phrase_ms")]
    pub max_phrase_ms: u64,
    /// Activity events keep the session's silence window open while a phrase
    /// is being spoken or transcribed.
    #[serde(default = "default_activity_ms")]
    pub activity_ms: u64,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_mic_sample_rate(),
            frame_samples: default_frame_samples(),
            vad_mode: default_vad_mode(),
            phrase_gap_ms: default_phrase_gap_ms(),
            min_phrase_ms: default_min_phrase_ms(),
            max_phrase_ms: default_max_phrase_ms(),
            activity_ms: default_activity_ms(),
        }
    }
}

impl MicConfig {
    pub fn from_env() -> Self {
        Self {
            sample_rate: env_parse("MENTOR_MIC_SAMPLE_RATE", default_mic_sample_rate()),
            frame_samples: env_parse("MENTOR_MIC_FRAME_SAMPLES", default_frame_samples()),
            vad_mode: env_parse("MENTOR_MIC_VAD_MODE", default_vad_mode()),
            phrase_gap_ms: env_parse("MENTOR_MIC_PHRASE_GAP_MS", default_phrase_gap_ms()),
            min_phrase_ms: env_parse("MENTOR_MIC_MIN_PHRASE_MS", default_min_phrase_ms()),
            max_phrase_ms: env_parse("MENTOR_MIC_MAX_PHRASE_MS", default_max_phrase_ms()),
            activity_ms: env_parse("MENTOR_MIC_ACTIVITY_MS", default_activity_ms()),
        }
    }

    pub fn frame_ms(&self) -> u64 {
        (self.frame_samples as u64 * 1000) / self.sample_rate.max(1) as u64
    }

    pub fn phrase_gap(&self) -> Duration {
        Duration::from_millis(self.phrase_gap_ms)
    }

    pub fn min_phrase(&self) -> Duration {
        Duration::from_millis(self.min_phrase_ms)
    }

    pub fn max_phrase(&self) -> Duration {
        Duration::from_millis(self.max_phrase_ms)
    }

    /// Frames between two activity events (at least one).
    pub fn activity_frames(&self) -> u64 {
        (self.activity_ms / self.frame_ms().max(1)).max(1)
    }
}

fn default_stt_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_stt_model() -> String {
    "whisper-1".to_string()
}

fn default_stt_timeout_secs() -> u64 {
    30
}

/// OpenAI-compatible phrase transcription endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    #[serde(default = "default_stt_url")]
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_stt_model")]
    pub model: String,
    #[serde(default = "default_stt_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for TranscriberConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriberConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl TranscriberConfig {
    /// STT_API_URL, STT_API_KEY (or OPENROUTER_API_KEY), STT_MODEL, STT_TIMEOUT_SECS.
    pub fn from_env() -> VoiceResult<Self> {
        let api_key = env_opt_string("STT_API_KEY")
            .or_else(|| env_opt_string("OPENROUTER_API_KEY"))
            .ok_or_else(|| {
                VoiceError::Config("STT requires STT_API_KEY or OPENROUTER_API_KEY".to_string())
            })?;
        Ok(Self {
            base_url: env_opt_string("STT_API_URL").unwrap_or_else(default_stt_url),
            api_key,
            model: env_opt_string("STT_MODEL").unwrap_or_else(default_stt_model),
            timeout_secs: env_parse("STT_TIMEOUT_SECS", default_stt_timeout_secs()),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub(crate) fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_opt_string(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list; blanks dropped, order kept.
pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|v| parse_list(&v))
        .unwrap_or_default()
}
