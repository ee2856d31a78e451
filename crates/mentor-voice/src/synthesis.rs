//! **Synthesis** - one sentence of text in, one encoded audio payload out.
//!
//! `TtsBackend` is the vendor seam; `SynthesisClient` adds key rotation and the
//! per-request timeout and normalizes every failure into a per-sentence error the
//! pipeline can skip.

use crate::config::{TtsConfig, VoiceParams};
use crate::error::{VoiceError, VoiceResult};
use crate::keys::KeyRotator;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Backend that turns one sentence into encoded audio bytes (MP3/WAV/...).
#[async_trait]
pub trait TtsBackend: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceParams,
        api_key: &str,
    ) -> VoiceResult<Vec<u8>>;
}

/// Placeholder TTS: returns an empty payload, so every sentence is skipped.
/// Lets a session run end-to-end without a synthesis account.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

#[async_trait]
impl TtsBackend for PlaceholderTts {
    async fn synthesize(&self, _text: &str, _voice: &VoiceParams, _key: &str) -> VoiceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechRequest<'a> {
    text: &'a str,
    #[serde(flatten)]
    voice: &'a VoiceParams,
    encode_as_base64: bool,
}

/// JSON fields known to carry base64 audio, in lookup order.
const AUDIO_FIELDS: [&str; 3] = ["encodedAudio", "audioContent", "audio"];

/// HTTP synthesis backend: one POST per sentence, key in the `api-key` header.
/// Accepts either a raw audio body or JSON carrying base64 audio.
#[derive(Debug, Clone)]
pub struct HttpTts {
    pub endpoint: String,
    client: reqwest::Client,
}

impl HttpTts {
    pub fn new(endpoint: impl Into<String>) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| VoiceError::Config(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl TtsBackend for HttpTts {
    async fn synthesize(&self, text: &str, voice: &VoiceParams, api_key: &str) -> VoiceResult<Vec<u8>> {
        let body = SpeechRequest {
            text,
            voice,
            encode_as_base64: true,
        };
        let res = self
            .client
            .post(&self.endpoint)
            .header("api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::SynthesisUnavailable(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::SynthesisUnavailable(format!(
                "TTS API error {}: {}",
                status, body
            )));
        }
        let content_type = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let bytes = res
            .bytes()
            .await
            .map_err(|e| VoiceError::SynthesisUnavailable(e.to_string()))?;
        extract_audio(&content_type, &bytes)
    }
}

/// Pull audio out of a synthesis response body.
fn extract_audio(content_type: &str, body: &[u8]) -> VoiceResult<Vec<u8>> {
    let is_json = content_type.contains("json")
        || (content_type.is_empty() && body.first() == Some(&b'{'));
    if !is_json {
        return Ok(body.to_vec());
    }
    let json: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| VoiceError::SynthesisUnavailable(format!("malformed response: {}", e)))?;
    let encoded = AUDIO_FIELDS
        .iter()
        .find_map(|field| json.get(*field).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| VoiceError::SynthesisUnavailable("response carried no audio".to_string()))?;
    // Tolerate data URLs ("data:audio/mpeg;base64,...").
    let encoded = encoded
        .split_once(";base64,")
        .map(|(_, data)| data)
        .unwrap_or(encoded);
    general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| VoiceError::DecodeFailure(format!("invalid base64 audio: {}", e)))
}

/// Sentence-level synthesis: rotates keys, bounds each request, never retries.
pub struct SynthesisClient {
    keys: KeyRotator,
    backend: Arc<dyn TtsBackend>,
    voice: VoiceParams,
    timeout: Duration,
}

impl SynthesisClient {
    pub fn new(
        keys: KeyRotator,
        backend: Arc<dyn TtsBackend>,
        voice: VoiceParams,
        timeout: Duration,
    ) -> Self {
        Self {
            keys,
            backend,
            voice,
            timeout,
        }
    }

    /// HTTP client built from a `TtsConfig`.
    pub fn from_config(config: &TtsConfig) -> VoiceResult<Self> {
        let backend = HttpTts::new(config.endpoint.clone())?;
        Ok(Self::new(
            KeyRotator::new(config.api_keys.clone()),
            Arc::new(backend),
            config.voice.clone(),
            config.timeout(),
        ))
    }

    pub async fn synthesize(&self, sentence: &str) -> VoiceResult<Vec<u8>> {
        let key = self.keys.next_key().ok_or(VoiceError::NoCredentials)?;
        debug!("synthesizing {} chars", sentence.len());
        let call = self.backend.synthesize(sentence, &self.voice, key);
        match tokio::time::timeout(self.timeout, call).await {
            Err(_) => Err(VoiceError::SynthesisUnavailable(format!(
                "timed out after {:?}",
                self.timeout
            ))),
            Ok(Ok(bytes)) if bytes.is_empty() => Err(VoiceError::SynthesisUnavailable(
                "empty audio payload".to_string(),
            )),
            Ok(result) => result,
        }
    }
}

impl std::fmt::Debug for SynthesisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisClient")
            .field("keys", &self.keys)
            .field("voice", &self.voice)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingTts {
        keys_seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TtsBackend for RecordingTts {
        async fn synthesize(&self, text: &str, _v: &VoiceParams, key: &str) -> VoiceResult<Vec<u8>> {
            self.keys_seen.lock().unwrap().push(key.to_string());
            if text.contains("fail") {
                return Err(VoiceError::SynthesisUnavailable("503".into()));
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    struct HangingTts;

    #[async_trait]
    impl TtsBackend for HangingTts {
        async fn synthesize(&self, _t: &str, _v: &VoiceParams, _k: &str) -> VoiceResult<Vec<u8>> {
            std::future::pending::<VoiceResult<Vec<u8>>>().await
        }
    }

    fn client(keys: &[&str], backend: Arc<dyn TtsBackend>) -> SynthesisClient {
        SynthesisClient::new(
            KeyRotator::new(keys.iter().map(|k| k.to_string()).collect()),
            backend,
            VoiceParams::default(),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn no_keys_is_no_credentials() {
        let c = client(&[], Arc::new(PlaceholderTts));
        assert!(matches!(c.synthesize("Hi.").await, Err(VoiceError::NoCredentials)));
    }

    #[tokio::test]
    async fn empty_payload_is_unavailable() {
        let c = client(&["k"], Arc::new(PlaceholderTts));
        assert!(matches!(
            c.synthesize("Hi.").await,
            Err(VoiceError::SynthesisUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn failed_key_is_not_skipped() {
        let backend = Arc::new(RecordingTts {
            keys_seen: Mutex::new(Vec::new()),
        });
        let c = client(&["a", "b"], backend.clone());
        assert!(c.synthesize("fail").await.is_err());
        assert!(c.synthesize("ok").await.is_ok());
        assert!(c.synthesize("ok").await.is_ok());
        assert_eq!(*backend.keys_seen.lock().unwrap(), vec!["a", "b", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_request_times_out() {
        let c = client(&["k"], Arc::new(HangingTts));
        let err = c.synthesize("Hello.").await.unwrap_err();
        assert!(matches!(err, VoiceError::SynthesisUnavailable(ref m) if m.contains("timed out")));
    }

    #[test]
    fn raw_audio_body_passes_through() {
        let out = extract_audio("audio/mpeg", b"ID3\x03").unwrap();
        assert_eq!(out, b"ID3\x03");
    }

    #[test]
    fn base64_json_body_is_decoded() {
        let body = br#"{"encodedAudio":"aGVsbG8=","audioLengthInSeconds":0.4}"#;
        assert_eq!(extract_audio("application/json", body).unwrap(), b"hello");
        let data_url = br#"{"audioContent":"data:audio/mpeg;base64,aGVsbG8="}"#;
        assert_eq!(extract_audio("", data_url).unwrap(), b"hello");
    }

    #[test]
    fn json_without_audio_is_unavailable() {
        let err = extract_audio("application/json", br#"{"error":"quota"}"#).unwrap_err();
        assert!(matches!(err, VoiceError::SynthesisUnavailable(_)));
        let err = extract_audio("application/json", br#"{"encodedAudio":"@@@"}"#).unwrap_err();
        assert!(matches!(err, VoiceError::DecodeFailure(_)));
    }

    #[test]
    fn request_body_shape() {
        let voice = VoiceParams::default();
        let body = serde_json::to_value(SpeechRequest {
            text: "Hi.",
            voice: &voice,
            encode_as_base64: true,
        })
        .unwrap();
        assert_eq!(body["text"], "Hi.");
        assert_eq!(body["voiceId"], "en-US-natalie");
        assert_eq!(body["sampleRate"], 24000);
        assert_eq!(body["encodeAsBase64"], true);
    }
}
