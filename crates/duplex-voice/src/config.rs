use serde::{Deserialize, Serialize};
use std::fmt;

fn default_stt_url() -> String {
    "wss://api.deepgram.com/v1/listen".to_string()
}

fn default_sample_rate() -> u32 {
    duplex_types::DEFAULT_SAMPLE_RATE
}

fn default_endpointing_ms() -> u32 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_llm_url() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "openai/gpt-oss-20b".to_string()
}

fn default_max_tokens() -> u32 {
    150
}

fn default_temperature() -> f32 {
    0.7
}

fn default_tts_url() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_tts_model() -> String {
    "eleven_turbo_v2_5".to_string()
}

fn default_output_format() -> String {
    "mp3_44100_128".to_string()
}

/// Streaming speech-to-text settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Live transcription WebSocket endpoint.
    #[serde(default = "default_stt_url")]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Optional provider model name.
    #[serde(default)]
    pub model: Option<String>,
    /// Sample rate of the linear16 uplink, in Hz.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Trailing silence (ms) after which the provider finalizes an utterance.
    #[serde(default = "default_endpointing_ms")]
    pub endpointing_ms: u32,
    /// Transcripts below this confidence are dropped.
    #[serde(default)]
    pub confidence_threshold: f32,
    #[serde(default = "default_true")]
    pub interim_results: bool,
    #[serde(default = "default_true")]
    pub punctuate: bool,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            url: default_stt_url(),
            api_key: String::new(),
            model: None,
            sample_rate: default_sample_rate(),
            endpointing_ms: default_endpointing_ms(),
            confidence_threshold: 0.0,
            interim_results: true,
            punctuate: true,
        }
    }
}

impl fmt::Debug for SttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SttConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("sample_rate", &self.sample_rate)
            .field("endpointing_ms", &self.endpointing_ms)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("interim_results", &self.interim_results)
            .field("punctuate", &self.punctuate)
            .finish()
    }
}

/// OpenAI-compatible chat completion settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            api_key: String::new(),
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// Streaming text-to-speech settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// API base URL; the voice-specific stream path is appended.
    #[serde(default = "default_tts_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_tts_model")]
    pub model_id: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    /// Provider latency optimization level (0-4). Omitted when unset.
    #[serde(default)]
    pub optimize_streaming_latency: Option<u8>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: default_tts_url(),
            api_key: String::new(),
            model_id: default_tts_model(),
            output_format: default_output_format(),
            optimize_streaming_latency: None,
        }
    }
}

impl fmt::Debug for TtsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtsConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model_id", &self.model_id)
            .field("output_format", &self.output_format)
            .field("optimize_streaming_latency", &self.optimize_streaming_latency)
            .finish()
    }
}
