use serde::{Deserialize, Serialize};
use std::fmt;

fn default_realtime_url() -> String {
    "wss://api.openai.com/v1/realtime".to_string()
}

fn default_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_audio_format() -> String {
    "g711_ulaw".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

/// Server-side voice activity detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetectionConfig {
    /// Activation threshold in `[0, 1]`; higher needs louder speech.
    #[serde(default = "default_vad_threshold")]
    pub threshold: f32,
    /// Audio kept from before speech onset, in milliseconds.
    #[serde(default = "default_prefix_padding_ms")]
    pub prefix_padding_ms: u32,
    /// Silence that ends the caller's turn, in milliseconds.
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u32,
}

fn default_vad_threshold() -> f32 {
    0.5
}

fn default_prefix_padding_ms() -> u32 {
    300
}

fn default_silence_duration_ms() -> u32 {
    500
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            threshold: default_vad_threshold(),
            prefix_padding_ms: default_prefix_padding_ms(),
            silence_duration_ms: default_silence_duration_ms(),
        }
    }
}

/// Realtime AI engine connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_realtime_url")]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Codec used in both directions; telephony audio is 8 kHz μ-law.
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
    #[serde(default)]
    pub turn_detection: TurnDetectionConfig,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            api_key: String::new(),
            model: default_model(),
            voice: default_voice(),
            audio_format: default_audio_format(),
            turn_detection: TurnDetectionConfig::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("audio_format", &self.audio_format)
            .field("turn_detection", &self.turn_detection)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

impl RealtimeConfig {
    /// The websocket endpoint with the model selected.
    pub fn endpoint(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}model={}", self.url, separator, self.model)
    }
}

/// Biomarker scorer connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiomarkerConfig {
    /// Websocket ingest URL. Empty disables the biomarker stream.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for BiomarkerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl BiomarkerConfig {
    pub fn is_enabled(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_api_key() {
        let config = RealtimeConfig {
            api_key: "sk-secret".to_string(),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn endpoint_appends_model() {
        let mut config = RealtimeConfig::default();
        config.url = "wss://engine.test/v1/realtime".to_string();
        config.model = "m1".to_string();
        assert_eq!(config.endpoint(), "wss://engine.test/v1/realtime?model=m1");

        config.url = "wss://engine.test/rt?region=eu".to_string();
        assert_eq!(config.endpoint(), "wss://engine.test/rt?region=eu&model=m1");
    }

    #[test]
    fn empty_biomarker_url_disables_stream() {
        assert!(!BiomarkerConfig::default().is_enabled());
        let enabled = BiomarkerConfig {
            url: "ws://127.0.0.1:9091/ingest".to_string(),
            connect_timeout_ms: 1_000,
        };
        assert!(enabled.is_enabled());
    }
}
