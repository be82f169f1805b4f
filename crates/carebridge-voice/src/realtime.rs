//! Realtime AI engine event shapes.
//!
//! Client events are what the bridge sends; server events are what the
//! engine sends back. Only the server events the bridge acts on are
//! modelled. Everything else decodes to [`ServerEvent::Other`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RealtimeConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientEvent {
    pub fn to_json(&self) -> String {
        // Serializing these plain structs cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Caller audio, already base64-encoded by the transport.
    pub fn append_audio(payload: impl Into<String>) -> Self {
        Self::InputAudioBufferAppend {
            audio: payload.into(),
        }
    }

    /// The result of a tool invocation, keyed by the engine's call id.
    pub fn tool_output(call_id: impl Into<String>, output: &Value) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.to_string(),
            },
        }
    }

    /// An out-of-band instruction the model should act on in its next turn.
    pub fn system_message(text: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem::Message {
                role: "system".to_string(),
                content: vec![ContentPart::InputText { text: text.into() }],
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionConfig {
    pub instructions: String,
    pub voice: String,
    pub modalities: Vec<String>,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub turn_detection: TurnDetection,
    pub tools: Vec<ToolDeclaration>,
    pub tool_choice: String,
}

impl SessionConfig {
    pub fn new(
        config: &RealtimeConfig,
        instructions: String,
        tools: Vec<ToolDeclaration>,
    ) -> Self {
        Self {
            instructions,
            voice: config.voice.clone(),
            modalities: vec!["audio".to_string(), "text".to_string()],
            input_audio_format: config.audio_format.clone(),
            output_audio_format: config.audio_format.clone(),
            turn_detection: TurnDetection {
                kind: "server_vad".to_string(),
                threshold: config.turn_detection.threshold,
                prefix_padding_ms: config.turn_detection.prefix_padding_ms,
                silence_duration_ms: config.turn_detection.silence_duration_ms,
            },
            tools,
            tool_choice: "auto".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

impl ToolDeclaration {
    pub fn function(name: &'static str, description: &'static str, parameters: Value) -> Self {
        Self {
            kind: "function",
            name,
            description,
            parameters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Message {
        role: String,
        content: Vec<ContentPart>,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,

    /// Acknowledges a `session.update`.
    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta { delta: String },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        name: String,
        /// JSON-encoded arguments object.
        #[serde(default)]
        arguments: String,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "error")]
    Error { error: EngineError },

    #[serde(other)]
    Other,
}

impl ServerEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}
