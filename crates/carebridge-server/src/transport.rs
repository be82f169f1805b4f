//! Telephony media-stream message shapes.
//!
//! The transport speaks JSON text frames tagged by `event`. Audio payloads
//! are base64 μ-law chunks that the bridge passes through untouched.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Transport to bridge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TransportEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMeta,
    },
    Media {
        media: MediaChunk,
    },
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
    Mark {
        #[serde(default)]
        mark: Option<serde_json::Value>,
    },
}

impl TransportEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    /// Parameters attached when the stream was requested; carries `callId`.
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StartMeta {
    pub fn call_id(&self) -> Option<&str> {
        self.custom_parameters
            .get("callId")
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaChunk {
    #[serde(default)]
    pub track: Track,
    pub payload: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    #[default]
    Inbound,
    Outbound,
}

/// Bridge to transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TransportCommand {
    /// Agent audio for the caller.
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    /// Drops agent audio the transport has queued but not yet played.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl TransportCommand {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// What the bridge hands the socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportOut {
    Frame(String),
    Close { code: u16, reason: String },
}

/// Close codes sent to the transport.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const INTERNAL: u16 = 1011;
    pub const BUSY: u16 = 1013;
    pub const CONTEXT_NOT_FOUND: u16 = 4404;
    pub const ALREADY_BRIDGED: u16 = 4409;
    pub const CONTEXT_INCOMPLETE: u16 = 4422;
    pub const AI_UNAVAILABLE: u16 = 4502;
}
