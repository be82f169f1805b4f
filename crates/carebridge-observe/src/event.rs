//! Event payloads and records for the call event log.

use carebridge_types::{CallStatus, RiskStatus};
use serde::{Deserialize, Serialize};

/// Structured payload for each event kind.
///
/// Serialised to JSON into `call_events.payload_json`; each variant maps to
/// one `event_type` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallEventPayload {
    // ── Lifecycle ────────────────────────────────────────────────────
    StatusChanged {
        from: CallStatus,
        to: CallStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Context resolution failed for a row that exists but cannot be bridged.
    ResolutionFailed { reason: String },

    // ── Transport stream ─────────────────────────────────────────────
    StreamStarted {
        transport_session_id: String,
        tracks: Vec<String>,
    },

    /// The transport stream ended; carries the per-call frame counters.
    StreamStopped {
        inbound_frames: u64,
        forwarded_frames: u64,
        mirrored_frames: u64,
        outbound_frames: u64,
        dropped_preroll_frames: u64,
        /// Inbound frames not mirrored because the biomarker stream was full.
        #[serde(default)]
        skipped_mirror_frames: u64,
    },

    // ── Upstreams ────────────────────────────────────────────────────
    AiSessionReady,

    AiSessionError { message: String },

    /// An upstream connection could not be opened or dropped mid-call.
    UpstreamLost { upstream: String, detail: String },

    // ── Risk ─────────────────────────────────────────────────────────
    RiskUpdated {
        risk: f64,
        status: RiskStatus,
        samples: u64,
    },

    /// A high-risk advisory was injected into the AI session.
    RiskAdvisory { risk: f64, threshold: f64 },

    // ── Tool actions ─────────────────────────────────────────────────
    SymptomLogged {
        symptom: String,
        details: serde_json::Value,
    },

    VoiceTaskTracked { task: String, status: String },

    Escalation { level: String, reason: String },

    SummaryDrafted { findings: usize },

    UnknownTool { name: String },

    // ── Result delivery ──────────────────────────────────────────────
    ResultDelivered { callback_url: String, http_status: u16 },

    DeliveryFailed {
        callback_url: String,
        detail: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        http_status: Option<u16>,
    },
}

impl CallEventPayload {
    /// Returns the canonical event type string for this payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "STATUS_CHANGED",
            Self::ResolutionFailed { .. } => "RESOLUTION_FAILED",
            Self::StreamStarted { .. } => "STREAM_STARTED",
            Self::StreamStopped { .. } => "STREAM_STOPPED",
            Self::AiSessionReady => "AI_SESSION_READY",
            Self::AiSessionError { .. } => "AI_SESSION_ERROR",
            Self::UpstreamLost { .. } => "UPSTREAM_LOST",
            Self::RiskUpdated { .. } => "RISK_UPDATED",
            Self::RiskAdvisory { .. } => "RISK_ADVISORY",
            Self::SymptomLogged { .. } => "SYMPTOM_LOGGED",
            Self::VoiceTaskTracked { .. } => "VOICE_TASK_TRACKED",
            Self::Escalation { .. } => "ESCALATION",
            Self::SummaryDrafted { .. } => "SUMMARY_DRAFTED",
            Self::UnknownTool { .. } => "UNKNOWN_TOOL",
            Self::ResultDelivered { .. } => "RESULT_DELIVERED",
            Self::DeliveryFailed { .. } => "DELIVERY_FAILED",
        }
    }
}

/// A single row from the `call_events` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEvent {
    pub id: i64,
    pub call_id: String,
    pub event_type: String,
    pub payload_json: String,
    /// ISO 8601 timestamp with millisecond precision.
    pub occurred_at: String,
}

impl CallEvent {
    /// Decodes the stored payload.
    pub fn payload(&self) -> Result<CallEventPayload, serde_json::Error> {
        serde_json::from_str(&self.payload_json)
    }
}
