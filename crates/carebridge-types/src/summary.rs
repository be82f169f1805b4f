//! Clinical summary and callback payload shapes.
//!
//! The summary is produced by the AI agent through the `return_result` tool
//! and delivered once per call to the orchestration platform.

use serde::{Deserialize, Serialize};

/// Escalation raised during the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    /// Urgency level chosen by the agent (e.g. `urgent`, `emergency`).
    pub level: String,
    pub reason: String,
}

/// Aggregate of the biomarker risk scores seen during the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomarkerSummary {
    pub last_risk: f64,
    pub peak_risk: f64,
    /// Number of scored segments reported by the biomarker stream.
    pub samples: u64,
    /// Number of high-risk advisories injected into the conversation.
    pub advisories: u32,
}

/// Structured clinical summary of one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalSummary {
    /// Ordered findings.
    pub summary: Vec<String>,
    #[serde(default)]
    pub recommendation: String,
    pub red_flags: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptoms: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biomarker: Option<BiomarkerSummary>,
}

/// Body of the single POST sent to the callback target when a call ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub call_id: String,
    pub summary: ClinicalSummary,
    /// Name of the agent that conducted the call.
    pub agent: String,
    /// RFC 3339 timestamp of when the payload was assembled.
    pub timestamp: String,
}
