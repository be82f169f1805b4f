//! Biomarker scorer message shapes, shared by the bridge and the scorer.

use carebridge_types::RiskStatus;
use serde::{Deserialize, Serialize};

/// Bridge to scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BiomarkerInput {
    #[serde(rename_all = "camelCase")]
    Audio {
        call_id: String,
        /// Base64 of 8 kHz μ-law samples.
        audio: String,
        /// Seconds since the Unix epoch.
        timestamp: f64,
    },
}

/// Scorer to bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BiomarkerOutput {
    #[serde(rename_all = "camelCase")]
    Risk {
        call_id: String,
        risk: f64,
        status: RiskStatus,
        /// Feature vectors in the caller's history window.
        n: u64,
        #[serde(default)]
        timestamp: Option<f64>,
    },
}

impl BiomarkerInput {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl BiomarkerOutput {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
