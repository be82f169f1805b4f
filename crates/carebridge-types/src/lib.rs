//! Shared types for the carebridge call bridge.
//!
//! This crate holds the vocabulary every other crate agrees on: the call
//! lifecycle state machine, biomarker status tags, the patient snapshot
//! captured when a call is triggered, and the structured clinical summary
//! that is delivered to the orchestration platform when a call ends.
//!
//! Nothing here touches I/O. Crates depend on `carebridge-types` for
//! cross-cutting definitions so the dependency graph stays acyclic.

pub mod summary;

pub use summary::{BiomarkerSummary, CallbackPayload, ClinicalSummary, EscalationRecord};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Risk score at or above which a call is considered high risk.
pub const HIGH_RISK_THRESHOLD: f64 = 0.8;

/// Lifecycle status of an outbound call.
///
/// The happy path is `Created → Dialing → Connected → Streaming → Completed`.
/// `Failed` is reachable from any non-terminal state. `Completed` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Created,
    Dialing,
    Connected,
    Streaming,
    Completed,
    Failed,
}

impl CallStatus {
    /// Returns the canonical string stored in the `calls.status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Dialing => "dialing",
            Self::Connected => "connected",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transitions are accepted from this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The next status on the happy path, if any.
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::Dialing),
            Self::Dialing => Some(Self::Connected),
            Self::Connected => Some(Self::Streaming),
            Self::Streaming => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Whether a single-step transition from `self` to `next` is legal.
    pub fn can_transition_to(self, next: CallStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || self.successor() == Some(next)
    }

    /// The ordered list of single steps that lead from `self` to `target`.
    ///
    /// Returns an empty path when `target` is not reachable (already passed,
    /// or `self` is terminal). A path to `Failed` is always the single step.
    pub fn path_to(self, target: CallStatus) -> Vec<CallStatus> {
        if self.is_terminal() || self == target {
            return Vec::new();
        }
        if target == Self::Failed {
            return vec![Self::Failed];
        }
        let mut path = Vec::new();
        let mut cursor = self;
        while let Some(next) = cursor.successor() {
            path.push(next);
            if next == target {
                return path;
            }
            cursor = next;
        }
        Vec::new()
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, Error)]
#[error("unknown call status: {0}")]
pub struct ParseCallStatusError(pub String);

impl std::str::FromStr for CallStatus {
    type Err = ParseCallStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "dialing" => Ok(Self::Dialing),
            "connected" => Ok(Self::Connected),
            "streaming" => Ok(Self::Streaming),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseCallStatusError(s.to_string())),
        }
    }
}

/// Status tag attached to every biomarker risk message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskStatus {
    /// The score reflects a fitted model.
    Ok,
    /// Not enough audio has been scored yet; the risk value is a placeholder.
    WarmingUp,
    /// Scoring failed for this segment.
    Error,
}

/// Patient and clinical context captured when the call is triggered.
///
/// Immutable for the life of the call. Fields beyond the ones the bridge
/// reads are preserved verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSnapshot {
    /// Identifier of the patient in the orchestration platform.
    pub patient_id: String,
    /// Name the agent uses to address the patient.
    pub display_name: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub medications: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_reject_every_transition() {
        let all = [
            CallStatus::Created,
            CallStatus::Dialing,
            CallStatus::Connected,
            CallStatus::Streaming,
            CallStatus::Completed,
            CallStatus::Failed,
        ];
        for from in [CallStatus::Completed, CallStatus::Failed] {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn failed_is_reachable_from_any_live_state() {
        for from in [
            CallStatus::Created,
            CallStatus::Dialing,
            CallStatus::Connected,
            CallStatus::Streaming,
        ] {
            assert!(from.can_transition_to(CallStatus::Failed));
        }
    }

    #[test]
    fn happy_path_does_not_skip() {
        assert!(CallStatus::Created.can_transition_to(CallStatus::Dialing));
        assert!(!CallStatus::Created.can_transition_to(CallStatus::Streaming));
        assert!(!CallStatus::Streaming.can_transition_to(CallStatus::Dialing));
    }

    #[test]
    fn path_to_walks_intermediate_states() {
        assert_eq!(
            CallStatus::Created.path_to(CallStatus::Streaming),
            vec![
                CallStatus::Dialing,
                CallStatus::Connected,
                CallStatus::Streaming
            ]
        );
        assert!(CallStatus::Streaming.path_to(CallStatus::Dialing).is_empty());
        assert!(CallStatus::Completed.path_to(CallStatus::Failed).is_empty());
        assert_eq!(
            CallStatus::Dialing.path_to(CallStatus::Failed),
            vec![CallStatus::Failed]
        );
    }

    #[test]
    fn status_string_round_trip() {
        for status in [CallStatus::Created, CallStatus::Streaming, CallStatus::Failed] {
            assert_eq!(status.as_str().parse::<CallStatus>().unwrap(), status);
        }
        assert!("ringing".parse::<CallStatus>().is_err());
    }

    #[test]
    fn patient_snapshot_keeps_unknown_fields() {
        let json = serde_json::json!({
            "patientId": "p-1",
            "displayName": "Ada",
            "conditions": ["heart failure"],
            "weightKg": 71.5
        });
        let snapshot: PatientSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(snapshot.display_name, "Ada");
        assert!(snapshot.medications.is_empty());
        assert_eq!(snapshot.extra["weightKg"], 71.5);
    }
}
