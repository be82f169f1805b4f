//! Tools the AI agent can invoke, and what they accumulate.

use carebridge_types::{BiomarkerSummary, ClinicalSummary, EscalationRecord};
use carebridge_voice::realtime::ToolDeclaration;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

pub fn declarations() -> Vec<ToolDeclaration> {
    vec![
        ToolDeclaration::function(
            "log_symptom",
            "Record a symptom the patient reports.",
            json!({
                "type": "object",
                "properties": {
                    "symptom": {"type": "string"},
                    "severity": {"type": "string", "enum": ["mild", "moderate", "severe"]},
                    "onset": {"type": "string"},
                    "notes": {"type": "string"}
                },
                "required": ["symptom"]
            }),
        ),
        ToolDeclaration::function(
            "track_voice_task",
            "Mark progress on a part of the check-in script.",
            json!({
                "type": "object",
                "properties": {
                    "task": {"type": "string"},
                    "status": {"type": "string", "enum": ["started", "completed", "skipped"]}
                },
                "required": ["task", "status"]
            }),
        ),
        ToolDeclaration::function(
            "escalate",
            "Flag the call for clinician follow-up.",
            json!({
                "type": "object",
                "properties": {
                    "level": {"type": "string", "enum": ["routine", "urgent", "emergency"]},
                    "reason": {"type": "string"}
                },
                "required": ["level", "reason"]
            }),
        ),
        ToolDeclaration::function(
            "finalize_summary",
            "Draft the findings of the call before returning the result.",
            json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "array", "items": {"type": "string"}},
                    "recommendation": {"type": "string"},
                    "red_flags": {"type": "boolean"}
                },
                "required": ["summary"]
            }),
        ),
        ToolDeclaration::function(
            "return_result",
            "Return the final structured result. Call exactly once, at the end.",
            json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "array", "items": {"type": "string"}},
                    "recommendation": {"type": "string"},
                    "red_flags": {"type": "boolean"}
                }
            }),
        ),
    ]
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("malformed arguments for {tool}: {source}")]
    MalformedArguments {
        tool: String,
        source: serde_json::Error,
    },
}

/// A decoded tool call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum ToolInvocation {
    LogSymptom(SymptomArgs),
    TrackVoiceTask(VoiceTaskArgs),
    Escalate(EscalationRecord),
    FinalizeSummary(SummaryDraft),
    ReturnResult(ResultArgs),
    #[serde(skip)]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SymptomArgs {
    pub symptom: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub onset: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VoiceTaskArgs {
    pub task: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SummaryDraft {
    pub summary: Vec<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub red_flags: Option<bool>,
}

/// Arguments of the terminal invocation. Omitted fields fall back to the
/// draft and the escalation state.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultArgs {
    #[serde(default)]
    pub summary: Option<Vec<String>>,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub red_flags: Option<bool>,
}

impl ToolInvocation {
    /// Decodes a tool call from its name and JSON-encoded arguments.
    pub fn parse(name: &str, arguments: &str) -> Result<Self, ToolError> {
        if !declarations().iter().any(|tool| tool.name == name) {
            return Ok(Self::Unknown(name.to_string()));
        }
        let malformed = |source| ToolError::MalformedArguments {
            tool: name.to_string(),
            source,
        };
        let arguments: Value = if arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(arguments).map_err(malformed)?
        };
        serde_json::from_value(json!({"name": name, "arguments": arguments})).map_err(malformed)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::LogSymptom(_) => "log_symptom",
            Self::TrackVoiceTask(_) => "track_voice_task",
            Self::Escalate(_) => "escalate",
            Self::FinalizeSummary(_) => "finalize_summary",
            Self::ReturnResult(_) => "return_result",
            Self::Unknown(name) => name,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ReturnResult(_))
    }
}

/// What the agent has reported so far in one call.
#[derive(Debug, Default)]
pub struct SessionNotes {
    symptoms: Map<String, Value>,
    escalation: Option<EscalationRecord>,
    draft: Option<SummaryDraft>,
}

impl SessionNotes {
    /// Stores a symptom and returns its details object.
    pub fn log_symptom(&mut self, args: &SymptomArgs) -> Value {
        let mut details = Map::new();
        if let Some(severity) = &args.severity {
            details.insert("severity".to_string(), json!(severity));
        }
        if let Some(onset) = &args.onset {
            details.insert("onset".to_string(), json!(onset));
        }
        if let Some(notes) = &args.notes {
            details.insert("notes".to_string(), json!(notes));
        }
        let details = Value::Object(details);
        self.symptoms.insert(args.symptom.clone(), details.clone());
        details
    }

    /// The latest escalation replaces any earlier one.
    pub fn escalate(&mut self, record: EscalationRecord) {
        self.escalation = Some(record);
    }

    pub fn draft(&mut self, draft: SummaryDraft) {
        self.draft = Some(draft);
    }

    /// Builds the final summary from the terminal arguments and the notes.
    pub fn assemble(&self, args: ResultArgs, biomarker: Option<BiomarkerSummary>) -> ClinicalSummary {
        let draft = self.draft.as_ref();
        let summary = args
            .summary
            .or_else(|| draft.map(|d| d.summary.clone()))
            .unwrap_or_default();
        let recommendation = args
            .recommendation
            .or_else(|| draft.and_then(|d| d.recommendation.clone()))
            .unwrap_or_default();
        let red_flags = args
            .red_flags
            .or_else(|| draft.and_then(|d| d.red_flags))
            .unwrap_or(self.escalation.is_some());

        ClinicalSummary {
            summary,
            recommendation,
            red_flags,
            symptoms: (!self.symptoms.is_empty()).then(|| self.symptoms.clone()),
            escalation: self.escalation.clone(),
            biomarker,
        }
    }
}
