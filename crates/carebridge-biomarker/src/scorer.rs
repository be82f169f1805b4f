//! Per-connection scoring state.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use carebridge_voice::biomarker::{BiomarkerInput, BiomarkerOutput};

use crate::buffer::SegmentBuffer;
use crate::codec::decode_mulaw;
use crate::error::BiomarkerError;
use crate::features::extract;
use crate::model::RiskModel;
use crate::{SAMPLE_RATE, SEGMENT_SAMPLES};

#[derive(Debug)]
struct CallState {
    buffer: SegmentBuffer,
    model: RiskModel,
}

impl CallState {
    fn new() -> Self {
        Self {
            buffer: SegmentBuffer::new(SEGMENT_SAMPLES),
            model: RiskModel::new(),
        }
    }
}

/// Scores the audio of every call seen on one connection.
#[derive(Debug, Default)]
pub struct Scorer {
    calls: HashMap<String, CallState>,
}

impl Scorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls with buffered audio or history.
    pub fn calls(&self) -> usize {
        self.calls.len()
    }

    /// Handles one text message.
    ///
    /// Returns a risk message when the message completed a segment. Messages
    /// of any type other than `audio` are ignored.
    pub fn ingest(&mut self, text: &str) -> Result<Option<BiomarkerOutput>, BiomarkerError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if value.get("type").and_then(|t| t.as_str()) != Some("audio") {
            return Ok(None);
        }

        let BiomarkerInput::Audio {
            call_id,
            audio,
            timestamp,
        } = serde_json::from_value(value)?;
        if call_id.is_empty() || audio.is_empty() {
            return Ok(None);
        }

        let samples = decode_mulaw(&STANDARD.decode(audio.as_bytes())?);
        let state = self.calls.entry(call_id.clone()).or_insert_with(CallState::new);
        if !state.buffer.push(&samples) {
            return Ok(None);
        }

        let segment = state.buffer.take();
        let features = extract(&segment, SAMPLE_RATE);
        let score = state.model.update(&features);
        tracing::info!(
            call_id = %call_id,
            risk = score.risk,
            status = ?score.status,
            n = score.n,
            "segment scored"
        );

        Ok(Some(BiomarkerOutput::Risk {
            call_id,
            risk: score.risk,
            status: score.status,
            n: score.n,
            timestamp: Some(timestamp),
        }))
    }
}
