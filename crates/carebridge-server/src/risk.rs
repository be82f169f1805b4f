//! Risk monitor.
//!
//! Consumes biomarker risk messages for one call. Scores with status `ok`
//! overwrite the call's last known risk in arrival order. An advisory is
//! raised only when the score moves from below the high-risk threshold
//! (or from no score at all) to at or above it.

use carebridge_calls::{get_call, record_risk};
use carebridge_observe::{emit_event, CallEventPayload};
use carebridge_types::{BiomarkerSummary, RiskStatus, HIGH_RISK_THRESHOLD};
use carebridge_voice::biomarker::BiomarkerOutput;
use rusqlite::Connection;

use crate::store::StoreError;

/// A risk message accepted for the active call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskObservation {
    pub risk: f64,
    pub status: RiskStatus,
    pub samples: u64,
    /// This score crossed the threshold from below.
    pub crossed: bool,
}

#[derive(Debug)]
pub struct RiskMonitor {
    call_id: String,
    threshold: f64,
    elevated: bool,
    last: Option<f64>,
    peak: f64,
    scored: u64,
    advisories: u32,
}

impl RiskMonitor {
    pub fn new(call_id: impl Into<String>) -> Self {
        Self::with_threshold(call_id, HIGH_RISK_THRESHOLD)
    }

    pub fn with_threshold(call_id: impl Into<String>, threshold: f64) -> Self {
        Self {
            call_id: call_id.into(),
            threshold,
            elevated: false,
            last: None,
            peak: 0.0,
            scored: 0,
            advisories: 0,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Accepts a message, or returns `None` when it belongs to another call.
    pub fn observe(&mut self, message: &BiomarkerOutput) -> Option<RiskObservation> {
        let BiomarkerOutput::Risk {
            call_id,
            risk,
            status,
            n,
            ..
        } = message;
        if *call_id != self.call_id {
            tracing::warn!(
                call_id = %self.call_id,
                foreign_call_id = %call_id,
                "ignoring risk message for another call"
            );
            return None;
        }

        let risk = if risk.is_finite() { risk.clamp(0.0, 1.0) } else { 0.0 };
        let mut crossed = false;
        if *status == RiskStatus::Ok {
            let elevated = risk >= self.threshold;
            crossed = elevated && !self.elevated;
            self.elevated = elevated;
            self.last = Some(risk);
            self.peak = self.peak.max(risk);
            self.scored += 1;
        }

        Some(RiskObservation {
            risk,
            status: *status,
            samples: *n,
            crossed,
        })
    }

    /// Counts an advisory that was actually delivered to the AI session.
    pub fn advisory_sent(&mut self) {
        self.advisories += 1;
    }

    /// Aggregate for the callback, once any score has been seen.
    pub fn summary(&self) -> Option<BiomarkerSummary> {
        self.last.map(|last_risk| BiomarkerSummary {
            last_risk,
            peak_risk: self.peak,
            samples: self.scored,
            advisories: self.advisories,
        })
    }
}

/// Writes an accepted observation. Returns `false` when the call is
/// already terminal and the observation was discarded.
pub fn persist_observation(
    conn: &mut Connection,
    call_id: &str,
    observation: &RiskObservation,
    threshold: f64,
) -> Result<bool, StoreError> {
    let tx = conn.transaction()?;
    let status = get_call(&tx, call_id)?.status;
    if status.is_terminal() {
        tracing::debug!(call_id, status = %status, "risk message after call end discarded");
        return Ok(false);
    }

    if observation.status == RiskStatus::Ok {
        record_risk(&tx, call_id, observation.risk)?;
    }
    emit_event(
        &tx,
        call_id,
        &CallEventPayload::RiskUpdated {
            risk: observation.risk,
            status: observation.status,
            samples: observation.samples,
        },
    )?;
    if observation.crossed {
        emit_event(
            &tx,
            call_id,
            &CallEventPayload::RiskAdvisory {
                risk: observation.risk,
                threshold,
            },
        )?;
    }
    tx.commit()?;
    Ok(true)
}

/// In-band advisory text injected into the AI session.
pub fn advisory_text(risk: f64) -> String {
    format!(
        "Vocal biomarker advisory: the caller's risk score is {risk:.2}, at or above the \
         high-risk threshold. Gently ask how they are feeling right now, check for warning \
         signs, and escalate if they report worsening symptoms. Do not mention the score."
    )
}
