//! AI session controller.
//!
//! Tracks the AI side of one call through
//! `uninitialized → configuring → ready → active → terminated` and builds
//! the configuration message sent when the session opens.

use carebridge_voice::realtime::{ClientEvent, SessionConfig};
use carebridge_voice::RealtimeConfig;

use crate::resolver::SessionContext;
use crate::tools;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiPhase {
    Uninitialized,
    Configuring,
    Ready,
    Active,
    Terminated,
}

#[derive(Debug)]
pub struct AiSessionController {
    phase: AiPhase,
}

impl Default for AiSessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl AiSessionController {
    pub fn new() -> Self {
        Self {
            phase: AiPhase::Uninitialized,
        }
    }

    pub fn phase(&self) -> AiPhase {
        self.phase
    }

    /// Whether inbound audio can go straight to the engine.
    pub fn is_ready(&self) -> bool {
        matches!(self.phase, AiPhase::Ready | AiPhase::Active)
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == AiPhase::Terminated
    }

    /// Moves to `configuring` and returns the configuration message.
    ///
    /// Returns `None` if the session was already opened.
    pub fn open(
        &mut self,
        ctx: &SessionContext,
        realtime: &RealtimeConfig,
        agent_name: &str,
    ) -> Option<ClientEvent> {
        if self.phase != AiPhase::Uninitialized {
            return None;
        }
        self.phase = AiPhase::Configuring;
        Some(ClientEvent::SessionUpdate {
            session: SessionConfig::new(
                realtime,
                instructions(ctx, agent_name),
                tools::declarations(),
            ),
        })
    }

    /// Handles the engine's configuration acknowledgment. Returns `true` on
    /// the transition to `ready`.
    pub fn on_config_ack(&mut self) -> bool {
        if self.phase == AiPhase::Configuring {
            self.phase = AiPhase::Ready;
            return true;
        }
        false
    }

    /// Records that audio moved between caller and engine. Returns `true`
    /// on the transition to `active`.
    pub fn on_audio_exchanged(&mut self) -> bool {
        if self.phase == AiPhase::Ready {
            self.phase = AiPhase::Active;
            return true;
        }
        false
    }

    /// Moves to `terminated`. Returns `false` if it already was.
    pub fn terminate(&mut self) -> bool {
        if self.phase == AiPhase::Terminated {
            return false;
        }
        self.phase = AiPhase::Terminated;
        true
    }
}

/// System instructions for the agent, built from the call's context.
pub fn instructions(ctx: &SessionContext, agent_name: &str) -> String {
    let patient = &ctx.patient;
    let mut text = format!(
        "You are {agent_name}, a clinical follow-up voice assistant calling {} on behalf of their care team.\n",
        patient.display_name
    );
    if !ctx.objective.is_empty() {
        text.push_str(&format!("Call objective: {}\n", ctx.objective));
    }
    if !ctx.clinical_context.is_empty() {
        text.push_str(&format!("Clinical context: {}\n", ctx.clinical_context));
    }
    if !patient.conditions.is_empty() {
        text.push_str(&format!("Known conditions: {}\n", patient.conditions.join(", ")));
    }
    if !patient.medications.is_empty() {
        text.push_str(&format!("Current medications: {}\n", patient.medications.join(", ")));
    }
    if let Some(language) = &patient.language {
        text.push_str(&format!("Speak {language}.\n"));
    }
    text.push_str(
        "Keep sentences short and ask one question at a time. \
         Call log_symptom for every symptom the patient reports and track_voice_task \
         as you complete each part of the check-in. \
         If the patient describes warning signs, call escalate with a level and reason. \
         Before ending, call finalize_summary, then call return_result exactly once \
         and say goodbye.",
    );
    text
}
