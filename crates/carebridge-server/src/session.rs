//! Per-call bridge session.
//!
//! A transport connection starts out awaiting identity: nothing is known
//! about the call until the `start` message arrives (or until the upgrade
//! request was resolved, depending on the identity source). Once resolved
//! the session is bound and a single task multiplexes the transport, the
//! AI session and the biomarker stream until the call ends.

use std::sync::Arc;
use std::time::Duration;

use carebridge_db::DbPool;
use carebridge_observe::{emit_event, CallEventPayload};
use carebridge_types::CallStatus;
use carebridge_voice::biomarker::BiomarkerOutput;
use carebridge_voice::connector::{AI_UPSTREAM, BIOMARKER_UPSTREAM};
use carebridge_voice::realtime::{ClientEvent, ServerEvent};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::controller::AiSessionController;
use crate::dispatch::ResultDispatch;
use crate::lifecycle::{LifecycleTracker, TransitionOutcome};
use crate::registry::{ClaimError, ClaimGuard};
use crate::relay::{AudioRelay, Mirror, RelayError};
use crate::resolver::{resolve, Identity, ResolveError, SessionContext};
use crate::risk::{advisory_text, persist_observation, RiskMonitor};
use crate::store::{self, StoreError};
use crate::tools::{SessionNotes, ToolInvocation};
use crate::transport::{close_code, StartMeta, Track, TransportEvent, TransportOut};
use crate::AppState;

/// The bridge's side of one transport connection.
pub struct TransportHandle {
    pub inbound: mpsc::Receiver<String>,
    pub outbound: mpsc::Sender<TransportOut>,
}

/// How a session finds its call.
#[derive(Debug, Clone)]
pub enum ContextSource {
    /// From the `callId` parameter of the `start` message.
    StartMessage,
    /// Already resolved from the upgrade request.
    Resolved(SessionContext),
}

/// Failure to bind a connection to a call.
#[derive(Debug)]
pub enum Rejection {
    Resolve(ResolveError),
    Store(StoreError),
}

impl Rejection {
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Resolve(ResolveError::ContextNotFound(_)) => close_code::CONTEXT_NOT_FOUND,
            Self::Resolve(ResolveError::ContextIncomplete { .. }) => close_code::CONTEXT_INCOMPLETE,
            Self::Resolve(ResolveError::AlreadyBound { .. }) => close_code::ALREADY_BRIDGED,
            Self::Resolve(ResolveError::CallEnded { .. }) => close_code::NORMAL,
            Self::Resolve(ResolveError::Store(_)) | Self::Store(_) => close_code::INTERNAL,
        }
    }

    pub fn reason(&self) -> String {
        match self {
            Self::Resolve(e) => e.to_string(),
            Self::Store(e) => e.to_string(),
        }
    }
}

/// Resolves an identity off the async executor.
pub async fn resolve_identity(
    pool: &DbPool,
    identity: Identity,
    transport_session_id: String,
) -> Result<SessionContext, Rejection> {
    store::blocking(pool, move |conn| {
        Ok(resolve(conn, &identity, &transport_session_id))
    })
    .await
    .map_err(Rejection::Store)?
    .map_err(Rejection::Resolve)
}

/// Records what a rejection means for the call it names, if any.
///
/// A call that has already ended is left untouched. A live call whose
/// transport session is bound to another stream is failed: the caller holds
/// the call's registry slot, so that stream is no longer being bridged and
/// the call could never be bridged again.
pub async fn record_rejection(pool: &DbPool, rejection: &Rejection) {
    match rejection {
        Rejection::Resolve(ResolveError::ContextIncomplete { call_id, .. }) => {
            let reason = rejection.reason();
            record_event(
                pool,
                call_id,
                CallEventPayload::ResolutionFailed {
                    reason: reason.clone(),
                },
            )
            .await;
            if let Err(e) = LifecycleTracker::new(pool.clone(), call_id.clone())
                .fail(reason)
                .await
            {
                tracing::warn!(call_id = %call_id, "failed to mark call failed: {}", e);
            }
        }
        Rejection::Resolve(ResolveError::AlreadyBound { call_id, bound }) => {
            let reason = rejection.reason();
            tracing::warn!(call_id = %call_id, bound = %bound, "transport session bound to a stream that is gone");
            record_event(
                pool,
                call_id,
                CallEventPayload::ResolutionFailed {
                    reason: reason.clone(),
                },
            )
            .await;
            if let Err(e) = LifecycleTracker::new(pool.clone(), call_id.clone())
                .fail(reason)
                .await
            {
                tracing::warn!(call_id = %call_id, "failed to mark call failed: {}", e);
            }
        }
        Rejection::Resolve(ResolveError::CallEnded { call_id, status }) => {
            tracing::info!(call_id = %call_id, status = %status, "start for finished call discarded");
        }
        Rejection::Resolve(ResolveError::ContextNotFound(identity)) => {
            tracing::warn!(%identity, "no call for transport connection");
        }
        Rejection::Resolve(ResolveError::Store(e)) => {
            tracing::error!("context resolution failed: {}", e);
        }
        Rejection::Store(e) => {
            tracing::error!("context resolution failed: {}", e);
        }
    }
}

/// Appends an event, logging instead of failing.
pub async fn record_event(pool: &DbPool, call_id: &str, payload: CallEventPayload) {
    let event_type = payload.event_type();
    let owned_id = call_id.to_string();
    let result = store::blocking(pool, move |conn| {
        emit_event(conn, &owned_id, &payload)?;
        Ok(())
    })
    .await;
    if let Err(e) = result {
        tracing::warn!(call_id, event_type, "failed to record call event: {}", e);
    }
}

/// Runs one transport connection to completion.
pub async fn run_session(state: Arc<AppState>, mut transport: TransportHandle, source: ContextSource) {
    let Some((stream_sid, start)) = await_start(&mut transport.inbound).await else {
        tracing::debug!("transport ended before start");
        return;
    };

    let call_id = match &source {
        ContextSource::Resolved(ctx) => Some(ctx.call_id.clone()),
        ContextSource::StartMessage => start.call_id().map(str::to_string),
    };
    let Some(call_id) = call_id else {
        let rejection = Rejection::Resolve(ResolveError::ContextNotFound(
            "start message without callId".to_string(),
        ));
        record_rejection(&state.pool, &rejection).await;
        close(&transport.outbound, rejection.close_code(), &rejection.reason()).await;
        return;
    };

    // The slot is held before resolution so that only this connection can
    // bind or fail the call from here on.
    let claim = match state.active_calls.claim(&call_id).await {
        Ok(claim) => claim,
        Err(e) => {
            tracing::warn!(call_id = %call_id, "transport rejected: {}", e);
            let code = match e {
                ClaimError::AlreadyActive(_) => close_code::ALREADY_BRIDGED,
                ClaimError::AtCapacity(_) => close_code::BUSY,
            };
            close(&transport.outbound, code, &e.to_string()).await;
            return;
        }
    };

    let resolved = match source {
        ContextSource::Resolved(ctx) => Ok(ctx),
        ContextSource::StartMessage => {
            resolve_identity(&state.pool, Identity::CallId(call_id), stream_sid.clone()).await
        }
    };

    let ctx = match resolved {
        Ok(ctx) => ctx,
        Err(rejection) => {
            record_rejection(&state.pool, &rejection).await;
            claim.release().await;
            close(&transport.outbound, rejection.close_code(), &rejection.reason()).await;
            return;
        }
    };

    tracing::info!(call_id = %ctx.call_id, stream_sid = %stream_sid, "transport bound to call");
    if let Some(call) = BoundCall::establish(state, ctx, claim, stream_sid, start, transport).await {
        call.run().await;
    }
}

/// Waits for the `start` message. Anything earlier carries no identity.
async fn await_start(inbound: &mut mpsc::Receiver<String>) -> Option<(String, StartMeta)> {
    while let Some(text) = inbound.recv().await {
        match TransportEvent::parse(&text) {
            Ok(TransportEvent::Start { stream_sid, start }) => return Some((stream_sid, start)),
            Ok(TransportEvent::Stop { .. }) => return None,
            Ok(TransportEvent::Media { .. }) => {
                tracing::debug!("media before start discarded");
            }
            Ok(TransportEvent::Connected { protocol }) => {
                tracing::debug!(?protocol, "transport connected");
            }
            Ok(TransportEvent::Mark { .. }) => {}
            Err(e) => tracing::warn!("malformed transport message discarded: {}", e),
        }
    }
    None
}

async fn close(outbound: &mpsc::Sender<TransportOut>, code: u16, reason: &str) {
    let _ = outbound
        .send(TransportOut::Close {
            code,
            reason: reason.to_string(),
        })
        .await;
}

/// Why a bound session ended.
#[derive(Debug)]
enum SessionEnd {
    TransportStopped,
    TransportClosed,
    AiLost(String),
}

struct BoundCall {
    state: Arc<AppState>,
    ctx: Arc<SessionContext>,
    claim: ClaimGuard,
    tracker: LifecycleTracker,
    transport_rx: mpsc::Receiver<String>,
    ai_rx: mpsc::Receiver<String>,
    biomarker_rx: Option<mpsc::Receiver<String>>,
    relay: AudioRelay,
    controller: AiSessionController,
    risk: RiskMonitor,
    notes: SessionNotes,
    dispatch: Option<JoinHandle<()>>,
}

impl BoundCall {
    /// Moves the claimed call to `streaming` and opens the upstreams.
    async fn establish(
        state: Arc<AppState>,
        ctx: SessionContext,
        claim: ClaimGuard,
        stream_sid: String,
        start: StartMeta,
        transport: TransportHandle,
    ) -> Option<Self> {
        let call_id = ctx.call_id.clone();
        let tracker = LifecycleTracker::new(state.pool.clone(), call_id.clone());
        match tracker.advance(CallStatus::Streaming, None).await {
            Ok(TransitionOutcome::Discarded(status)) => {
                tracing::info!(call_id = %call_id, status = %status, "start for finished call discarded");
                claim.release().await;
                close(&transport.outbound, close_code::NORMAL, "call already ended").await;
                return None;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(call_id = %call_id, "failed to record stream start: {}", e),
        }
        record_event(
            &state.pool,
            &call_id,
            CallEventPayload::StreamStarted {
                transport_session_id: ctx.transport_session_id.clone(),
                tracks: start.tracks.clone(),
            },
        )
        .await;

        let ai = match state.connector.open_ai(&call_id).await {
            Ok(link) => link,
            Err(e) => {
                tracing::error!(call_id = %call_id, "AI engine unavailable: {}", e);
                record_event(
                    &state.pool,
                    &call_id,
                    CallEventPayload::UpstreamLost {
                        upstream: AI_UPSTREAM.to_string(),
                        detail: e.to_string(),
                    },
                )
                .await;
                if let Err(e) = tracker.fail(format!("AI engine unavailable: {e}")).await {
                    tracing::warn!(call_id = %call_id, "failed to mark call failed: {}", e);
                }
                claim.release().await;
                close(&transport.outbound, close_code::AI_UNAVAILABLE, "AI engine unavailable").await;
                return None;
            }
        };

        let biomarker = match state.connector.open_biomarker(&call_id).await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(call_id = %call_id, "continuing without biomarker stream: {}", e);
                record_event(
                    &state.pool,
                    &call_id,
                    CallEventPayload::UpstreamLost {
                        upstream: BIOMARKER_UPSTREAM.to_string(),
                        detail: e.to_string(),
                    },
                )
                .await;
                None
            }
        };
        let (biomarker_tx, biomarker_rx) = match biomarker {
            Some(link) => (Some(link.tx), Some(link.rx)),
            None => (None, None),
        };

        let relay = AudioRelay::new(
            call_id.clone(),
            stream_sid,
            ai.tx,
            biomarker_tx,
            transport.outbound,
            state.bridge.preroll_frames,
        );

        let mut call = Self {
            risk: RiskMonitor::new(call_id.clone()),
            tracker,
            ctx: Arc::new(ctx),
            claim,
            transport_rx: transport.inbound,
            ai_rx: ai.rx,
            biomarker_rx,
            relay,
            controller: AiSessionController::new(),
            notes: SessionNotes::default(),
            dispatch: None,
            state,
        };

        if let Some(config) =
            call.controller
                .open(&call.ctx, &call.state.realtime, &call.state.bridge.agent_name)
        {
            if call.relay.send_ai(&config).await.is_err() {
                call.finish(SessionEnd::AiLost("closed before configuration".to_string()))
                    .await;
                return None;
            }
        }
        Some(call)
    }

    async fn run(mut self) {
        let end = loop {
            tokio::select! {
                frame = self.transport_rx.recv() => match frame {
                    Some(text) => {
                        if let Some(end) = self.on_transport(&text).await {
                            break end;
                        }
                    }
                    None => break SessionEnd::TransportClosed,
                },
                event = self.ai_rx.recv() => match event {
                    Some(text) => {
                        if let Some(end) = self.on_ai(&text).await {
                            break end;
                        }
                    }
                    None => break SessionEnd::AiLost("connection closed".to_string()),
                },
                message = recv_optional(&mut self.biomarker_rx) => match message {
                    Some(text) => self.on_biomarker(&text).await,
                    None => self.biomarker_lost("connection closed").await,
                },
            }
        };
        self.finish(end).await;
    }

    async fn on_transport(&mut self, text: &str) -> Option<SessionEnd> {
        let event = match TransportEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(call_id = %self.ctx.call_id, "malformed transport message discarded: {}", e);
                return None;
            }
        };

        match event {
            TransportEvent::Media { media } if media.track == Track::Inbound => {
                match self.relay.inbound(media.payload, self.controller.is_ready()).await {
                    Ok((forwarded, mirror)) => {
                        if forwarded {
                            self.controller.on_audio_exchanged();
                        }
                        if mirror == Mirror::Lost {
                            self.biomarker_lost("send failed").await;
                        }
                        None
                    }
                    Err(RelayError::AiClosed) => Some(SessionEnd::AiLost("send failed".to_string())),
                    Err(RelayError::TransportClosed) => Some(SessionEnd::TransportClosed),
                }
            }
            TransportEvent::Media { .. } => None,
            TransportEvent::Stop { .. } => Some(SessionEnd::TransportStopped),
            TransportEvent::Start { stream_sid, .. } => {
                tracing::warn!(call_id = %self.ctx.call_id, stream_sid = %stream_sid, "repeated start ignored");
                None
            }
            TransportEvent::Connected { .. } | TransportEvent::Mark { .. } => None,
        }
    }

    async fn on_ai(&mut self, text: &str) -> Option<SessionEnd> {
        let event = match ServerEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(call_id = %self.ctx.call_id, "malformed AI event discarded: {}", e);
                return None;
            }
        };

        match event {
            ServerEvent::SessionCreated => {
                tracing::debug!(call_id = %self.ctx.call_id, "AI session created");
                None
            }
            ServerEvent::SessionUpdated => {
                if !self.controller.on_config_ack() {
                    return None;
                }
                tracing::info!(call_id = %self.ctx.call_id, buffered = self.relay.buffered(), "AI session ready");
                self.record(CallEventPayload::AiSessionReady).await;
                match self.relay.drain_preroll().await {
                    Ok(drained) => {
                        if drained > 0 {
                            self.controller.on_audio_exchanged();
                        }
                        None
                    }
                    Err(_) => Some(SessionEnd::AiLost("send failed".to_string())),
                }
            }
            ServerEvent::AudioDelta { delta } => match self.relay.outbound(delta).await {
                Ok(()) => {
                    self.controller.on_audio_exchanged();
                    None
                }
                Err(_) => Some(SessionEnd::TransportClosed),
            },
            ServerEvent::SpeechStarted => match self.relay.clear_outbound().await {
                Ok(()) => None,
                Err(_) => Some(SessionEnd::TransportClosed),
            },
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => self.on_tool(call_id, name, arguments).await,
            ServerEvent::Error { error } => {
                tracing::warn!(
                    call_id = %self.ctx.call_id,
                    code = ?error.code,
                    "AI engine reported an error: {}",
                    error.message
                );
                self.record(CallEventPayload::AiSessionError {
                    message: error.message,
                })
                .await;
                None
            }
            ServerEvent::Other => None,
        }
    }

    async fn on_tool(&mut self, tool_call_id: String, name: String, arguments: String) -> Option<SessionEnd> {
        let call_id = self.ctx.call_id.clone();
        let invocation = ToolInvocation::parse(&name, &arguments);
        if self.controller.is_terminated() {
            match &invocation {
                Ok(invocation) if invocation.is_terminal() => {
                    tracing::warn!(call_id = %call_id, tool = invocation.name(), "duplicate terminal invocation ignored");
                }
                _ => tracing::warn!(call_id = %call_id, tool = %name, "tool invocation after result ignored"),
            }
            return None;
        }

        let output = match invocation {
            Err(e) => {
                tracing::warn!(call_id = %call_id, tool = %name, "{}", e);
                json!({"ok": false, "error": e.to_string()})
            }
            Ok(ToolInvocation::LogSymptom(args)) => {
                let details = self.notes.log_symptom(&args);
                tracing::info!(call_id = %call_id, symptom = %args.symptom, "symptom logged");
                self.record(CallEventPayload::SymptomLogged {
                    symptom: args.symptom,
                    details,
                })
                .await;
                json!({"ok": true})
            }
            Ok(ToolInvocation::TrackVoiceTask(args)) => {
                self.record(CallEventPayload::VoiceTaskTracked {
                    task: args.task,
                    status: args.status,
                })
                .await;
                json!({"ok": true})
            }
            Ok(ToolInvocation::Escalate(escalation)) => {
                tracing::warn!(call_id = %call_id, level = %escalation.level, "call escalated: {}", escalation.reason);
                self.record(CallEventPayload::Escalation {
                    level: escalation.level.clone(),
                    reason: escalation.reason.clone(),
                })
                .await;
                self.notes.escalate(escalation);
                json!({"ok": true, "escalated": true})
            }
            Ok(ToolInvocation::FinalizeSummary(draft)) => {
                let findings = draft.summary.len();
                self.notes.draft(draft);
                self.record(CallEventPayload::SummaryDrafted { findings }).await;
                json!({"ok": true})
            }
            Ok(ToolInvocation::ReturnResult(args)) => {
                self.controller.terminate();
                let summary = self.notes.assemble(args, self.risk.summary());
                tracing::info!(call_id = %call_id, findings = summary.summary.len(), red_flags = summary.red_flags, "result returned");
                self.spawn_dispatch(summary);
                json!({"ok": true, "status": "result_recorded"})
            }
            Ok(ToolInvocation::Unknown(unknown)) => {
                tracing::warn!(call_id = %call_id, tool = %unknown, "unknown tool acknowledged as no-op");
                self.record(CallEventPayload::UnknownTool { name: unknown }).await;
                json!({"ok": false, "error": "unknown tool"})
            }
        };

        let acked = match self
            .relay
            .send_ai(&ClientEvent::tool_output(tool_call_id, &output))
            .await
        {
            Ok(()) => self.relay.send_ai(&ClientEvent::ResponseCreate).await,
            Err(e) => Err(e),
        };
        acked.err().map(|_| SessionEnd::AiLost("send failed".to_string()))
    }

    fn spawn_dispatch(&mut self, summary: carebridge_types::ClinicalSummary) {
        let dispatch = ResultDispatch {
            call_id: self.ctx.call_id.clone(),
            callback_url: self.ctx.callback_url.clone(),
            agent_name: self.state.bridge.agent_name.clone(),
            timeout: Duration::from_millis(self.state.bridge.callback_timeout_ms),
        };
        let pool = self.state.pool.clone();
        let http = self.state.http.clone();
        self.dispatch = Some(tokio::spawn(async move {
            if let Err(e) = dispatch.run(&pool, &http, summary).await {
                tracing::error!(call_id = %dispatch.call_id, "failed to record result: {}", e);
            }
        }));
    }

    async fn on_biomarker(&mut self, text: &str) {
        let message: BiomarkerOutput = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(call_id = %self.ctx.call_id, "malformed biomarker message discarded: {}", e);
                return;
            }
        };
        let Some(observation) = self.risk.observe(&message) else {
            return;
        };

        let call_id = self.ctx.call_id.clone();
        let threshold = self.risk.threshold();
        let persisted = store::blocking(&self.state.pool, move |conn| {
            persist_observation(conn, &call_id, &observation, threshold)
        })
        .await;
        match persisted {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => tracing::warn!(call_id = %self.ctx.call_id, "failed to record risk: {}", e),
        }

        if observation.crossed {
            let advisory = ClientEvent::system_message(advisory_text(observation.risk));
            let sent = match self.relay.send_ai(&advisory).await {
                Ok(()) => self.relay.send_ai(&ClientEvent::ResponseCreate).await,
                Err(e) => Err(e),
            };
            match sent {
                Ok(()) => {
                    self.risk.advisory_sent();
                    tracing::warn!(call_id = %self.ctx.call_id, risk = observation.risk, "high-risk advisory injected");
                }
                Err(e) => tracing::warn!(call_id = %self.ctx.call_id, "advisory not delivered: {}", e),
            }
        }
    }

    async fn biomarker_lost(&mut self, detail: &str) {
        if self.biomarker_rx.take().is_none() && !self.relay.has_biomarker() {
            return;
        }
        self.relay.detach_biomarker();
        tracing::warn!(call_id = %self.ctx.call_id, "biomarker stream lost: {}", detail);
        self.record(CallEventPayload::UpstreamLost {
            upstream: BIOMARKER_UPSTREAM.to_string(),
            detail: detail.to_string(),
        })
        .await;
    }

    async fn finish(mut self, end: SessionEnd) {
        let call_id = self.ctx.call_id.clone();
        let had_result = !self.controller.terminate();
        tracing::info!(call_id = %call_id, ?end, had_result, "bridge session ending");

        if let Some(dispatch) = self.dispatch.take() {
            if let Err(e) = dispatch.await {
                tracing::error!(call_id = %call_id, "result dispatch task failed: {}", e);
            }
        }

        let (code, reason) = match &end {
            SessionEnd::AiLost(detail) if !had_result => {
                self.record(CallEventPayload::UpstreamLost {
                    upstream: AI_UPSTREAM.to_string(),
                    detail: detail.clone(),
                })
                .await;
                if let Err(e) = self.tracker.fail(format!("AI engine connection lost: {detail}")).await {
                    tracing::warn!(call_id = %call_id, "failed to mark call failed: {}", e);
                }
                (close_code::AI_UNAVAILABLE, "AI engine connection lost")
            }
            _ => {
                if let Err(e) = self
                    .tracker
                    .advance(CallStatus::Completed, Some("stream ended".to_string()))
                    .await
                {
                    tracing::warn!(call_id = %call_id, "failed to complete call: {}", e);
                }
                (close_code::NORMAL, "stream ended")
            }
        };

        let counters = self.relay.counters();
        self.record(CallEventPayload::StreamStopped {
            inbound_frames: counters.inbound,
            forwarded_frames: counters.forwarded,
            mirrored_frames: counters.mirrored,
            outbound_frames: counters.outbound,
            dropped_preroll_frames: counters.dropped_preroll,
            skipped_mirror_frames: counters.mirror_skipped,
        })
        .await;

        self.claim.release().await;
        if !matches!(end, SessionEnd::TransportClosed) {
            self.relay.close_transport(code, reason).await;
        }
        tracing::info!(
            call_id = %call_id,
            inbound = counters.inbound,
            forwarded = counters.forwarded,
            mirrored = counters.mirrored,
            outbound = counters.outbound,
            dropped_preroll = counters.dropped_preroll,
            mirror_skipped = counters.mirror_skipped,
            "bridge session closed"
        );
    }

    async fn record(&self, payload: CallEventPayload) {
        record_event(&self.state.pool, &self.ctx.call_id, payload).await;
    }
}

async fn recv_optional(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
