//! Audio relay between the transport, the AI session and the biomarker
//! stream.
//!
//! Inbound frames go to the AI session in arrival order. Until the session
//! is ready they wait in a bounded FIFO that drops its oldest frame when
//! full; once ready the FIFO is drained ahead of any newer frame. Every
//! inbound frame is also mirrored to the biomarker stream while that
//! connection is open. Agent audio goes back to the transport.

use std::collections::VecDeque;

use carebridge_voice::biomarker::BiomarkerInput;
use carebridge_voice::realtime::ClientEvent;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::transport::{OutboundMedia, TransportCommand, TransportOut};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("AI session connection closed")]
    AiClosed,
    #[error("transport connection closed")]
    TransportClosed,
}

/// Per-call frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayCounters {
    /// Inbound frames received from the transport.
    pub inbound: u64,
    /// Inbound frames delivered to the AI session.
    pub forwarded: u64,
    /// Inbound frames copied to the biomarker stream.
    pub mirrored: u64,
    /// Agent frames delivered to the transport.
    pub outbound: u64,
    /// Inbound frames evicted from the pre-ready buffer.
    pub dropped_preroll: u64,
    /// Inbound frames not mirrored because the biomarker stream was full.
    pub mirror_skipped: u64,
}

/// Result of mirroring one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror {
    Sent,
    /// No biomarker stream, or it is momentarily full (counted).
    Skipped,
    /// The biomarker stream went away with this frame.
    Lost,
}

pub struct AudioRelay {
    call_id: String,
    stream_sid: String,
    ai: mpsc::Sender<String>,
    biomarker: Option<mpsc::Sender<String>>,
    transport: mpsc::Sender<TransportOut>,
    preroll: VecDeque<String>,
    preroll_capacity: usize,
    counters: RelayCounters,
}

impl AudioRelay {
    pub fn new(
        call_id: impl Into<String>,
        stream_sid: impl Into<String>,
        ai: mpsc::Sender<String>,
        biomarker: Option<mpsc::Sender<String>>,
        transport: mpsc::Sender<TransportOut>,
        preroll_capacity: usize,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            stream_sid: stream_sid.into(),
            ai,
            biomarker,
            transport,
            preroll: VecDeque::with_capacity(preroll_capacity),
            preroll_capacity,
            counters: RelayCounters::default(),
        }
    }

    pub fn counters(&self) -> RelayCounters {
        self.counters
    }

    pub fn buffered(&self) -> usize {
        self.preroll.len()
    }

    pub fn has_biomarker(&self) -> bool {
        self.biomarker.is_some()
    }

    /// Handles one caller frame. Returns `true` if it reached the AI session.
    pub async fn inbound(&mut self, payload: String, ai_ready: bool) -> Result<(bool, Mirror), RelayError> {
        self.counters.inbound += 1;
        let mirror = self.mirror(&payload);

        if !ai_ready {
            self.buffer(payload);
            return Ok((false, mirror));
        }
        self.drain_preroll().await?;
        self.forward(payload).await?;
        Ok((true, mirror))
    }

    /// Sends every buffered frame to the AI session, oldest first.
    pub async fn drain_preroll(&mut self) -> Result<usize, RelayError> {
        let mut drained = 0;
        while let Some(payload) = self.preroll.pop_front() {
            self.forward(payload).await?;
            drained += 1;
        }
        if drained > 0 {
            tracing::debug!(call_id = %self.call_id, drained, "pre-ready audio drained");
        }
        Ok(drained)
    }

    /// Sends one agent audio chunk to the caller.
    pub async fn outbound(&mut self, payload: String) -> Result<(), RelayError> {
        let command = TransportCommand::Media {
            stream_sid: self.stream_sid.clone(),
            media: OutboundMedia { payload },
        };
        self.transport
            .send(TransportOut::Frame(command.to_json()))
            .await
            .map_err(|_| RelayError::TransportClosed)?;
        self.counters.outbound += 1;
        Ok(())
    }

    /// Tells the transport to drop queued agent audio (caller barge-in).
    pub async fn clear_outbound(&self) -> Result<(), RelayError> {
        let command = TransportCommand::Clear {
            stream_sid: self.stream_sid.clone(),
        };
        self.transport
            .send(TransportOut::Frame(command.to_json()))
            .await
            .map_err(|_| RelayError::TransportClosed)
    }

    pub async fn send_ai(&self, event: &ClientEvent) -> Result<(), RelayError> {
        self.ai
            .send(event.to_json())
            .await
            .map_err(|_| RelayError::AiClosed)
    }

    /// Best effort; a transport that is already gone needs no close frame.
    pub async fn close_transport(&self, code: u16, reason: &str) {
        let _ = self
            .transport
            .send(TransportOut::Close {
                code,
                reason: reason.to_string(),
            })
            .await;
    }

    pub fn detach_biomarker(&mut self) {
        self.biomarker = None;
    }

    async fn forward(&mut self, payload: String) -> Result<(), RelayError> {
        self.send_ai(&ClientEvent::append_audio(payload)).await?;
        self.counters.forwarded += 1;
        Ok(())
    }

    fn buffer(&mut self, payload: String) {
        if self.preroll_capacity == 0 {
            self.counters.dropped_preroll += 1;
            return;
        }
        if self.preroll.len() == self.preroll_capacity {
            self.preroll.pop_front();
            self.counters.dropped_preroll += 1;
        }
        self.preroll.push_back(payload);
    }

    fn mirror(&mut self, payload: &str) -> Mirror {
        let Some(tx) = &self.biomarker else {
            return Mirror::Skipped;
        };
        let message = BiomarkerInput::Audio {
            call_id: self.call_id.clone(),
            audio: payload.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        match tx.try_send(message.to_json()) {
            Ok(()) => {
                self.counters.mirrored += 1;
                Mirror::Sent
            }
            Err(TrySendError::Full(_)) => {
                self.counters.mirror_skipped += 1;
                tracing::warn!(call_id = %self.call_id, "biomarker stream backed up; frame not mirrored");
                Mirror::Skipped
            }
            Err(TrySendError::Closed(_)) => {
                self.biomarker = None;
                Mirror::Lost
            }
        }
    }
}
