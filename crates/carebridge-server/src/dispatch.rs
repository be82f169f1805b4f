//! Result dispatcher.
//!
//! Delivers the final clinical summary to the call's callback target with a
//! single POST. The outcome is recorded in the event log either way, the
//! summary is stored, and the call is moved to `completed`. Delivery is
//! never retried here.

use std::time::Duration;

use carebridge_calls::{record_summary, SummaryWrite};
use carebridge_db::DbPool;
use carebridge_observe::{emit_event, CallEventPayload};
use carebridge_types::{CallStatus, CallbackPayload, ClinicalSummary};

use crate::lifecycle::{advance_to, TransitionOutcome};
use crate::store::{self, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { http_status: u16 },
    Failed { detail: String, http_status: Option<u16> },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Everything a dispatch needs, detached from the session that asked for it.
#[derive(Debug, Clone)]
pub struct ResultDispatch {
    pub call_id: String,
    pub callback_url: String,
    pub agent_name: String,
    pub timeout: Duration,
}

impl ResultDispatch {
    pub fn payload(&self, summary: ClinicalSummary) -> CallbackPayload {
        CallbackPayload {
            call_id: self.call_id.clone(),
            summary,
            agent: self.agent_name.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Delivers `summary`, records the outcome and completes the call.
    pub async fn run(
        &self,
        pool: &DbPool,
        http: &reqwest::Client,
        summary: ClinicalSummary,
    ) -> Result<DeliveryOutcome, StoreError> {
        let payload = self.payload(summary);
        let outcome = deliver(http, &self.callback_url, &payload, self.timeout).await;
        match &outcome {
            DeliveryOutcome::Delivered { http_status } => tracing::info!(
                call_id = %self.call_id,
                http_status,
                "result delivered"
            ),
            DeliveryOutcome::Failed { detail, http_status } => tracing::warn!(
                call_id = %self.call_id,
                ?http_status,
                "result delivery failed: {}",
                detail
            ),
        }

        let call_id = self.call_id.clone();
        let callback_url = self.callback_url.clone();
        let recorded = outcome.clone();
        store::blocking(pool, move |conn| {
            let event = match recorded {
                DeliveryOutcome::Delivered { http_status } => CallEventPayload::ResultDelivered {
                    callback_url,
                    http_status,
                },
                DeliveryOutcome::Failed {
                    detail,
                    http_status,
                } => CallEventPayload::DeliveryFailed {
                    callback_url,
                    detail,
                    http_status,
                },
            };
            emit_event(conn, &call_id, &event)?;

            let delivered = matches!(event, CallEventPayload::ResultDelivered { .. });
            if record_summary(conn, &call_id, &payload.summary, delivered)?
                == SummaryWrite::AlreadyStored
            {
                tracing::warn!(call_id = %call_id, "summary already stored; keeping the first one");
            }

            if let TransitionOutcome::Discarded(status) =
                advance_to(conn, &call_id, CallStatus::Completed, None)?
            {
                tracing::info!(call_id = %call_id, status = %status, "call ended before result was recorded");
            }
            Ok(())
        })
        .await?;

        Ok(outcome)
    }
}

/// One POST of `payload` to `url`. Any 2xx response is success.
pub async fn deliver(
    http: &reqwest::Client,
    url: &str,
    payload: &CallbackPayload,
    timeout: Duration,
) -> DeliveryOutcome {
    match http.post(url).timeout(timeout).json(payload).send().await {
        Ok(response) if response.status().is_success() => DeliveryOutcome::Delivered {
            http_status: response.status().as_u16(),
        },
        Ok(response) => DeliveryOutcome::Failed {
            detail: format!("callback responded {}", response.status()),
            http_status: Some(response.status().as_u16()),
        },
        Err(e) => DeliveryOutcome::Failed {
            detail: e.to_string(),
            http_status: None,
        },
    }
}
