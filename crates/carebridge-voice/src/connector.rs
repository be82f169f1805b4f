use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use crate::config::{BiomarkerConfig, RealtimeConfig};
use crate::error::UpstreamError;
use crate::link::{spawn_ws_link, Link};

pub const AI_UPSTREAM: &str = "realtime";
pub const BIOMARKER_UPSTREAM: &str = "biomarker";

/// Opens the upstream connections for a bridged call.
///
/// The bridge only sees [`Link`]s, so a test harness can implement this
/// trait with in-process pairs and drive the far ends itself.
pub trait UpstreamConnector: Send + Sync {
    /// Connects to the realtime AI engine for `call_id`.
    fn open_ai(&self, call_id: &str) -> BoxFuture<'_, Result<Link, UpstreamError>>;

    /// Connects to the biomarker scorer. `Ok(None)` means the stream is
    /// disabled for this deployment.
    fn open_biomarker(&self, call_id: &str) -> BoxFuture<'_, Result<Option<Link>, UpstreamError>>;
}

/// Connects over websockets using the configured endpoints.
#[derive(Debug, Clone)]
pub struct WsConnector {
    realtime: RealtimeConfig,
    biomarker: BiomarkerConfig,
}

impl WsConnector {
    pub fn new(realtime: RealtimeConfig, biomarker: BiomarkerConfig) -> Self {
        Self {
            realtime,
            biomarker,
        }
    }
}

impl UpstreamConnector for WsConnector {
    fn open_ai(&self, call_id: &str) -> BoxFuture<'_, Result<Link, UpstreamError>> {
        let call_id = call_id.to_string();
        Box::pin(async move {
            let endpoint = self.realtime.endpoint();
            let mut request =
                endpoint
                    .as_str()
                    .into_client_request()
                    .map_err(|e| UpstreamError::InvalidRequest {
                        upstream: AI_UPSTREAM,
                        detail: e.to_string(),
                    })?;
            let auth = HeaderValue::from_str(&format!("Bearer {}", self.realtime.api_key))
                .map_err(|e| UpstreamError::InvalidRequest {
                    upstream: AI_UPSTREAM,
                    detail: e.to_string(),
                })?;
            request.headers_mut().insert("Authorization", auth);
            request
                .headers_mut()
                .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

            let timeout_ms = self.realtime.connect_timeout_ms;
            let (ws, _) = tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                tokio_tungstenite::connect_async(request),
            )
            .await
            .map_err(|_| UpstreamError::Timeout {
                upstream: AI_UPSTREAM,
                timeout_ms,
            })?
            .map_err(|e| UpstreamError::Connect {
                upstream: AI_UPSTREAM,
                detail: e.to_string(),
            })?;

            tracing::info!(call_id = %call_id, model = %self.realtime.model, "realtime session connected");
            Ok(spawn_ws_link(ws, AI_UPSTREAM))
        })
    }

    fn open_biomarker(&self, call_id: &str) -> BoxFuture<'_, Result<Option<Link>, UpstreamError>> {
        let call_id = call_id.to_string();
        Box::pin(async move {
            if !self.biomarker.is_enabled() {
                tracing::debug!(call_id = %call_id, "biomarker stream disabled");
                return Ok(None);
            }

            let timeout_ms = self.biomarker.connect_timeout_ms;
            let (ws, _) = tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                tokio_tungstenite::connect_async(self.biomarker.url.as_str()),
            )
            .await
            .map_err(|_| UpstreamError::Timeout {
                upstream: BIOMARKER_UPSTREAM,
                timeout_ms,
            })?
            .map_err(|e| UpstreamError::Connect {
                upstream: BIOMARKER_UPSTREAM,
                detail: e.to_string(),
            })?;

            tracing::info!(call_id = %call_id, url = %self.biomarker.url, "biomarker stream connected");
            Ok(Some(spawn_ws_link(ws, BIOMARKER_UPSTREAM)))
        })
    }
}
