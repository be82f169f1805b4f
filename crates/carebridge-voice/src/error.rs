use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("invalid upstream request for {upstream}: {detail}")]
    InvalidRequest { upstream: &'static str, detail: String },

    #[error("failed to connect to {upstream}: {detail}")]
    Connect { upstream: &'static str, detail: String },

    #[error("timed out connecting to {upstream} after {timeout_ms} ms")]
    Timeout { upstream: &'static str, timeout_ms: u64 },

    #[error("{upstream} connection closed")]
    Closed { upstream: &'static str },
}
