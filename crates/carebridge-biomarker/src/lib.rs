//! Vocal-biomarker scoring service.
//!
//! Receives a mirror of each caller's μ-law audio over a websocket, scores
//! it in three-second segments against the caller's own recent history and
//! replies with a drift risk in `[0, 1]`.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod features;
pub mod model;
pub mod scorer;
pub mod service;

pub use config::ServiceConfig;
pub use error::BiomarkerError;
pub use scorer::Scorer;
pub use service::app;

/// Telephony audio sample rate.
pub const SAMPLE_RATE: u32 = 8_000;

/// Samples per scored segment (three seconds).
pub const SEGMENT_SAMPLES: usize = 3 * SAMPLE_RATE as usize;
