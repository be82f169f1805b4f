//! Upstream voice connections for the call bridge.
//!
//! A bridged call talks to two upstreams besides the telephony transport:
//!
//! - the realtime AI engine, a bidirectional JSON event session that
//!   consumes caller audio and produces agent audio and tool invocations;
//! - the vocal-biomarker scorer, which consumes a mirror of the caller's
//!   audio and replies with risk scores.
//!
//! This crate owns their message shapes and the connection plumbing. Every
//! connection is exposed to the bridge as a [`Link`]: a pair of bounded
//! channels carrying text frames, so the bridge never touches sockets
//! directly and tests can substitute in-process links.

pub mod biomarker;
pub mod config;
pub mod connector;
pub mod error;
pub mod link;
pub mod realtime;

pub use config::{BiomarkerConfig, RealtimeConfig, TurnDetectionConfig};
pub use connector::{UpstreamConnector, WsConnector};
pub use error::UpstreamError;
pub use link::Link;
