//! Infant monitoring orchestration core.
//!
//! This crate provides:
//! - Light-driven switching between the visible and infrared pipelines
//! - Aggregation of detector output into presence flags
//! - The debounced SAFE/WARNING/DANGER risk state machine
//! - Deduplicated alert dispatch to the remote endpoint
//! - A reconnecting signaling client that hands live frames to a transport
//! - A WebRTC transport streaming those frames as H.264
//! - The orchestrator running both loops until shutdown

pub mod aggregator;
pub mod alert;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod mode_selector;
pub mod orchestrator;
pub mod risk;
pub mod signaling;
pub mod transport;
pub mod webrtc_transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregator::{ClassRoleMap, DetectionAggregator, RoleKeywords};
pub use alert::{AlertDispatcher, AlertSink, Dispatch, HttpAlertClient};
pub use config::{ModeProfile, MonitorConfig};
pub use error::{MonitorError, MonitorResult};
pub use mode_selector::{ModeSelector, ModeStep};
pub use orchestrator::{Collaborators, Monitor, MonitorLoop, TickOutcome};
pub use risk::{RiskEpisode, RiskStateMachine};
pub use signaling::{ConnectionState, SignalingClient, SignalingConfig};
pub use transport::{DisabledTransport, RtcSession, RtcTransport, SessionSlot};
pub use webrtc_transport::{H264Encoder, WebRtcSession, WebRtcTransport};
