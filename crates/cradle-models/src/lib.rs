//! Shared data models for the cradle monitor.
//!
//! This crate provides Serde-serializable types for:
//! - Operating modes driven by the ambient light sensor
//! - Risk status and status transitions
//! - Detector class roles and per-frame presence flags
//! - Device identity
//! - Signaling channel and alert endpoint message schemas

pub mod alert;
pub mod device;
pub mod mode;
pub mod presence;
pub mod signaling;
pub mod status;

// Re-export common types
pub use alert::AlertPayload;
pub use device::DeviceId;
pub use mode::{OperatingMode, ParseModeError};
pub use presence::{ClassRole, PresenceFlags};
pub use signaling::{InboundMessage, OutboundMessage};
pub use status::{RiskStatus, StatusChange};
