//! Monitor metrics.
//!
//! Counters and gauges for the detection loop, alerting and signaling. A
//! Prometheus exporter is installed only when a metrics port is configured.

use std::net::{Ipv4Addr, SocketAddrV4};

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use cradle_models::{OperatingMode, RiskStatus};

use crate::error::{MonitorError, MonitorResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const FRAMES_PROCESSED_TOTAL: &str = "cradle_frames_processed_total";
    pub const MODE_SWITCHES_TOTAL: &str = "cradle_mode_switches_total";
    pub const MODE_SWITCH_FAILURES_TOTAL: &str = "cradle_mode_switch_failures_total";
    pub const LOOP_ERRORS_TOTAL: &str = "cradle_loop_errors_total";

    pub const RISK_STATUS: &str = "cradle_risk_status";
    pub const STATUS_TRANSITIONS_TOTAL: &str = "cradle_status_transitions_total";
    pub const ALERTS_TOTAL: &str = "cradle_alerts_total";

    pub const SIGNALING_CONNECTIONS_TOTAL: &str = "cradle_signaling_connections_total";
    pub const SESSIONS_TOTAL: &str = "cradle_sessions_total";
}

/// Serve `/metrics` on the given port.
pub fn install_exporter(port: u16) -> MonitorResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
        .install()
        .map_err(|e| MonitorError::config(format!("Failed to install metrics exporter: {}", e)))
}

pub fn record_frame_processed(mode: Option<OperatingMode>) {
    let mode = mode.map(|m| m.as_str()).unwrap_or("none");
    counter!(names::FRAMES_PROCESSED_TOTAL, "mode" => mode).increment(1);
}

pub fn record_mode_switch(mode: OperatingMode) {
    counter!(names::MODE_SWITCHES_TOTAL, "mode" => mode.as_str()).increment(1);
}

pub fn record_mode_switch_failure(stage: &'static str) {
    counter!(names::MODE_SWITCH_FAILURES_TOTAL, "stage" => stage).increment(1);
}

pub fn record_loop_error() {
    counter!(names::LOOP_ERRORS_TOTAL).increment(1);
}

pub fn record_status(status: RiskStatus) {
    gauge!(names::RISK_STATUS).set(status.level() as f64);
    counter!(names::STATUS_TRANSITIONS_TOTAL, "to" => status.as_str()).increment(1);
}

pub fn record_alert(delivered: bool) {
    let outcome = if delivered { "delivered" } else { "failed" };
    counter!(names::ALERTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_signaling_connection(outcome: &'static str) {
    counter!(names::SIGNALING_CONNECTIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_session(outcome: &'static str) {
    counter!(names::SESSIONS_TOTAL, "outcome" => outcome).increment(1);
}
