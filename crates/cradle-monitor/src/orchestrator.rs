//! Monitor orchestration.
//!
//! `MonitorLoop` runs mode selection, detection, risk tracking and alert
//! dispatch on a fixed tick. `Monitor` runs it next to the signaling client
//! until shutdown, then performs cleanup once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn, Instrument};

use cradle_media::{CameraOpener, DetectorFactory, FrameBus, LightSensor};
use cradle_models::{OperatingMode, PresenceFlags, RiskStatus};

use crate::aggregator::DetectionAggregator;
use crate::alert::{AlertDispatcher, AlertSink};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::logging;
use crate::metrics;
use crate::mode_selector::{ModeSelector, ModeStep};
use crate::risk::RiskStateMachine;
use crate::signaling::{wait_for_shutdown, ConnectionState, SignalingClient, SignalingConfig};
use crate::transport::{RtcTransport, SessionSlot};

/// Shortest tick the loop will run at.
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// External collaborators the monitor drives.
#[derive(Clone)]
pub struct Collaborators {
    pub sensor: Arc<dyn LightSensor>,
    pub cameras: Arc<dyn CameraOpener>,
    pub detectors: Arc<dyn DetectorFactory>,
    pub alerts: Arc<dyn AlertSink>,
    pub transport: Arc<dyn RtcTransport>,
}

/// Result of one inference tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Processed {
        mode: OperatingMode,
        presence: PresenceFlags,
        status: RiskStatus,
    },
    /// Nothing processed; wait before the next tick.
    Backoff(Duration),
}

/// The inference loop.
pub struct MonitorLoop {
    selector: ModeSelector,
    aggregator: DetectionAggregator,
    risk: RiskStateMachine,
    alerts: AlertDispatcher,
    frames: FrameBus,
    tick_interval: Duration,
    frame_retry_delay: Duration,
    error_cooldown: Duration,
    status: watch::Sender<RiskStatus>,
}

impl MonitorLoop {
    pub fn new(config: &MonitorConfig, collaborators: &Collaborators, frames: FrameBus) -> Self {
        let (status, _) = watch::channel(RiskStatus::Safe);
        Self {
            selector: ModeSelector::new(
                collaborators.sensor.clone(),
                collaborators.cameras.clone(),
                collaborators.detectors.clone(),
                config,
            ),
            aggregator: DetectionAggregator::new(config.role_keywords.clone()),
            risk: RiskStateMachine::new(config.hold_duration, config.grace_period),
            alerts: AlertDispatcher::new(
                collaborators.alerts.clone(),
                config.device_id.clone(),
                config.danger_label.clone(),
                config.alert_timeout,
            ),
            frames,
            tick_interval: config.tick_interval.max(MIN_TICK_INTERVAL),
            frame_retry_delay: config.frame_retry_delay,
            error_cooldown: config.error_cooldown,
            status,
        }
    }

    /// Observe status transitions.
    pub fn status(&self) -> watch::Receiver<RiskStatus> {
        self.status.subscribe()
    }

    pub fn aggregator(&self) -> &DetectionAggregator {
        &self.aggregator
    }

    /// Process one frame.
    pub async fn tick(&mut self) -> MonitorResult<TickOutcome> {
        let mode = match self.selector.ensure_mode().await? {
            ModeStep::Ready { mode, .. } => mode,
            ModeStep::Backoff(delay) => return Ok(TickOutcome::Backoff(delay)),
        };

        let frame = match self.selector.read_frame().await {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!(mode = %mode, error = %e, "Frame read failed, reopening camera");
                self.selector.invalidate();
                return Ok(TickOutcome::Backoff(self.frame_retry_delay));
            }
        };
        self.frames.publish(frame.clone());

        let detector = self
            .selector
            .detector()
            .ok_or_else(|| MonitorError::internal("no active detector"))?;
        let generation = self.selector.generation();
        let resolve = self.aggregator.needs_resolution(generation);

        let (detections, names) = tokio::task::spawn_blocking(move || {
            let detections = detector.detect(&frame);
            let names = resolve.then(|| detector.class_names());
            (detections, names)
        })
        .await
        .map_err(|e| MonitorError::task(format!("detection task failed: {}", e)))?;

        if let Some(names) = names {
            self.aggregator.apply_resolution(generation, names);
        }
        let detections = detections?;

        let presence = self.aggregator.aggregate(&detections);
        let status = self.risk.update(presence.risk_condition(), Instant::now());
        if self.alerts.dispatch(status).change.is_some() {
            self.status.send_replace(status);
        }
        metrics::record_frame_processed(Some(mode));

        Ok(TickOutcome::Processed {
            mode,
            presence,
            status,
        })
    }

    /// Tick until `shutdown` turns true.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_ms = self.tick_interval.as_millis() as u64,
            "Starting monitoring loop"
        );

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }

            let outcome = tokio::select! {
                outcome = self.tick() => outcome,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            let delay = match outcome {
                Ok(TickOutcome::Processed { .. }) => continue,
                Ok(TickOutcome::Backoff(delay)) => delay,
                Err(e) => {
                    error!(error = %e, transient = e.is_transient(), "Monitoring loop error");
                    metrics::record_loop_error();
                    self.error_cooldown
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
            interval.reset();
        }

        info!("Monitoring loop stopped");
    }

    /// Release the camera and detector.
    pub async fn release(&mut self) {
        self.selector.release().await;
    }
}

/// The whole device monitor: inference loop plus signaling client.
pub struct Monitor {
    config: MonitorConfig,
    sensor: Arc<dyn LightSensor>,
    monitor_loop: MonitorLoop,
    signaling: SignalingClient,
    sessions: SessionSlot,
    frames: FrameBus,
}

impl Monitor {
    pub fn new(config: MonitorConfig, collaborators: Collaborators) -> MonitorResult<Self> {
        let frames = FrameBus::new();
        let sessions = SessionSlot::new();

        let signaling = SignalingClient::new(
            SignalingConfig::from_monitor(&config)?,
            collaborators.transport.clone(),
            frames.clone(),
            sessions.clone(),
        );
        let monitor_loop = MonitorLoop::new(&config, &collaborators, frames.clone());

        Ok(Self {
            config,
            sensor: collaborators.sensor,
            monitor_loop,
            signaling,
            sessions,
            frames,
        })
    }

    pub fn status(&self) -> watch::Receiver<RiskStatus> {
        self.monitor_loop.status()
    }

    pub fn signaling_state(&self) -> watch::Receiver<ConnectionState> {
        self.signaling.state()
    }

    pub fn sessions(&self) -> SessionSlot {
        self.sessions.clone()
    }

    pub fn frames(&self) -> FrameBus {
        self.frames.clone()
    }

    /// Run both loops until shutdown, then release every resource once.
    ///
    /// Dropping the `watch::Sender` also counts as shutdown, so the sender
    /// must outlive the run.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) {
        let span = logging::device_span(&self.config.device_id);

        async move {
            info!("Monitor starting");

            tokio::join!(
                self.monitor_loop
                    .run(shutdown.clone())
                    .instrument(logging::loop_span("inference")),
                self.signaling
                    .run(shutdown.clone())
                    .instrument(logging::loop_span("signaling")),
            );

            info!("Cleaning up");
            self.monitor_loop.release().await;
            self.sessions.close_active().await;
            if let Err(e) = self.sensor.release() {
                warn!(error = %e, "Failed to release light sensor");
            }
            info!("All resources released");
        }
        .instrument(span)
        .await
    }
}
