//! Cradle monitor binary.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use cradle_media::{check_gst_launch, GstCameraOpener, SysfsLightSensor, YoloDetectorConfig, YoloDetectorFactory};
use cradle_monitor::{
    logging, metrics, Collaborators, HttpAlertClient, Monitor, MonitorConfig, WebRtcTransport,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    // Install rustls crypto provider (required for TLS/HTTPS and wss)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting cradle-monitor");

    let config = match MonitorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        device_id = %config.device_id,
        server = %config.server_url,
        hold_secs = config.hold_duration.as_secs(),
        grace_secs = config.grace_period.as_secs(),
        "Monitor config loaded"
    );

    if let Some(port) = config.metrics_port {
        match metrics::install_exporter(port) {
            Ok(()) => info!(port, "Metrics exporter listening"),
            Err(e) => warn!("Metrics disabled: {}", e),
        }
    }

    if let Err(e) = check_gst_launch() {
        warn!("Camera pipelines will fail until GStreamer is installed: {}", e);
    }

    let sensor = match SysfsLightSensor::open(&config.gpio_root, config.sensor_pin) {
        Ok(sensor) => Arc::new(sensor),
        Err(e) => {
            error!("Failed to open light sensor: {}", e);
            std::process::exit(1);
        }
    };

    let alerts = match HttpAlertClient::new(config.alert_url(), config.alert_timeout) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create alert client: {}", e);
            std::process::exit(1);
        }
    };

    let detector_config = YoloDetectorConfig {
        confidence_threshold: config.confidence_threshold,
        ..Default::default()
    };

    let collaborators = Collaborators {
        sensor,
        cameras: Arc::new(GstCameraOpener::default()),
        detectors: Arc::new(YoloDetectorFactory::new(detector_config)),
        alerts,
        transport: Arc::new(WebRtcTransport::default()),
    };

    let monitor = match Monitor::new(config, collaborators) {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("Failed to create monitor: {}", e);
            std::process::exit(1);
        }
    };

    // The sender lives in this task until the signal arrives
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    monitor.run(shutdown_rx).await;

    info!("Monitor shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
