//! Monitor configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use cradle_media::{PipelineDescriptor, SysfsLightSensor};
use cradle_models::{ClassRole, DeviceId, OperatingMode};

use crate::aggregator::RoleKeywords;
use crate::error::{MonitorError, MonitorResult};
use crate::transport::DEFAULT_STUN_SERVERS;

/// Camera pipeline and model used while a mode is active.
#[derive(Debug, Clone)]
pub struct ModeProfile {
    pub model_path: PathBuf,
    pub pipeline: PipelineDescriptor,
}

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Identity used for signaling registration and alert payloads
    pub device_id: DeviceId,
    /// Base URL of the coordination server (`https://...`)
    pub server_url: Url,
    /// Continuous risk required before DANGER
    pub hold_duration: Duration,
    /// Gap in risk observations tolerated before an episode is cleared
    pub grace_period: Duration,
    /// Inference loop tick
    pub tick_interval: Duration,
    /// Wait after a failed model load or camera open
    pub mode_retry_delay: Duration,
    /// Wait after a failed frame read
    pub frame_retry_delay: Duration,
    /// Wait after an unexpected loop error
    pub error_cooldown: Duration,
    /// Wait before reconnecting the signaling channel
    pub reconnect_delay: Duration,
    /// Upper bound on opening the signaling channel
    pub connect_timeout: Duration,
    /// Keepalive ping period on the signaling channel
    pub ping_interval: Duration,
    /// Silence tolerated past one ping period before the channel is dropped
    pub idle_timeout: Duration,
    /// Upper bound on one alert POST
    pub alert_timeout: Duration,
    pub bright: ModeProfile,
    pub dark: ModeProfile,
    /// Minimum detector score
    pub confidence_threshold: f32,
    /// GPIO pin wired to the light sensor
    pub sensor_pin: u32,
    pub gpio_root: PathBuf,
    pub stun_servers: Vec<String>,
    /// `danger` field of the alert payload
    pub danger_label: String,
    pub role_keywords: RoleKeywords,
    /// Prometheus exporter port, disabled when unset
    pub metrics_port: Option<u16>,
}

const DEFAULT_SERVER_URL: &str = "http://localhost:8080";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 15;

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device_id: DeviceId::new("jetson-001"),
            server_url: Url::parse(DEFAULT_SERVER_URL).expect("default server URL is valid"),
            hold_duration: Duration::from_secs(60),
            grace_period: Duration::from_secs(3),
            tick_interval: Duration::from_millis(33), // ~30 Hz
            mode_retry_delay: Duration::from_secs(2),
            frame_retry_delay: Duration::from_secs(1),
            error_cooldown: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(20),
            idle_timeout: Duration::from_secs(20),
            alert_timeout: Duration::from_secs(10),
            bright: ModeProfile {
                model_path: PathBuf::from("models/bright.onnx"),
                pipeline: PipelineDescriptor::usb(1, DEFAULT_WIDTH, DEFAULT_HEIGHT, DEFAULT_FPS),
            },
            dark: ModeProfile {
                model_path: PathBuf::from("models/dark.onnx"),
                pipeline: PipelineDescriptor::csi(0, 0, DEFAULT_WIDTH, DEFAULT_HEIGHT, DEFAULT_FPS),
            },
            confidence_threshold: 0.5,
            sensor_pin: 18,
            gpio_root: PathBuf::from(SysfsLightSensor::DEFAULT_ROOT),
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            danger_label: "face obstructed".to_string(),
            role_keywords: RoleKeywords::default(),
            metrics_port: None,
        }
    }
}

impl MonitorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> MonitorResult<Self> {
        let defaults = Self::default();

        let server_url = match std::env::var("CRADLE_SERVER_URL") {
            Ok(raw) => Url::parse(&raw)?,
            Err(_) => defaults.server_url.clone(),
        };
        if !matches!(server_url.scheme(), "http" | "https") {
            return Err(MonitorError::config(format!(
                "CRADLE_SERVER_URL must be http or https, got {}",
                server_url.scheme()
            )));
        }

        let width = env_parse("CRADLE_FRAME_WIDTH").unwrap_or(DEFAULT_WIDTH);
        let height = env_parse("CRADLE_FRAME_HEIGHT").unwrap_or(DEFAULT_HEIGHT);
        let fps = env_parse("CRADLE_CAMERA_FPS").unwrap_or(DEFAULT_FPS);

        let mut role_keywords = defaults.role_keywords.clone();
        for (role, key) in [
            (ClassRole::Subject, "CRADLE_SUBJECT_KEYWORDS"),
            (ClassRole::Mouth, "CRADLE_MOUTH_KEYWORDS"),
            (ClassRole::Nose, "CRADLE_NOSE_KEYWORDS"),
            (ClassRole::Pacifier, "CRADLE_PACIFIER_KEYWORDS"),
        ] {
            if let Some(list) = env_list(key) {
                role_keywords.set(role, list);
            }
        }

        Ok(Self {
            device_id: std::env::var("CRADLE_DEVICE_ID")
                .map(DeviceId::new)
                .unwrap_or(defaults.device_id),
            server_url,
            hold_duration: env_secs("CRADLE_HOLD_SECS").unwrap_or(defaults.hold_duration),
            grace_period: env_secs("CRADLE_GRACE_SECS").unwrap_or(defaults.grace_period),
            tick_interval: env_parse("CRADLE_TICK_MS")
                .and_then(positive_millis)
                .unwrap_or(defaults.tick_interval),
            mode_retry_delay: env_secs("CRADLE_MODE_RETRY_SECS")
                .unwrap_or(defaults.mode_retry_delay),
            frame_retry_delay: env_secs("CRADLE_FRAME_RETRY_SECS")
                .unwrap_or(defaults.frame_retry_delay),
            error_cooldown: env_secs("CRADLE_ERROR_COOLDOWN_SECS")
                .unwrap_or(defaults.error_cooldown),
            reconnect_delay: env_secs("CRADLE_RECONNECT_SECS").unwrap_or(defaults.reconnect_delay),
            connect_timeout: env_secs("CRADLE_CONNECT_TIMEOUT_SECS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.connect_timeout),
            ping_interval: env_secs("CRADLE_PING_SECS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.ping_interval),
            idle_timeout: env_secs("CRADLE_PING_TIMEOUT_SECS").unwrap_or(defaults.idle_timeout),
            alert_timeout: env_secs("CRADLE_ALERT_TIMEOUT_SECS").unwrap_or(defaults.alert_timeout),
            bright: ModeProfile {
                model_path: std::env::var("CRADLE_BRIGHT_MODEL")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.bright.model_path),
                pipeline: PipelineDescriptor::usb(
                    env_parse("CRADLE_USB_CAMERA").unwrap_or(1),
                    width,
                    height,
                    fps,
                ),
            },
            dark: ModeProfile {
                model_path: std::env::var("CRADLE_DARK_MODEL")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.dark.model_path),
                pipeline: PipelineDescriptor::csi(
                    env_parse("CRADLE_CSI_SENSOR").unwrap_or(0),
                    env_parse("CRADLE_CSI_FLIP").unwrap_or(0),
                    width,
                    height,
                    fps,
                ),
            },
            confidence_threshold: env_parse("CRADLE_CONFIDENCE")
                .unwrap_or(defaults.confidence_threshold),
            sensor_pin: env_parse("CRADLE_SENSOR_PIN").unwrap_or(defaults.sensor_pin),
            gpio_root: std::env::var("CRADLE_GPIO_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.gpio_root),
            stun_servers: env_list("CRADLE_STUN_SERVERS").unwrap_or(defaults.stun_servers),
            danger_label: std::env::var("CRADLE_DANGER_LABEL").unwrap_or(defaults.danger_label),
            role_keywords,
            metrics_port: env_parse("METRICS_PORT"),
        })
    }

    pub fn profile(&self, mode: OperatingMode) -> &ModeProfile {
        match mode {
            OperatingMode::Bright => &self.bright,
            OperatingMode::Dark => &self.dark,
        }
    }

    /// `{base}/api/alert`
    pub fn alert_url(&self) -> Url {
        let mut url = self.server_url.clone();
        let path = format!("{}/api/alert", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url
    }

    /// `{base}/api/ws` with the scheme swapped to its websocket counterpart.
    pub fn signaling_url(&self) -> MonitorResult<Url> {
        let mut url = self.server_url.clone();
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(MonitorError::config(format!(
                    "Cannot derive signaling URL from scheme {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| MonitorError::config("Failed to set websocket scheme"))?;
        let path = format!("{}/api/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

/// Zero is rejected so a misconfigured tick falls back to the default.
fn positive_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|s| parse_list(&s)).filter(|l| !l.is_empty())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
