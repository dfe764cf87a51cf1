//! Alert delivery.
//!
//! Only status transitions reach the dispatcher's bookkeeping, and only a
//! transition into DANGER produces a network call. Delivery is fire-and-forget:
//! a failed POST is logged and never retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use cradle_models::{AlertPayload, DeviceId, RiskStatus, StatusChange};

use crate::error::{MonitorError, MonitorResult};
use crate::metrics;

/// Destination for danger alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, payload: &AlertPayload) -> MonitorResult<()>;
}

/// Posts alerts as JSON to `{base}/api/alert`.
#[derive(Clone)]
pub struct HttpAlertClient {
    http: Client,
    url: Url,
}

impl HttpAlertClient {
    pub fn new(url: Url, timeout: Duration) -> MonitorResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl AlertSink for HttpAlertClient {
    async fn send(&self, payload: &AlertPayload) -> MonitorResult<()> {
        let response = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(MonitorError::AlertRejected(status.as_u16()));
        }
        Ok(())
    }
}

/// Result of feeding one status to the dispatcher.
#[derive(Debug)]
pub struct Dispatch {
    /// Set when the status differs from the last one seen
    pub change: Option<StatusChange>,
    /// Background delivery, set only when entering DANGER. Resolves to
    /// whether the endpoint accepted the alert.
    pub delivery: Option<JoinHandle<bool>>,
}

/// Deduplicates status updates into alerts.
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    device_id: DeviceId,
    danger_label: String,
    timeout: Duration,
    last_sent: RiskStatus,
}

impl AlertDispatcher {
    pub fn new(
        sink: Arc<dyn AlertSink>,
        device_id: DeviceId,
        danger_label: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            sink,
            device_id,
            danger_label: danger_label.into(),
            timeout,
            last_sent: RiskStatus::Safe,
        }
    }

    pub fn last_sent(&self) -> RiskStatus {
        self.last_sent
    }

    /// Record the current status. Must be called from within a Tokio runtime.
    pub fn dispatch(&mut self, status: RiskStatus) -> Dispatch {
        if status == self.last_sent {
            return Dispatch {
                change: None,
                delivery: None,
            };
        }

        let change = StatusChange::new(self.last_sent, status);
        info!(
            from = %change.from,
            to = %change.to,
            at = %change.at.format("%H:%M:%S"),
            "Status changed"
        );
        metrics::record_status(status);
        self.last_sent = status;

        let delivery = change.enters_danger().then(|| self.spawn_delivery());

        Dispatch {
            change: Some(change),
            delivery,
        }
    }

    fn spawn_delivery(&self) -> JoinHandle<bool> {
        let sink = self.sink.clone();
        let payload = AlertPayload::new(self.device_id.clone(), self.danger_label.clone());
        let timeout = self.timeout;

        tokio::spawn(async move {
            let delivered = match tokio::time::timeout(timeout, sink.send(&payload)).await {
                Ok(Ok(())) => {
                    info!(device_id = %payload.device_id, danger = %payload.danger, "Alert delivered");
                    true
                }
                Ok(Err(e)) => {
                    warn!(device_id = %payload.device_id, error = %e, "Alert delivery failed");
                    false
                }
                Err(_) => {
                    warn!(
                        device_id = %payload.device_id,
                        timeout_secs = timeout.as_secs(),
                        "Alert delivery timed out"
                    );
                    false
                }
            };
            metrics::record_alert(delivered);
            delivered
        })
    }
}
