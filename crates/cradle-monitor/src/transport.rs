//! Peer-to-peer video transport seam.
//!
//! Negotiation internals live behind `RtcTransport`. The monitor only hands a
//! frame receiver and the remote description over, and keeps the resulting
//! session in a `SessionSlot` shared with shutdown cleanup.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use cradle_media::FrameReceiver;

use crate::error::{MonitorError, MonitorResult};

/// Public STUN servers used for connectivity checks.
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// A negotiated session streaming frames to one viewer.
#[async_trait]
pub trait RtcSession: Send + Sync {
    /// Local session description to send back as the answer.
    fn local_description(&self) -> &str;

    /// Stop streaming and release the connection. Idempotent.
    async fn close(&self);
}

/// Builds sessions from remote offers.
#[async_trait]
pub trait RtcTransport: Send + Sync {
    async fn negotiate(
        &self,
        remote_sdp: &str,
        frames: FrameReceiver,
        ice_servers: &[String],
    ) -> MonitorResult<Box<dyn RtcSession>>;
}

/// Holder for the single active session.
#[derive(Clone, Default)]
pub struct SessionSlot {
    inner: Arc<Mutex<Option<Box<dyn RtcSession>>>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close and drop the active session. Returns whether one existed.
    pub async fn close_active(&self) -> bool {
        let session = self.inner.lock().await.take();
        match session {
            Some(session) => {
                session.close().await;
                info!("Closed active session");
                true
            }
            None => false,
        }
    }

    /// Make `session` the active one, closing any previous session.
    pub async fn install(&self, session: Box<dyn RtcSession>) {
        let previous = self.inner.lock().await.replace(session);
        if let Some(previous) = previous {
            debug!("Replacing active session");
            previous.close().await;
        }
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

/// Transport that declines every offer, for monitors run without live video.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTransport;

#[async_trait]
impl RtcTransport for DisabledTransport {
    async fn negotiate(
        &self,
        _remote_sdp: &str,
        _frames: FrameReceiver,
        _ice_servers: &[String],
    ) -> MonitorResult<Box<dyn RtcSession>> {
        Err(MonitorError::transport(
            "live video is disabled",
        ))
    }
}
