//! Signaling client.
//!
//! Keeps a websocket to the coordination server, registers the device, and
//! answers viewer offers by negotiating a transport session fed from the
//! frame bus. The link is pinged while idle and dropped when the server stops
//! answering. Any connection error leads to a fixed-delay reconnect; the loop
//! only ends on shutdown.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};
use url::Url;

use cradle_media::FrameBus;
use cradle_models::{DeviceId, InboundMessage, OutboundMessage};

use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::metrics;
use crate::transport::{RtcTransport, SessionSlot};

/// Control channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Connected and registered, waiting for offers
    Registered,
}

/// Signaling client settings.
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    pub url: Url,
    pub device_id: DeviceId,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    /// Silence allowed past one ping period
    pub idle_timeout: Duration,
    pub ice_servers: Vec<String>,
}

impl SignalingConfig {
    pub fn from_monitor(config: &MonitorConfig) -> MonitorResult<Self> {
        Ok(Self {
            url: config.signaling_url()?,
            device_id: config.device_id.clone(),
            reconnect_delay: config.reconnect_delay,
            connect_timeout: config.connect_timeout,
            ping_interval: config.ping_interval,
            idle_timeout: config.idle_timeout,
            ice_servers: config.stun_servers.clone(),
        })
    }
}

pub struct SignalingClient {
    config: SignalingConfig,
    transport: Arc<dyn RtcTransport>,
    frames: FrameBus,
    sessions: SessionSlot,
    state: watch::Sender<ConnectionState>,
}

impl SignalingClient {
    pub fn new(
        config: SignalingConfig,
        transport: Arc<dyn RtcTransport>,
        frames: FrameBus,
        sessions: SessionSlot,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            transport,
            frames,
            sessions,
            state,
        }
    }

    /// Observe connection state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(url = %self.config.url, "Starting signaling client");

        let mut attempt: u64 = 0;
        while !*shutdown.borrow() {
            attempt += 1;
            self.set_state(ConnectionState::Connecting);

            let result = tokio::select! {
                result = self.connect_and_serve() => result,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            self.set_state(ConnectionState::Disconnected);
            match result {
                Ok(()) => {
                    info!(attempt, "Signaling connection closed by server");
                    metrics::record_signaling_connection("closed");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Signaling connection failed");
                    metrics::record_signaling_connection("failed");
                }
            }

            info!(
                delay_secs = self.config.reconnect_delay.as_secs_f64(),
                "Reconnecting to signaling server"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Signaling client stopped");
    }

    async fn connect_and_serve(&self) -> MonitorResult<()> {
        let (ws, _) = tokio::time::timeout(
            self.config.connect_timeout,
            connect_async(self.config.url.as_str()),
        )
        .await
        .map_err(|_| MonitorError::timeout("signaling connect"))??;
        metrics::record_signaling_connection("connected");
        let (mut write, mut read) = ws.split();

        send_json(&mut write, &OutboundMessage::register(self.config.device_id.clone())).await?;
        self.set_state(ConnectionState::Registered);
        info!(device_id = %self.config.device_id, "Registered with signaling server");

        let ping_interval = self.config.ping_interval.max(Duration::from_millis(1));
        let max_silence = ping_interval + self.config.idle_timeout;
        let mut keepalive = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                message = read.next() => {
                    let Some(message) = message else { break };
                    last_seen = Instant::now();
                    match message? {
                        Message::Text(text) => self.handle_text(&text, &mut write).await?,
                        Message::Close(frame) => {
                            debug!(?frame, "Server sent close frame");
                            break;
                        }
                        _ => {}
                    }
                }
                _ = keepalive.tick() => {
                    let silence = last_seen.elapsed();
                    if silence >= max_silence {
                        return Err(MonitorError::timeout(format!(
                            "no signaling traffic for {} ms",
                            silence.as_millis()
                        )));
                    }
                    write.send(Message::Ping(Vec::new())).await?;
                }
            }
        }

        Ok(())
    }

    async fn handle_text<S>(&self, text: &str, write: &mut S) -> MonitorResult<()>
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let message: InboundMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Ignoring unparseable signaling message");
                return Ok(());
            }
        };

        let (sdp, sender_id) = match message {
            InboundMessage::Offer { sdp, sender_id } => (sdp, sender_id),
            InboundMessage::Other => return Ok(()),
        };

        info!(sender_id = sender_id.as_deref().unwrap_or("unknown"), "Session offer received");

        // A new offer replaces whatever session is streaming
        self.sessions.close_active().await;

        let session = match self
            .transport
            .negotiate(&sdp, self.frames.subscribe(), &self.config.ice_servers)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Session negotiation failed");
                metrics::record_session("failed");
                return Ok(());
            }
        };

        let answer = OutboundMessage::answer(session.local_description(), sender_id);
        self.sessions.install(session).await;
        metrics::record_session("negotiated");

        send_json(write, &answer).await?;
        info!("Session answer sent");
        Ok(())
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "Signaling state changed");
        }
    }
}

async fn send_json<S>(write: &mut S, message: &OutboundMessage) -> MonitorResult<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(message)?;
    write.send(Message::Text(text)).await?;
    Ok(())
}

/// Resolves once shutdown is requested or the sender is gone.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
