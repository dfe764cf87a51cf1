//! WebRTC video transport.
//!
//! Answers a viewer offer with a send-only H.264 track. Frames are pulled
//! from the frame bus on a blocking worker, encoded with OpenH264 and written
//! as samples until the session is closed or the peer connection fails.
//! ICE candidates are gathered before the answer is returned, so no trickle
//! messages are needed on the signaling channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use openh264::encoder::Encoder;
use openh264::formats::{RgbSliceU8, YUVBuffer};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use cradle_media::{Frame, FrameReceiver};

use crate::error::{MonitorError, MonitorResult};
use crate::signaling::wait_for_shutdown;
use crate::transport::{RtcSession, RtcTransport};

/// Sample duration used until two frames have been seen.
const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(33);

/// Constrained baseline, the profile OpenH264 produces.
const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// Transport that streams the frame bus to browsers over WebRTC.
#[derive(Debug, Clone)]
pub struct WebRtcTransport {
    /// Upper bound on ICE candidate gathering before the answer is sent
    pub gather_timeout: Duration,
}

impl Default for WebRtcTransport {
    fn default() -> Self {
        Self {
            gather_timeout: Duration::from_secs(5),
        }
    }
}

impl WebRtcTransport {
    pub fn new(gather_timeout: Duration) -> Self {
        Self { gather_timeout }
    }

    async fn answer(
        &self,
        peer: &Arc<RTCPeerConnection>,
        remote_sdp: &str,
    ) -> MonitorResult<(String, Arc<TrackLocalStaticSample>)> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: 90_000,
                sdp_fmtp_line: H264_FMTP.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "cradle".to_owned(),
        ));

        let sender = peer
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(rtc_error("add video track"))?;

        // RTCP has to be read for the interceptors to run
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        let offer = RTCSessionDescription::offer(remote_sdp.to_owned())
            .map_err(rtc_error("parse offer"))?;
        peer.set_remote_description(offer)
            .await
            .map_err(rtc_error("set remote description"))?;

        let answer = peer
            .create_answer(None)
            .await
            .map_err(rtc_error("create answer"))?;
        let mut gathered = peer.gathering_complete_promise().await;
        peer.set_local_description(answer)
            .await
            .map_err(rtc_error("set local description"))?;

        if tokio::time::timeout(self.gather_timeout, gathered.recv())
            .await
            .is_err()
        {
            warn!(
                timeout_ms = self.gather_timeout.as_millis() as u64,
                "ICE gathering incomplete, answering with partial candidates"
            );
        }

        let local = peer
            .local_description()
            .await
            .ok_or_else(|| MonitorError::transport("no local description after answer"))?;

        Ok((local.sdp, track))
    }
}

#[async_trait]
impl RtcTransport for WebRtcTransport {
    async fn negotiate(
        &self,
        remote_sdp: &str,
        frames: FrameReceiver,
        ice_servers: &[String],
    ) -> MonitorResult<Box<dyn RtcSession>> {
        let api = build_api()?;
        let peer = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers: ice_server_list(ice_servers),
                ..Default::default()
            })
            .await
            .map_err(rtc_error("create peer connection"))?,
        );

        let (stop, stop_rx) = watch::channel(false);
        let stop = Arc::new(stop);

        let stop_on_failure = stop.clone();
        peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            info!(%state, "Peer connection state changed");
            if matches!(
                state,
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
            ) {
                stop_on_failure.send_replace(true);
            }
            Box::pin(async {})
        }));

        let (answer, track) = match self.answer(&peer, remote_sdp).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                if let Err(close_err) = peer.close().await {
                    debug!(error = %close_err, "Failed to close rejected peer connection");
                }
                return Err(e);
            }
        };

        let runtime = Handle::current();
        tokio::task::spawn_blocking(move || match stream_frames(&runtime, frames, &track, stop_rx) {
            Ok(samples) => info!(samples, "Video stream ended"),
            Err(e) => warn!(error = %e, "Video stream failed"),
        });

        info!(ice_servers = ice_servers.len(), "Peer connection negotiated");
        Ok(Box::new(WebRtcSession { peer, answer, stop }))
    }
}

/// One viewer connection.
pub struct WebRtcSession {
    peer: Arc<RTCPeerConnection>,
    answer: String,
    stop: Arc<watch::Sender<bool>>,
}

#[async_trait]
impl RtcSession for WebRtcSession {
    fn local_description(&self) -> &str {
        &self.answer
    }

    async fn close(&self) {
        self.stop.send_replace(true);
        if let Err(e) = self.peer.close().await {
            debug!(error = %e, "Peer connection close failed");
        }
    }
}

/// RGB to H.264 Annex B encoder.
pub struct H264Encoder {
    encoder: Encoder,
}

impl H264Encoder {
    pub fn new() -> MonitorResult<Self> {
        let encoder = Encoder::new()
            .map_err(|e| MonitorError::transport(format!("Failed to create H.264 encoder: {}", e)))?;
        Ok(Self { encoder })
    }

    /// Encode one frame. May return no data while the encoder skips frames.
    pub fn encode(&mut self, frame: &Frame) -> MonitorResult<Vec<u8>> {
        if frame.width() % 2 != 0 || frame.height() % 2 != 0 {
            return Err(MonitorError::transport(format!(
                "H.264 needs even frame dimensions, got {}x{}",
                frame.width(),
                frame.height()
            )));
        }

        let rgb = RgbSliceU8::new(
            frame.data(),
            (frame.width() as usize, frame.height() as usize),
        );
        let yuv = YUVBuffer::from_rgb_source(rgb);
        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| MonitorError::transport(format!("H.264 encode failed: {}", e)))?;

        Ok(bitstream.to_vec())
    }
}

/// Encode and send frames until `stop` fires or the bus goes away.
fn stream_frames(
    runtime: &Handle,
    mut frames: FrameReceiver,
    track: &TrackLocalStaticSample,
    mut stop: watch::Receiver<bool>,
) -> MonitorResult<u64> {
    let mut encoder = H264Encoder::new()?;
    let mut previous = None;
    let mut samples = 0;

    loop {
        let next = runtime.block_on(async {
            tokio::select! {
                frame = frames.next() => frame,
                _ = wait_for_shutdown(&mut stop) => None,
            }
        });
        let Some(frame) = next else { break };

        let duration = previous
            .map(|at| frame.captured_at().saturating_duration_since(at))
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_FRAME_DURATION);
        previous = Some(frame.captured_at());

        let data = encoder.encode(&frame)?;
        if data.is_empty() {
            continue;
        }

        let sample = Sample {
            data: Bytes::from(data),
            duration,
            ..Default::default()
        };
        if let Err(e) = runtime.block_on(track.write_sample(&sample)) {
            debug!(error = %e, "Dropped video sample");
            continue;
        }
        samples += 1;
    }

    Ok(samples)
}

fn build_api() -> MonitorResult<API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(rtc_error("register codecs"))?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(rtc_error("register interceptors"))?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// All configured URLs as one ICE server entry.
fn ice_server_list(urls: &[String]) -> Vec<RTCIceServer> {
    if urls.is_empty() {
        return Vec::new();
    }
    vec![RTCIceServer {
        urls: urls.to_vec(),
        ..Default::default()
    }]
}

fn rtc_error(context: &'static str) -> impl FnOnce(webrtc::Error) -> MonitorError {
    move |e| MonitorError::transport(format!("Failed to {}: {}", context, e))
}
