//! Camera abstraction and pipeline descriptors.

use async_trait::async_trait;
use std::fmt;

use crate::error::MediaResult;
use crate::frame::Frame;

/// Physical frame source behind a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSource {
    /// V4L2 USB camera at `/dev/video{device_index}` (visible light)
    Usb { device_index: u32 },
    /// Argus CSI sensor (infrared)
    Csi { sensor_id: u32, flip_method: u8 },
}

/// Everything needed to open a camera: source plus output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescriptor {
    pub source: CameraSource,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl PipelineDescriptor {
    pub fn usb(device_index: u32, width: u32, height: u32, fps: u32) -> Self {
        Self {
            source: CameraSource::Usb { device_index },
            width,
            height,
            fps,
        }
    }

    pub fn csi(sensor_id: u32, flip_method: u8, width: u32, height: u32, fps: u32) -> Self {
        Self {
            source: CameraSource::Csi {
                sensor_id,
                flip_method,
            },
            width,
            height,
            fps,
        }
    }

    /// Size in bytes of one RGB frame produced by this pipeline.
    pub fn frame_len(&self) -> usize {
        Frame::byte_len(self.width, self.height)
    }

    /// GStreamer elements, source first, ending in raw RGB of the configured size.
    pub fn gst_elements(&self) -> Vec<String> {
        let mut elements = match &self.source {
            CameraSource::Usb { device_index } => vec![
                format!("v4l2src device=/dev/video{}", device_index),
                "videoconvert".to_string(),
            ],
            CameraSource::Csi {
                sensor_id,
                flip_method,
            } => vec![
                format!("nvarguscamerasrc sensor-id={}", sensor_id),
                format!("nvvidconv flip-method={}", flip_method),
                "video/x-raw,format=BGRx".to_string(),
                "videoconvert".to_string(),
            ],
        };

        elements.push("videoscale".to_string());
        elements.push("videorate".to_string());
        elements.push(format!(
            "video/x-raw,format=RGB,width={},height={},framerate={}/1",
            self.width, self.height, self.fps
        ));
        elements
    }
}

impl fmt::Display for PipelineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            CameraSource::Usb { device_index } => {
                write!(f, "usb:/dev/video{} {}x{}", device_index, self.width, self.height)
            }
            CameraSource::Csi { sensor_id, .. } => {
                write!(f, "csi:{} {}x{}", sensor_id, self.width, self.height)
            }
        }
    }
}

/// An open camera handle.
#[async_trait]
pub trait Camera: Send {
    /// Read the next frame.
    async fn read_frame(&mut self) -> MediaResult<Frame>;

    /// Release the underlying device. Idempotent.
    async fn release(&mut self);

    /// Pipeline this camera was opened with.
    fn descriptor(&self) -> &PipelineDescriptor;
}

/// Opens cameras from pipeline descriptors.
#[async_trait]
pub trait CameraOpener: Send + Sync {
    async fn open(&self, pipeline: &PipelineDescriptor) -> MediaResult<Box<dyn Camera>>;
}
