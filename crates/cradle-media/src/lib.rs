//! Hardware and media adapters for the cradle monitor.
//!
//! This crate provides:
//! - `Frame` and the single-slot `FrameBus` shared with the video transport
//! - Camera pipelines driven through the `gst-launch-1.0` CLI
//! - YOLO object detection on ONNX Runtime
//! - The ambient light sensor on a sysfs GPIO pin
//!
//! Each concern sits behind a trait (`CameraOpener`, `DetectorFactory`,
//! `LightSensor`) so the monitor can run against fakes in tests.

pub mod camera;
pub mod detector;
pub mod error;
pub mod frame;
pub mod gst;
pub mod sensor;
pub mod yolo;

pub use camera::{Camera, CameraOpener, CameraSource, PipelineDescriptor};
pub use detector::{ClassNames, Detections, Detector, DetectorFactory, ObjectDetection};
pub use error::{MediaError, MediaResult};
pub use frame::{Frame, FrameBus, FrameReceiver};
pub use gst::{check_gst_launch, GstCamera, GstCameraOpener, GstLaunchCommand};
pub use sensor::{LightSensor, SysfsLightSensor};
pub use yolo::{YoloDetector, YoloDetectorConfig, YoloDetectorFactory};
