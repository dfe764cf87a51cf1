//! `gst-launch-1.0` command builder and camera runner.
//!
//! The pipeline writes raw RGB frames to stdout (`fdsink fd=1`); the camera
//! reads fixed-size chunks from the pipe. Killing the child releases the
//! device.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::camera::{Camera, CameraOpener, PipelineDescriptor};
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;

const GST_LAUNCH: &str = "gst-launch-1.0";

/// Builder for `gst-launch-1.0` invocations.
#[derive(Debug, Clone)]
pub struct GstLaunchCommand {
    elements: Vec<String>,
    quiet: bool,
}

impl Default for GstLaunchCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl GstLaunchCommand {
    pub fn new() -> Self {
        Self {
            elements: Vec::new(),
            quiet: true,
        }
    }

    /// Append a pipeline element (with its properties).
    pub fn element(mut self, element: impl Into<String>) -> Self {
        self.elements.push(element.into());
        self
    }

    /// Append several pipeline elements.
    pub fn elements<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elements.extend(elements.into_iter().map(Into::into));
        self
    }

    /// Terminate the pipeline with a sink writing to stdout.
    pub fn to_stdout(self) -> Self {
        self.element("fdsink fd=1 sync=false")
    }

    /// Print pipeline state messages. They go to stdout, so only useful for debugging.
    pub fn verbose(mut self) -> Self {
        self.quiet = false;
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        // -q keeps stdout clean for frame data
        if self.quiet {
            args.push("-q".to_string());
        }

        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                args.push("!".to_string());
            }
            args.extend(element.split_whitespace().map(str::to_string));
        }

        args
    }
}

/// Camera backed by a `gst-launch-1.0` child process.
pub struct GstCamera {
    descriptor: PipelineDescriptor,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    pending: Option<Frame>,
    read_timeout: Duration,
}

impl GstCamera {
    async fn read_raw(&mut self) -> MediaResult<Frame> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| MediaError::camera_read("camera released"))?;

        let mut buf = vec![0u8; self.descriptor.frame_len()];
        match tokio::time::timeout(self.read_timeout, stdout.read_exact(&mut buf)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(MediaError::camera_read("pipeline closed its output"));
            }
            Ok(Err(e)) => return Err(MediaError::camera_read(e.to_string())),
            Err(_) => {
                return Err(MediaError::camera_read(format!(
                    "no frame within {} ms",
                    self.read_timeout.as_millis()
                )));
            }
        }

        Frame::from_rgb(self.descriptor.width, self.descriptor.height, buf)
    }
}

#[async_trait]
impl Camera for GstCamera {
    async fn read_frame(&mut self) -> MediaResult<Frame> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        self.read_raw().await
    }

    async fn release(&mut self) {
        self.stdout = None;
        self.pending = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(pipeline = %self.descriptor, "Failed to stop camera pipeline: {}", e);
            }
            info!(pipeline = %self.descriptor, "Camera released");
        }
    }

    fn descriptor(&self) -> &PipelineDescriptor {
        &self.descriptor
    }
}

/// Opens cameras by spawning GStreamer pipelines.
#[derive(Debug, Clone)]
pub struct GstCameraOpener {
    /// How long the first frame may take before the open is declared failed
    pub open_timeout: Duration,
    /// How long any later frame may take
    pub read_timeout: Duration,
}

impl Default for GstCameraOpener {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl CameraOpener for GstCameraOpener {
    async fn open(&self, pipeline: &PipelineDescriptor) -> MediaResult<Box<dyn Camera>> {
        check_gst_launch()?;

        let cmd = GstLaunchCommand::new()
            .elements(pipeline.gst_elements())
            .to_stdout();
        let args = cmd.build_args();
        debug!("Running: {} {}", GST_LAUNCH, args.join(" "));

        let mut child = Command::new(GST_LAUNCH)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::camera_open(format!("failed to spawn {}: {}", GST_LAUNCH, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::camera_open("stdout not captured"))?;

        if let Some(stderr) = child.stderr.take() {
            let label = pipeline.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(pipeline = %label, "gst: {}", line);
                }
            });
        }

        let mut camera = GstCamera {
            descriptor: pipeline.clone(),
            child: Some(child),
            stdout: Some(stdout),
            pending: None,
            read_timeout: self.open_timeout,
        };

        // A pipeline that cannot produce its first frame is treated as not opened.
        match camera.read_raw().await {
            Ok(frame) => {
                camera.pending = Some(frame);
                camera.read_timeout = self.read_timeout;
                info!(pipeline = %pipeline, "Camera opened");
                Ok(Box::new(camera))
            }
            Err(e) => {
                camera.release().await;
                Err(MediaError::camera_open(format!("{}: {}", pipeline, e)))
            }
        }
    }
}

/// Check if gst-launch-1.0 is available.
pub fn check_gst_launch() -> MediaResult<PathBuf> {
    which::which(GST_LAUNCH).map_err(|_| MediaError::GstLaunchNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder_joins_elements() {
        let args = GstLaunchCommand::new()
            .element("v4l2src device=/dev/video1")
            .element("videoconvert")
            .to_stdout()
            .build_args();

        assert_eq!(
            args,
            vec![
                "-q",
                "v4l2src",
                "device=/dev/video1",
                "!",
                "videoconvert",
                "!",
                "fdsink",
                "fd=1",
                "sync=false",
            ]
        );
    }

    #[test]
    fn test_verbose_drops_quiet_flag() {
        let args = GstLaunchCommand::new()
            .element("videotestsrc")
            .verbose()
            .build_args();
        assert_eq!(args, vec!["videotestsrc"]);
    }

    #[test]
    fn test_descriptor_builds_full_pipeline() {
        let desc = PipelineDescriptor::usb(0, 4, 4, 5);
        let args = GstLaunchCommand::new()
            .elements(desc.gst_elements())
            .to_stdout()
            .build_args();
        assert_eq!(args[0], "-q");
        assert!(args.contains(&"video/x-raw,format=RGB,width=4,height=4,framerate=5/1".to_string()));
        assert_eq!(args.last().unwrap(), "sync=false");
    }
}
