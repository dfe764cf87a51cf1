//! Light-driven mode selection.
//!
//! Owns the active camera and detector. A mode switch tears the old pair down
//! before building the new one, so at most one camera handle is open at any
//! time.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use cradle_media::{Camera, CameraOpener, Detector, DetectorFactory, Frame, LightSensor};
use cradle_models::OperatingMode;

use crate::config::{ModeProfile, MonitorConfig};
use crate::error::{MonitorError, MonitorResult};
use crate::metrics;

/// Outcome of one `ensure_mode` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeStep {
    /// Camera and detector are ready for `mode`.
    Ready { mode: OperatingMode, switched: bool },
    /// The switch failed; wait before trying again.
    Backoff(Duration),
}

pub struct ModeSelector {
    sensor: Arc<dyn LightSensor>,
    cameras: Arc<dyn CameraOpener>,
    detectors: Arc<dyn DetectorFactory>,
    bright: ModeProfile,
    dark: ModeProfile,
    retry_delay: Duration,
    current_mode: Option<OperatingMode>,
    camera: Option<Box<dyn Camera>>,
    detector: Option<Arc<dyn Detector>>,
    /// Incremented for every successfully loaded detector
    generation: u64,
}

impl ModeSelector {
    pub fn new(
        sensor: Arc<dyn LightSensor>,
        cameras: Arc<dyn CameraOpener>,
        detectors: Arc<dyn DetectorFactory>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            sensor,
            cameras,
            detectors,
            bright: config.bright.clone(),
            dark: config.dark.clone(),
            retry_delay: config.mode_retry_delay,
            current_mode: None,
            camera: None,
            detector: None,
            generation: 0,
        }
    }

    /// Read the light sensor and switch pipelines if the desired mode changed.
    ///
    /// A sensor read error is returned to the caller. Model load and camera
    /// open failures leave the mode unset and ask for a backoff, so the switch
    /// is retried on the next call.
    pub async fn ensure_mode(&mut self) -> MonitorResult<ModeStep> {
        let desired = OperatingMode::from_dark_reading(self.sensor.is_dark()?);

        if self.current_mode == Some(desired) && self.camera.is_some() && self.detector.is_some() {
            return Ok(ModeStep::Ready {
                mode: desired,
                switched: false,
            });
        }

        info!(
            from = self.current_mode.map(|m| m.as_str()).unwrap_or("none"),
            to = %desired,
            "Switching operating mode"
        );

        self.teardown().await;

        let profile = match desired {
            OperatingMode::Bright => self.bright.clone(),
            OperatingMode::Dark => self.dark.clone(),
        };

        let factory = self.detectors.clone();
        let model_path = profile.model_path.clone();
        let loaded = tokio::task::spawn_blocking(move || factory.load(&model_path))
            .await
            .map_err(|e| MonitorError::task(format!("model load task failed: {}", e)))?;

        let detector = match loaded {
            Ok(detector) => detector,
            Err(e) => {
                warn!(
                    mode = %desired,
                    model = %profile.model_path.display(),
                    error = %e,
                    "Model load failed, will retry"
                );
                metrics::record_mode_switch_failure("model");
                return Ok(ModeStep::Backoff(self.retry_delay));
            }
        };

        let camera = match self.cameras.open(&profile.pipeline).await {
            Ok(camera) => camera,
            Err(e) => {
                warn!(
                    mode = %desired,
                    pipeline = %profile.pipeline,
                    error = %e,
                    "Camera open failed, will retry"
                );
                metrics::record_mode_switch_failure("camera");
                return Ok(ModeStep::Backoff(self.retry_delay));
            }
        };

        self.generation += 1;
        self.detector = Some(detector);
        self.camera = Some(camera);
        self.current_mode = Some(desired);
        metrics::record_mode_switch(desired);
        info!(mode = %desired, generation = self.generation, "Camera and model ready");

        Ok(ModeStep::Ready {
            mode: desired,
            switched: true,
        })
    }

    /// Read a frame from the active camera.
    pub async fn read_frame(&mut self) -> MonitorResult<Frame> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| MonitorError::internal("no active camera"))?;
        Ok(camera.read_frame().await?)
    }

    /// Forget the current mode so the next `ensure_mode` rebuilds the pipeline.
    pub fn invalidate(&mut self) {
        self.current_mode = None;
    }

    /// Release the camera and drop the detector.
    pub async fn release(&mut self) {
        self.teardown().await;
    }

    pub fn current_mode(&self) -> Option<OperatingMode> {
        self.current_mode
    }

    pub fn detector(&self) -> Option<Arc<dyn Detector>> {
        self.detector.clone()
    }

    /// Identifies the loaded detector instance.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_camera(&self) -> bool {
        self.camera.is_some()
    }

    async fn teardown(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            camera.release().await;
        }
        self.detector = None;
        self.current_mode = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use cradle_media::CameraSource;

    use super::*;
    use crate::test_support::{FakeCameras, FakeDetectors, FakeSensor};

    struct Rig {
        sensor: Arc<FakeSensor>,
        cameras: Arc<FakeCameras>,
        detectors: Arc<FakeDetectors>,
        selector: ModeSelector,
    }

    fn rig() -> Rig {
        let sensor = Arc::new(FakeSensor::default());
        let cameras = Arc::new(FakeCameras::default());
        let detectors = Arc::new(FakeDetectors::default());
        let selector = ModeSelector::new(
            sensor.clone(),
            cameras.clone(),
            detectors.clone(),
            &MonitorConfig::default(),
        );
        Rig {
            sensor,
            cameras,
            detectors,
            selector,
        }
    }

    #[tokio::test]
    async fn test_initial_switch_to_bright() {
        let mut rig = rig();
        let step = rig.selector.ensure_mode().await.unwrap();
        assert_eq!(
            step,
            ModeStep::Ready {
                mode: OperatingMode::Bright,
                switched: true
            }
        );
        assert_eq!(rig.selector.generation(), 1);
        assert!(rig.selector.detector().is_some());
        assert!(rig.selector.read_frame().await.is_ok());

        let opened = rig.cameras.opened.lock().unwrap().clone();
        assert_eq!(opened[0].source, CameraSource::Usb { device_index: 1 });
    }

    #[tokio::test]
    async fn test_unchanged_mode_is_noop() {
        let mut rig = rig();
        rig.selector.ensure_mode().await.unwrap();
        let step = rig.selector.ensure_mode().await.unwrap();
        assert_eq!(
            step,
            ModeStep::Ready {
                mode: OperatingMode::Bright,
                switched: false
            }
        );
        assert_eq!(rig.cameras.opens.load(Ordering::SeqCst), 1);
        assert_eq!(rig.detectors.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_switch_releases_before_opening() {
        let mut rig = rig();
        rig.selector.ensure_mode().await.unwrap();

        for dark in [true, false, true, false] {
            rig.sensor.set_dark(dark);
            let step = rig.selector.ensure_mode().await.unwrap();
            assert!(matches!(step, ModeStep::Ready { switched: true, .. }));
        }

        assert_eq!(rig.cameras.max_live.load(Ordering::SeqCst), 1);
        assert_eq!(rig.cameras.live.load(Ordering::SeqCst), 1);
        assert_eq!(rig.selector.generation(), 5);
        assert_eq!(rig.selector.current_mode(), Some(OperatingMode::Bright));

        let loaded = rig.detectors.loaded.lock().unwrap().clone();
        assert_eq!(loaded[1], std::path::PathBuf::from("models/dark.onnx"));
    }

    #[tokio::test]
    async fn test_model_failure_leaves_mode_unset() {
        let mut rig = rig();
        rig.detectors.fail_loads.store(1, Ordering::SeqCst);

        let step = rig.selector.ensure_mode().await.unwrap();
        assert_eq!(step, ModeStep::Backoff(Duration::from_secs(2)));
        assert_eq!(rig.selector.current_mode(), None);
        assert_eq!(rig.cameras.opens.load(Ordering::SeqCst), 0);

        let step = rig.selector.ensure_mode().await.unwrap();
        assert!(matches!(step, ModeStep::Ready { switched: true, .. }));
    }

    #[tokio::test]
    async fn test_camera_failures_retry_indefinitely() {
        let mut rig = rig();
        rig.cameras.fail_opens.store(25, Ordering::SeqCst);

        for _ in 0..25 {
            let step = rig.selector.ensure_mode().await.unwrap();
            assert_eq!(step, ModeStep::Backoff(Duration::from_secs(2)));
            assert_eq!(rig.selector.current_mode(), None);
            assert!(!rig.selector.has_camera());
        }

        let step = rig.selector.ensure_mode().await.unwrap();
        assert!(matches!(step, ModeStep::Ready { switched: true, .. }));
        assert_eq!(rig.cameras.opens.load(Ordering::SeqCst), 26);
        assert_eq!(rig.cameras.max_live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_reopens_camera() {
        let mut rig = rig();
        rig.selector.ensure_mode().await.unwrap();
        rig.selector.invalidate();

        let step = rig.selector.ensure_mode().await.unwrap();
        assert!(matches!(step, ModeStep::Ready { switched: true, .. }));
        assert_eq!(rig.cameras.opens.load(Ordering::SeqCst), 2);
        assert_eq!(rig.cameras.max_live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sensor_error_propagates() {
        let mut rig = rig();
        rig.sensor.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            rig.selector.ensure_mode().await,
            Err(MonitorError::Media(_))
        ));
    }

    #[tokio::test]
    async fn test_release_closes_camera() {
        let mut rig = rig();
        rig.selector.ensure_mode().await.unwrap();
        rig.selector.release().await;
        assert_eq!(rig.cameras.live.load(Ordering::SeqCst), 0);
        assert!(rig.selector.detector().is_none());
        assert!(rig.selector.read_frame().await.is_err());
    }
}
