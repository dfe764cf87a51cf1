//! Fake collaborators for unit tests.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use cradle_media::{
    Camera, CameraOpener, ClassNames, Detections, Detector, DetectorFactory, Frame, LightSensor,
    MediaError, MediaResult, PipelineDescriptor,
};

#[derive(Default)]
pub struct FakeSensor {
    pub dark: AtomicBool,
    pub fail: AtomicBool,
    pub releases: AtomicUsize,
}

impl FakeSensor {
    pub fn set_dark(&self, dark: bool) {
        self.dark.store(dark, Ordering::SeqCst);
    }
}

impl LightSensor for FakeSensor {
    fn is_dark(&self) -> MediaResult<bool> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MediaError::sensor("read failed"));
        }
        Ok(self.dark.load(Ordering::SeqCst))
    }

    fn release(&self) -> MediaResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Tracks how many camera handles are alive at once.
#[derive(Default)]
pub struct FakeCameras {
    pub opens: AtomicUsize,
    /// Remaining opens that fail
    pub fail_opens: AtomicUsize,
    /// Remaining reads that fail, across cameras
    pub fail_reads: Arc<AtomicUsize>,
    pub live: Arc<AtomicUsize>,
    pub max_live: Arc<AtomicUsize>,
    pub opened: Mutex<Vec<PipelineDescriptor>>,
}

#[async_trait]
impl CameraOpener for FakeCameras {
    async fn open(&self, pipeline: &PipelineDescriptor) -> MediaResult<Box<dyn Camera>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.fail_opens) {
            return Err(MediaError::camera_open("device busy"));
        }

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        self.opened.lock().unwrap().push(pipeline.clone());

        Ok(Box::new(FakeCamera {
            descriptor: pipeline.clone(),
            live: self.live.clone(),
            fail_reads: self.fail_reads.clone(),
            released: false,
        }))
    }
}

pub struct FakeCamera {
    descriptor: PipelineDescriptor,
    live: Arc<AtomicUsize>,
    fail_reads: Arc<AtomicUsize>,
    released: bool,
}

#[async_trait]
impl Camera for FakeCamera {
    async fn read_frame(&mut self) -> MediaResult<Frame> {
        if self.released {
            return Err(MediaError::camera_read("camera released"));
        }
        if take_one(&self.fail_reads) {
            return Err(MediaError::camera_read("no frame"));
        }
        Frame::from_rgb(2, 2, vec![0; Frame::byte_len(2, 2)])
    }

    async fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn descriptor(&self) -> &PipelineDescriptor {
        &self.descriptor
    }
}

impl Drop for FakeCamera {
    fn drop(&mut self) {
        if !self.released {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Detector factory whose detectors report the shared `scene`.
#[derive(Default)]
pub struct FakeDetectors {
    pub loads: AtomicUsize,
    pub fail_loads: AtomicUsize,
    pub names_calls: Arc<AtomicUsize>,
    pub scene: Arc<Mutex<BTreeSet<usize>>>,
    pub names: ClassNames,
    pub loaded: Mutex<Vec<PathBuf>>,
}

impl FakeDetectors {
    pub fn show(&self, class_ids: &[usize]) {
        *self.scene.lock().unwrap() = class_ids.iter().copied().collect();
    }
}

impl DetectorFactory for FakeDetectors {
    fn load(&self, model_path: &Path) -> MediaResult<Arc<dyn Detector>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.fail_loads) {
            return Err(MediaError::ModelNotFound(model_path.to_path_buf()));
        }
        self.loaded.lock().unwrap().push(model_path.to_path_buf());

        Ok(Arc::new(FakeDetector {
            scene: self.scene.clone(),
            names: self.names.clone(),
            names_calls: self.names_calls.clone(),
        }))
    }
}

pub struct FakeDetector {
    scene: Arc<Mutex<BTreeSet<usize>>>,
    names: ClassNames,
    names_calls: Arc<AtomicUsize>,
}

impl Detector for FakeDetector {
    fn detect(&self, _frame: &Frame) -> MediaResult<Detections> {
        let scene = self.scene.lock().unwrap().clone();
        Ok(Detections::from_class_ids(scene))
    }

    fn class_names(&self) -> MediaResult<ClassNames> {
        self.names_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.names.clone())
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
