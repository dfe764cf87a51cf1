//! Object detector abstraction.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use crate::error::MediaResult;
use crate::frame::Frame;

/// Class index to class name table reported by a model.
pub type ClassNames = BTreeMap<usize, String>;

/// Detected object with bounding box and classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDetection {
    /// Bounding box in normalized coordinates [0, 1]
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Model class index
    pub class_id: usize,
    /// Detection confidence [0, 1]
    pub confidence: f32,
}

/// Detections above the confidence threshold for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detections {
    objects: Vec<ObjectDetection>,
}

impl Detections {
    pub fn new(objects: Vec<ObjectDetection>) -> Self {
        Self { objects }
    }

    /// Build detections carrying only class indices (full-frame boxes).
    pub fn from_class_ids<I>(class_ids: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let objects = class_ids
            .into_iter()
            .map(|class_id| ObjectDetection {
                x: 0.0,
                y: 0.0,
                width: 1.0,
                height: 1.0,
                class_id,
                confidence: 1.0,
            })
            .collect();
        Self { objects }
    }

    /// Distinct class indices present in the frame.
    pub fn class_ids(&self) -> BTreeSet<usize> {
        self.objects.iter().map(|o| o.class_id).collect()
    }

    pub fn contains(&self, class_id: usize) -> bool {
        self.objects.iter().any(|o| o.class_id == class_id)
    }

    pub fn objects(&self) -> &[ObjectDetection] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// A loaded detection model.
///
/// Inference is synchronous and CPU/GPU bound; callers run it on a blocking
/// thread.
pub trait Detector: Send + Sync {
    /// Run inference on a frame.
    fn detect(&self, frame: &Frame) -> MediaResult<Detections>;

    /// The model's class name table.
    fn class_names(&self) -> MediaResult<ClassNames>;
}

/// Loads detectors from model files.
pub trait DetectorFactory: Send + Sync {
    fn load(&self, model_path: &Path) -> MediaResult<Arc<dyn Detector>>;
}
