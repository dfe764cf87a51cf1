//! YOLO object detection on ONNX Runtime.
//!
//! Works with Ultralytics detection exports, whose output is
//! `[1, 4 + num_classes, num_candidates]` and whose class table is stored in
//! the model's `names` metadata entry.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Rgb};
use ndarray::Array;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info, warn};

use crate::detector::{ClassNames, Detections, Detector, DetectorFactory, ObjectDetection};
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;

/// Configuration for YOLO detection.
#[derive(Debug, Clone)]
pub struct YoloDetectorConfig {
    /// Minimum class score for a detection to be reported
    pub confidence_threshold: f32,
    /// Input image size (model expects square input)
    pub input_size: u32,
    /// Class table used when the model carries no `names` metadata
    pub fallback_names: ClassNames,
}

impl Default for YoloDetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            input_size: 640,
            fallback_names: ClassNames::new(),
        }
    }
}

/// YOLO detector bound to one model file.
pub struct YoloDetector {
    session: Mutex<Session>,
    config: YoloDetectorConfig,
    names: Option<ClassNames>,
    model_path: PathBuf,
}

impl YoloDetector {
    /// Load a model. Fails only if the file is missing or is not a valid model.
    ///
    /// A model without a usable `names` table still loads; `class_names`
    /// then reports the gap so callers can fall back to their own indices.
    pub fn load(model_path: &Path, config: YoloDetectorConfig) -> MediaResult<Self> {
        if !model_path.exists() {
            return Err(MediaError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = create_session(model_path)?;

        let names = read_names_metadata(&session)
            .or_else(|| (!config.fallback_names.is_empty()).then(|| config.fallback_names.clone()));

        match &names {
            Some(names) => info!(
                model_path = %model_path.display(),
                classes = names.len(),
                input_size = config.input_size,
                "Detector initialized"
            ),
            None => warn!(
                model_path = %model_path.display(),
                input_size = config.input_size,
                "Detector initialized without class names"
            ),
        }

        Ok(Self {
            session: Mutex::new(session),
            config,
            names,
            model_path: model_path.to_path_buf(),
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Resize to the model input and convert to normalized NCHW.
    fn preprocess(&self, frame: &Frame) -> MediaResult<Value> {
        let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_raw(frame.width(), frame.height(), frame.data().to_vec())
                .ok_or_else(|| MediaError::invalid_frame("frame does not match its dimensions"))?;

        let size = self.config.input_size;
        let resized = DynamicImage::ImageRgb8(buffer).resize_exact(size, size, FilterType::Triangle);
        let rgb = resized.to_rgb8();
        let (w, h) = (size as usize, size as usize);

        let mut chw_data: Vec<f32> = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    let pixel = rgb.get_pixel(x as u32, y as u32);
                    chw_data.push(pixel[c] as f32 / 255.0);
                }
            }
        }

        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw_data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::inference(format!("Failed to create tensor: {}", e)))
    }

    /// Run the model and return the raw output with its class count.
    fn run_inference(&self, input: Value) -> MediaResult<(Vec<f32>, usize)> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::inference("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| MediaError::inference(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get("output0")
            .ok_or_else(|| MediaError::inference("Missing output0 tensor"))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::inference(format!("Failed to extract tensor: {}", e)))?;

        let dims: Vec<i64> = tensor.0.iter().copied().collect();
        let num_classes = classes_from_shape(&dims)?;

        Ok((tensor.1.iter().copied().collect(), num_classes))
    }
}

impl Detector for YoloDetector {
    fn detect(&self, frame: &Frame) -> MediaResult<Detections> {
        let input = self.preprocess(frame)?;
        let (outputs, num_classes) = self.run_inference(input)?;
        let detections = decode_predictions(
            &outputs,
            num_classes,
            self.config.input_size,
            self.config.confidence_threshold,
        )?;

        debug!(count = detections.len(), "Detection completed");
        Ok(detections)
    }

    fn class_names(&self) -> MediaResult<ClassNames> {
        self.names
            .clone()
            .ok_or_else(|| MediaError::MissingClassNames(self.model_path.clone()))
    }
}

/// Loads `YoloDetector`s with a shared configuration.
#[derive(Debug, Clone, Default)]
pub struct YoloDetectorFactory {
    pub config: YoloDetectorConfig,
}

impl YoloDetectorFactory {
    pub fn new(config: YoloDetectorConfig) -> Self {
        Self { config }
    }
}

impl DetectorFactory for YoloDetectorFactory {
    fn load(&self, model_path: &Path) -> MediaResult<Arc<dyn Detector>> {
        Ok(Arc::new(YoloDetector::load(model_path, self.config.clone())?))
    }
}

/// Decode raw `[4 + num_classes, candidates]` output into thresholded detections.
///
/// Boxes are returned normalized to the model input, which matches the frame
/// because preprocessing stretches rather than letterboxes.
pub fn decode_predictions(
    outputs: &[f32],
    num_classes: usize,
    input_size: u32,
    confidence_threshold: f32,
) -> MediaResult<Detections> {
    let num_features = 4 + num_classes;
    if num_classes == 0 || outputs.len() % num_features != 0 {
        return Err(MediaError::inference(format!(
            "Unexpected output size {} for {} classes",
            outputs.len(),
            num_classes
        )));
    }
    let num_boxes = outputs.len() / num_features;

    let output_array = Array::from_shape_vec((num_features, num_boxes), outputs.to_vec())
        .map_err(|e| MediaError::inference(format!("Failed to reshape output: {}", e)))?;
    let transposed = output_array.t();
    let scale = input_size as f32;

    let mut objects = Vec::new();
    for i in 0..num_boxes {
        let mut best_class = 0;
        let mut best_score = 0.0f32;
        for c in 0..num_classes {
            let score = transposed[[i, 4 + c]];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_score < confidence_threshold {
            continue;
        }

        let cx = transposed[[i, 0]] / scale;
        let cy = transposed[[i, 1]] / scale;
        let w = transposed[[i, 2]] / scale;
        let h = transposed[[i, 3]] / scale;

        let x = (cx - w / 2.0).clamp(0.0, 1.0);
        let y = (cy - h / 2.0).clamp(0.0, 1.0);

        objects.push(ObjectDetection {
            x,
            y,
            width: w.min(1.0 - x),
            height: h.min(1.0 - y),
            class_id: best_class,
            confidence: best_score,
        });
    }

    Ok(Detections::new(objects))
}

/// Class count of a `[1, 4 + num_classes, candidates]` output shape.
pub fn classes_from_shape(dims: &[i64]) -> MediaResult<usize> {
    match dims {
        [1, features, _] if *features > 4 => Ok((*features - 4) as usize),
        _ => Err(MediaError::inference(format!(
            "Unexpected output shape {:?}",
            dims
        ))),
    }
}

/// Parse an Ultralytics `names` entry such as `{0: 'baby', 1: 'mouth'}`.
///
/// Quoted names may contain commas, colons and escaped quotes.
pub fn parse_names_metadata(raw: &str) -> Option<ClassNames> {
    let body = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut chars = body.chars().peekable();

    let mut names = ClassNames::new();
    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let index: usize = read_token(&mut chars)?.trim().parse().ok()?;

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        chars.next_if_eq(&':')?;
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let name = read_token(&mut chars)?;
        names.insert(index, name.trim().to_string());
    }

    (!names.is_empty()).then_some(names)
}

/// Read one quoted string or one bare token ending at `,` or `:`.
fn read_token(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<String> {
    let mut token = String::new();

    if let Some(quote) = chars.next_if(|c| *c == '\'' || *c == '"') {
        loop {
            match chars.next()? {
                '\\' => token.push(chars.next()?),
                c if c == quote => return Some(token),
                c => token.push(c),
            }
        }
    }

    while let Some(c) = chars.next_if(|c| *c != ',' && *c != ':') {
        token.push(c);
    }
    (!token.trim().is_empty()).then_some(token)
}

fn read_names_metadata(session: &Session) -> Option<ClassNames> {
    let metadata = session.metadata().ok()?;
    let raw = metadata.custom("names").ok().flatten()?;
    parse_names_metadata(&raw)
}

/// Create ONNX Runtime session, preferring CUDA when enabled.
fn create_session(model_path: &Path) -> MediaResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| MediaError::model_load(format!("Failed to read model file: {}", e)))?;

    let builder = Session::builder()
        .map_err(|e| MediaError::model_load(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::model_load(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for detection");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, using CPU");
    }

    info!("Using CPU execution provider for detection");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::model_load(format!("Failed to load ONNX model: {}", e)))
}
