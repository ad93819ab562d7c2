//! YOLOv8 detector backed by ONNX Runtime.
//!
//! Expects a three-class export (signature, stamp, qr_code) with input
//! `(1, 3, S, S)` and output `(1, 4 + 3, anchors)`, boxes in
//! centre/size form in input pixels. Images are letterboxed: scaled to fit
//! `S × S` with aspect ratio preserved and padded with grey, so boxes map
//! back to the source image exactly.

use super::{finalize_detections, BoundingBox, DetectParams, Detection, DetectionClass, Detector, DetectorError};
use image::{imageops, Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Letterbox padding value used by YOLO training pipelines.
const PAD_VALUE: u8 = 114;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnnxDetectorConfig {
    /// Square model input side in pixels. Default: 640.
    pub input_size: u32,
}

impl Default for OnnxDetectorConfig {
    fn default() -> Self {
        Self { input_size: 640 }
    }
}

/// How a source image was fitted into the model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    ratio: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn for_image(width: u32, height: u32, input_size: u32) -> Self {
        let ratio = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
        let new_w = (width as f32 * ratio).round();
        let new_h = (height as f32 * ratio).round();
        Self {
            ratio,
            pad_x: ((input_size as f32 - new_w) / 2.0).floor(),
            pad_y: ((input_size as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Model-input centre/size box → source image corner box.
    fn unmap(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox::new(
            (cx - w / 2.0 - self.pad_x) / self.ratio,
            (cy - h / 2.0 - self.pad_y) / self.ratio,
            (cx + w / 2.0 - self.pad_x) / self.ratio,
            (cy + h / 2.0 - self.pad_y) / self.ratio,
        )
    }
}

/// `Session::run` needs `&mut`, so the session sits behind a mutex; the
/// pipeline's inference gate already keeps contention at zero by default.
pub struct OnnxDetector {
    session: Mutex<Session>,
    config: OnnxDetectorConfig,
}

impl OnnxDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, config: OnnxDetectorConfig) -> Result<Self, DetectorError> {
        info!("Loading YOLOv8 model from {:?}", model_path.as_ref());
        let session = Session::builder()
            .map_err(|e| DetectorError::ModelLoad(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| DetectorError::ModelLoad(e.to_string()))?;
        info!("YOLOv8 model loaded");
        Ok(Self {
            session: Mutex::new(session),
            config,
        })
    }

    fn preprocess(&self, image: &RgbImage) -> (Array4<f32>, Letterbox) {
        let size = self.config.input_size;
        let lb = Letterbox::for_image(image.width(), image.height(), size);
        let new_w = ((image.width() as f32 * lb.ratio).round() as u32).clamp(1, size);
        let new_h = ((image.height() as f32 * lb.ratio).round() as u32).clamp(1, size);
        let resized = imageops::resize(image, new_w, new_h, imageops::FilterType::Triangle);

        let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
        imageops::replace(&mut canvas, &resized, lb.pad_x as i64, lb.pad_y as i64);

        let s = size as usize;
        let mut input = Array4::<f32>::zeros((1, 3, s, s));
        for (x, y, pixel) in canvas.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            input[[0, 0, y, x]] = f32::from(pixel[0]) / 255.0;
            input[[0, 1, y, x]] = f32::from(pixel[1]) / 255.0;
            input[[0, 2, y, x]] = f32::from(pixel[2]) / 255.0;
        }
        (input, lb)
    }
}

/// Decode a `(1, 4 + classes, anchors)` tensor laid out feature-major.
fn decode(
    dims: &[i64],
    data: &[f32],
    letterbox: &Letterbox,
    confidence_threshold: f32,
) -> Result<Vec<Detection>, DetectorError> {
    if dims.len() != 3 || dims[1] < 5 {
        return Err(DetectorError::Inference(format!(
            "unexpected output shape {dims:?}"
        )));
    }
    let num_features = dims[1] as usize;
    let num_anchors = dims[2] as usize;
    if data.len() < num_features * num_anchors {
        return Err(DetectorError::Inference(format!(
            "output has {} values, shape {dims:?} needs {}",
            data.len(),
            num_features * num_anchors
        )));
    }

    let mut candidates = Vec::new();
    for anchor in 0..num_anchors {
        let feature = |f: usize| data[f * num_anchors + anchor];

        let (mut best_class, mut best_score) = (0usize, f32::MIN);
        for class_id in 0..num_features - 4 {
            let score = feature(4 + class_id);
            if score > best_score {
                best_class = class_id;
                best_score = score;
            }
        }
        if best_score < confidence_threshold {
            continue;
        }
        let class = DetectionClass::from_id(best_class).ok_or(DetectorError::UnknownClass(best_class))?;
        let bbox = letterbox.unmap(feature(0), feature(1), feature(2), feature(3));
        candidates.push(Detection::new(class, best_score.min(1.0), bbox));
    }
    Ok(candidates)
}

impl Detector for OnnxDetector {
    fn detect(&self, image: &RgbImage, params: &DetectParams) -> Result<Vec<Detection>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = self.preprocess(image);
        let tensor =
            TensorRef::from_array_view(input.view()).map_err(|e| DetectorError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::Inference("session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::Inference(format!("Failed to extract tensor: {e}")))?;
        let dims: &[i64] = shape.as_ref();
        debug!("ONNX output shape: {:?}", dims);

        let candidates = decode(dims, data, &letterbox, params.confidence_threshold)?;
        // Boxes may overhang the image where the model extrapolated into padding.
        let (w, h) = (image.width() as f32, image.height() as f32);
        let clamped = candidates
            .into_iter()
            .map(|mut d| {
                d.bbox = d.bbox.clamp_to(w, h);
                d
            })
            .filter(|d| d.bbox.area() > 0.0)
            .collect();
        Ok(finalize_detections(clamped, params))
    }
}
