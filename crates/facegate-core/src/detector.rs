//! Face detectors.
//!
//! [`ScrfdDetector`] runs the SCRFD model through ONNX Runtime with
//! three-stride anchor decoding and NMS. [`WholeFrameDetector`] treats the
//! whole frame as a single face, for sources that are already cropped.

use std::path::Path;

use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::types::{BoundingBox, Frame};

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer is smaller than {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locates faces in a frame.
///
/// An empty result is a normal outcome. The first returned box is treated as
/// the primary face by single-shot callers.
pub trait FaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for Box<D> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        (**self).detect(frame)
    }
}

/// Reports the full frame as one face. Used for pre-cropped uploads.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeFrameDetector;

impl FaceDetector for WholeFrameDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.width == 0 || frame.height == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![BoundingBox {
            x: 0.0,
            y: 0.0,
            width: frame.width as f32,
            height: frame.height as f32,
            confidence: 1.0,
        }])
    }
}

/// Maps frame coordinates into the square model input and back.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    /// (score, bbox) output tensor index per stride.
    stride_outputs: [(usize, usize); 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs score and bbox outputs for 3 strides, model has {} outputs",
                output_names.len()
            )));
        }

        let stride_outputs = output_indices(&output_names);
        tracing::info!(path = model_path, outputs = ?output_names, ?stride_outputs, "loaded SCRFD model");

        Ok(Self {
            session,
            stride_outputs,
        })
    }

    fn preprocess(frame: &Frame) -> Result<(Array4<f32>, Letterbox), DetectorError> {
        let gray = frame.to_gray_image().ok_or(DetectorError::InvalidFrame {
            width: frame.width,
            height: frame.height,
        })?;

        let size = SCRFD_INPUT_SIZE as f32;
        let scale = (size / frame.width as f32).min(size / frame.height as f32);
        let new_w = ((frame.width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
        let new_h = ((frame.height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
        let resized = imageops::resize(&gray, new_w, new_h, FilterType::Triangle);

        let pad_x = (SCRFD_INPUT_SIZE as u32 - new_w) / 2;
        let pad_y = (SCRFD_INPUT_SIZE as u32 - new_h) / 2;

        // Padding at the mean normalizes to 0.0, so zeros are already correct.
        let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let value = (pixel.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
            let (ty, tx) = ((y + pad_y) as usize, (x + pad_x) as usize);
            for channel in 0..3 {
                tensor[[0, channel, ty, tx]] = value;
            }
        }

        Ok((
            tensor,
            Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
            },
        ))
    }
}

impl FaceDetector for ScrfdDetector {
    /// Detect faces, returning boxes sorted by confidence (best first).
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.width == 0 || frame.height == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = Self::preprocess(frame)?;
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_outputs[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("boxes stride {stride}: {e}")))?;
            candidates.extend(decode_stride(scores, boxes, stride, &letterbox));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection finished");
        Ok(faces)
    }
}

/// Find `score_<stride>` / `bbox_<stride>` outputs by name, falling back to the
/// usual export order (scores 0-2, boxes 3-5).
fn output_indices(names: &[String]) -> [(usize, usize); 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let mut named = [(0usize, 0usize); 3];
    for (i, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride)) {
            (Some(score), Some(bbox)) => named[i] = (score, bbox),
            _ => return [(0, 3), (1, 4), (2, 5)],
        }
    }
    named
}

/// Decode the anchors of one stride level that clear the confidence threshold.
fn decode_stride(scores: &[f32], boxes: &[f32], stride: usize, letterbox: &Letterbox) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= SCRFD_CONFIDENCE_THRESHOLD {
                return None;
            }
            let offsets = boxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * step;
            let cy = (cell / grid) as f32 * step;

            let (x1, y1) = letterbox.to_frame(cx - offsets[0] * step, cy - offsets[1] * step);
            let (x2, y2) = letterbox.to_frame(cx + offsets[2] * step, cy + offsets[3] * step);
            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
            })
        })
        .collect()
}

/// Non-maximum suppression. Output is sorted by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
