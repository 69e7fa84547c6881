//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by NMS. Every box comes
//! with five landmarks, so the detector doubles as the landmark source via
//! [`RegionLandmarks`](crate::capability::RegionLandmarks).

use crate::capability::{CapabilityError, FaceDetector};
use crate::types::{FaceRegion, Landmarks};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download det_10g.onnx from insightface into the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<DetectorError> for CapabilityError {
    fn from(err: DetectorError) -> Self {
        CapabilityError::InferenceFailed(format!("SCRFD: {err}"))
    }
}

/// Letterbox parameters for mapping detections back to the input image.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl LetterboxInfo {
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

pub struct ScrfdDetector {
    session: Mutex<Session>,
    input_size: usize,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session: Mutex::new(session),
            input_size: SCRFD_INPUT_SIZE,
            stride_indices,
        })
    }

    fn infer(&self, session: &mut Session, gray: &GrayImage) -> Result<Vec<FaceRegion>, DetectorError> {
        let (input, letterbox) = preprocess(gray, self.input_size);
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };

            all_detections.extend(decode_stride(
                extract(score_idx, "scores")?,
                extract(bbox_idx, "bboxes")?,
                extract(kps_idx, "kps")?,
                stride,
                self.input_size,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        Ok(nms(all_detections, SCRFD_NMS_THRESHOLD))
    }
}

impl FaceDetector for ScrfdDetector {
    /// Faces sorted by descending confidence.
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceRegion>, CapabilityError> {
        if gray.width() == 0 || gray.height() == 0 {
            return Ok(Vec::new());
        }
        let mut session = self.session.lock().map_err(|_| CapabilityError::Poisoned("SCRFD"))?;
        Ok(self.infer(&mut session, gray)?)
    }
}

/// Letterbox a grayscale image into a square NCHW tensor normalized for SCRFD.
fn preprocess(gray: &GrayImage, input_size: usize) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = (gray.width() as f32, gray.height() as f32);
    let scale = (input_size as f32 / width).min(input_size as f32 / height);

    let new_w = ((width * scale).round() as u32).clamp(1, input_size as u32);
    let new_h = ((height * scale).round() as u32).clamp(1, input_size as u32);
    let pad_x = (input_size as u32 - new_w) as f32 / 2.0;
    let pad_y = (input_size as u32 - new_h) as f32 / 2.0;

    let resized = imageops::resize(gray, new_w, new_h, FilterType::Triangle);

    // Padding is left at zero, which is SCRFD_MEAN after normalization.
    let mut tensor = Array4::<f32>::zeros((1, 3, input_size, input_size));
    let (x_off, y_off) = (pad_x.floor() as usize, pad_y.floor() as usize);
    for (x, y, p) in resized.enumerate_pixels() {
        let normalized = (p[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
        let (tx, ty) = (x as usize + x_off, y as usize + y_off);
        // Grayscale → 3-channel: replicate Y
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = normalized;
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Map output tensors to stride slots by name ("score_8", "bbox_16", ...),
/// falling back to positional order [scores 8/16/32, bboxes 8/16/32, kps 8/16/32].
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named.and_then(|v| <[StrideOutputIndices; 3]>::try_from(v).ok()) {
        Some(indices) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            indices
        }
        None => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping"
            );
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<FaceRegion> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * step;
        let anchor_cy = (anchor_idx / grid) as f32 * step;

        let Some(b) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (x1, y1) = letterbox.unmap(anchor_cx - b[0] * step, anchor_cy - b[1] * step);
        let (x2, y2) = letterbox.unmap(anchor_cx + b[2] * step, anchor_cy + b[3] * step);

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            Landmarks::new(
                k.chunks_exact(2)
                    .map(|p| letterbox.unmap(anchor_cx + p[0] * step, anchor_cy + p[1] * step))
                    .collect(),
            )
        });

        detections.push(FaceRegion {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression; output is sorted by descending confidence.
fn nms(mut detections: Vec<FaceRegion>, iou_threshold: f32) -> Vec<FaceRegion> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceRegion> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-Union between two boxes.
fn iou(a: &FaceRegion, b: &FaceRegion) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter_area = inter_w * inter_h;
    let union_area = a.width * a.height + b.width * b.height - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
