//! ArcFace face embedder via ONNX Runtime.
//!
//! Produces 512-dimensional, L2-normalized embeddings from 112x112 RGB crops
//! using the w600k_r50 ArcFace model.

use crate::capability::{CapabilityError, FaceEmbedder};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // NOT 128.0, ArcFace uses symmetric normalization
const ARCFACE_EMBEDDING_DIM: usize = 512;
pub const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

/// Euclidean distance at or below which two unit ArcFace embeddings are
/// treated as one identity (cosine similarity ≈ 0.40).
pub const ARCFACE_SAME_IDENTITY_DISTANCE: f32 = 1.10;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} (download w600k_r50.onnx from insightface into the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<RecognizerError> for CapabilityError {
    fn from(err: RecognizerError) -> Self {
        CapabilityError::InferenceFailed(format!("ArcFace: {err}"))
    }
}

pub struct ArcFaceEmbedder {
    session: Mutex<Session>,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session: Mutex::new(session) })
    }

    fn infer(session: &mut Session, face: &RgbImage) -> Result<Vec<f32>, RecognizerError> {
        let input = preprocess(face);
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw_data.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw_data.len()
            )));
        }

        Ok(l2_normalize(raw_data.to_vec()))
    }
}

impl FaceEmbedder for ArcFaceEmbedder {
    fn input_size(&self) -> u32 {
        ARCFACE_INPUT_SIZE as u32
    }

    fn model_version(&self) -> Option<&str> {
        Some(ARCFACE_MODEL_VERSION)
    }

    fn embed(&self, face: &RgbImage) -> Result<Vec<f32>, CapabilityError> {
        if face.width() != self.input_size() || face.height() != self.input_size() {
            return Err(CapabilityError::InferenceFailed(format!(
                "ArcFace expects {ARCFACE_INPUT_SIZE}x{ARCFACE_INPUT_SIZE} input, got {}x{}",
                face.width(),
                face.height()
            )));
        }
        let mut session = self.session.lock().map_err(|_| CapabilityError::Poisoned("ArcFace"))?;
        Ok(Self::infer(&mut session, face)?)
    }
}

/// Convert an aligned RGB crop into a NCHW float tensor.
fn preprocess(face: &RgbImage) -> Array4<f32> {
    let (w, h) = (face.width() as usize, face.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));

    for (x, y, p) in face.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (p[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }

    tensor
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}
