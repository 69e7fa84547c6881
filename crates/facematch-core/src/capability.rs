//! Contracts for the vision models the pipeline depends on.
//!
//! Detection, landmark prediction and embedding are supplied from outside
//! as one immutable [`Capabilities`] bundle, built once by the process entry
//! point and shared by every pipeline stage.

use crate::alignment::AlignmentError;
use crate::matcher::Comparator;
use crate::types::{FaceRegion, Landmarks};
use image::{GrayImage, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face region has no landmarks; the detector must emit landmarks for alignment")]
    NoLandmarks,
    #[error("alignment failed: {0}")]
    Alignment(#[from] AlignmentError),
    #[error("{0} session lock poisoned")]
    Poisoned(&'static str),
}

/// Locates faces in a luminance image.
pub trait FaceDetector: Send + Sync {
    /// Faces in detector order. An empty list is a normal result.
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceRegion>, CapabilityError>;
}

/// Places a fixed number of ordered landmark points on a detected face.
pub trait LandmarkPredictor: Send + Sync {
    fn landmarks(&self, gray: &GrayImage, region: &FaceRegion) -> Result<Landmarks, CapabilityError>;
}

/// Maps an aligned face crop to a fixed-length vector.
pub trait FaceEmbedder: Send + Sync {
    /// Edge length of the square crop `embed` expects.
    fn input_size(&self) -> u32;

    /// Version tag stamped on every descriptor this embedder produces.
    fn model_version(&self) -> Option<&str>;

    fn embed(&self, face: &RgbImage) -> Result<Vec<f32>, CapabilityError>;
}

/// Landmark predictor for detectors that emit landmarks with each box.
pub struct RegionLandmarks;

impl LandmarkPredictor for RegionLandmarks {
    fn landmarks(&self, _gray: &GrayImage, region: &FaceRegion) -> Result<Landmarks, CapabilityError> {
        region.landmarks.clone().ok_or(CapabilityError::NoLandmarks)
    }
}

/// Everything the pipeline needs from the outside world, minus storage.
pub struct Capabilities {
    pub detector: Box<dyn FaceDetector>,
    pub landmarks: Box<dyn LandmarkPredictor>,
    pub embedder: Box<dyn FaceEmbedder>,
    pub comparator: Box<dyn Comparator>,
}
