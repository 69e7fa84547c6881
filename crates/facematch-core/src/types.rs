use crate::matcher::MatchError;
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A decoded RGB image submitted for enrollment or matching.
#[derive(Debug, Clone)]
pub struct FaceImage {
    pixels: RgbImage,
}

impl FaceImage {
    pub fn new(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    /// Decode an image file (JPEG, PNG, ...) into RGB.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, image::ImageError> {
        Ok(Self::new(image::open(path)?.to_rgb8()))
    }

    /// Decode an in-memory encoded image, e.g. an uploaded file body.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, image::ImageError> {
        Ok(Self::new(image::load_from_memory(bytes)?.to_rgb8()))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}

/// Ordered facial landmark points in pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub points: Vec<(f32, f32)>,
}

impl Landmarks {
    pub fn new(points: Vec<(f32, f32)>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl From<[(f32, f32); 5]> for Landmarks {
    fn from(points: [(f32, f32); 5]) -> Self {
        Self::new(points.to_vec())
    }
}

/// A face located by a detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Landmarks emitted together with the box, for detectors that produce them.
    pub landmarks: Option<Landmarks>,
}

/// A face warped into canonical pose at a fixed square size.
#[derive(Debug, Clone)]
pub struct AlignedChip {
    pixels: RgbImage,
}

impl AlignedChip {
    pub(crate) fn new(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    /// Edge length in pixels.
    pub fn size(&self) -> u32 {
        self.pixels.width()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn to_luma(&self) -> GrayImage {
        image::imageops::grayscale(&self.pixels)
    }
}

/// Fixed-length face descriptor produced by an embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Model version that produced this descriptor (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Descriptor {
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// False if any component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Fail unless both descriptors could have come from the same encoder.
    pub fn check_compatible(&self, other: &Descriptor) -> Result<(), MatchError> {
        if self.values.len() != other.values.len() {
            return Err(MatchError::DimensionMismatch {
                expected: self.values.len(),
                actual: other.values.len(),
            });
        }
        if let (Some(ours), Some(theirs)) = (&self.model_version, &other.model_version) {
            if ours != theirs {
                return Err(MatchError::EncoderMismatch {
                    expected: ours.clone(),
                    actual: theirs.clone(),
                });
            }
        }
        Ok(())
    }

    /// Euclidean distance to another descriptor of the same encoder.
    pub fn euclidean_distance(&self, other: &Descriptor) -> Result<f32, MatchError> {
        self.check_compatible(other)?;
        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }
}

/// Public profile data stored next to a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    pub handle: String,
    pub profile_link: String,
    /// RFC 3339 timestamp of the enrollment write.
    pub enrolled_at: String,
}

/// A stored identity, keyed by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub name: String,
    pub descriptor: Descriptor,
    pub metadata: ProfileMetadata,
}

/// One identity accepted by the threshold matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdMatch {
    pub name: String,
    pub metadata: ProfileMetadata,
}

/// The closest stored identity to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestMatch {
    pub name: String,
    pub metadata: ProfileMetadata,
    pub distance: f32,
    /// `1 - distance`; not clamped, so distant faces score below zero.
    pub similarity: f32,
}

impl BestMatch {
    /// Similarity rendered as a percentage with two decimals, e.g. "97.31%".
    pub fn similarity_percent(&self) -> String {
        format!("{:.2}%", self.similarity * 100.0)
    }
}

/// Result of a pipeline or service call that can legitimately come up empty.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    /// No face in the submitted image (or in its aligned chip).
    NoFaceFound,
    /// The query ran, but nothing stored matched or the store is empty.
    NotFound,
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::NoFaceFound => Outcome::NoFaceFound,
            Outcome::NotFound => Outcome::NotFound,
        }
    }

    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}
