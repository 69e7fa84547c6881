//! Geometric normalization via 4-DOF similarity transform.
//!
//! Resizes the submitted image to a fixed working width, locates the first
//! face, and warps it onto a canonical landmark template so every chip has
//! the eyes, nose and mouth in the same place regardless of source scale or
//! in-plane rotation.

use crate::capability::{Capabilities, CapabilityError};
use crate::types::{AlignedChip, FaceImage, Landmarks, Outcome};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use std::sync::Arc;
use thiserror::Error;

/// InsightFace reference landmarks for a 112×112 face crop.
pub const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

const REFERENCE_SIZE: f32 = 112.0;

/// Working width every submitted image is resized to before detection.
pub const DEFAULT_TARGET_WIDTH: u32 = 800;

/// Edge length of the aligned chip handed to the encoder.
pub const DEFAULT_CHIP_SIZE: u32 = 256;

/// Longest side over shortest side beyond which an image is refused
/// instead of resized.
pub const MAX_ASPECT_RATIO: u32 = 8;

/// Border around the reference layout, as a fraction of the face box per side.
pub const CHIP_PADDING: f32 = 0.25;

#[derive(Error, Debug)]
pub enum AlignmentError {
    #[error("expected {expected} landmarks to match the template, got {actual}")]
    LandmarkCount { expected: usize, actual: usize },
    #[error("landmarks are degenerate (all points coincide)")]
    Degenerate,
    #[error("cannot align an empty image")]
    EmptyImage,
    #[error("image is {width}x{height}; aspect ratio exceeds {max}:1", max = MAX_ASPECT_RATIO)]
    ExtremeAspectRatio { width: u32, height: u32 },
}

/// The reference layout scaled into a `size`×`size` square with `padding`
/// on each side.
pub fn reference_template(size: u32, padding: f32) -> Landmarks {
    let scale = size as f32 / (1.0 + 2.0 * padding);
    Landmarks::new(
        REFERENCE_LANDMARKS_112
            .iter()
            .map(|&(x, y)| {
                (
                    (x / REFERENCE_SIZE + padding) * scale,
                    (y / REFERENCE_SIZE + padding) * scale,
                )
            })
            .collect(),
    )
}

/// Rotation + uniform scale + translation:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    /// Least-squares fit mapping `src` points onto `dst` points.
    ///
    /// Closed form of the 4-parameter normal equations, solved on centered
    /// coordinates.
    pub fn estimate(src: &Landmarks, dst: &Landmarks) -> Result<Self, AlignmentError> {
        if src.len() != dst.len() || src.len() < 2 {
            return Err(AlignmentError::LandmarkCount {
                expected: dst.len(),
                actual: src.len(),
            });
        }

        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32)]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(&src.points);
        let (mdx, mdy) = mean(&dst.points);

        let mut norm = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.points.iter().zip(dst.points.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            norm += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }

        if norm < 1e-12 {
            return Err(AlignmentError::Degenerate);
        }

        let a = dot / norm;
        let b = cross / norm;
        Ok(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Uniform scale factor applied by the transform.
    pub fn scale(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }
}

/// Warp `image` through `transform` into a `size`×`size` output.
///
/// Bilinear interpolation; samples outside the source are black.
fn warp_similarity(image: &RgbImage, transform: &SimilarityTransform, size: u32) -> RgbImage {
    let det = transform.a * transform.a + transform.b * transform.b;
    if det < 1e-12 {
        return RgbImage::new(size, size);
    }
    let ia = transform.a / det;
    let ib = transform.b / det;

    let (w, h) = (image.width() as i64, image.height() as i64);
    let sample = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && x < w && y >= 0 && y < h {
            let Rgb(p) = *image.get_pixel(x as u32, y as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    RgbImage::from_fn(size, size, |ox, oy| {
        // Inverse map: src = M^-1 * (dst - t)
        let dx = ox as f32 - transform.tx;
        let dy = oy as f32 - transform.ty;
        let sx = ia * dx + ib * dy;
        let sy = -ib * dx + ia * dy;

        let x0 = sx.floor() as i64;
        let y0 = sy.floor() as i64;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let tl = sample(x0, y0);
        let tr = sample(x0 + 1, y0);
        let bl = sample(x0, y0 + 1);
        let br = sample(x0 + 1, y0 + 1);

        let mut out = [0u8; 3];
        for c in 0..3 {
            let val = tl[c] * (1.0 - fx) * (1.0 - fy)
                + tr[c] * fx * (1.0 - fy)
                + bl[c] * (1.0 - fx) * fy
                + br[c] * fx * fy;
            out[c] = val.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}

/// Warp the face described by `landmarks` onto `template` at `size`×`size`.
pub fn extract_chip(
    image: &RgbImage,
    landmarks: &Landmarks,
    template: &Landmarks,
    size: u32,
) -> Result<RgbImage, AlignmentError> {
    if landmarks.len() != template.len() {
        return Err(AlignmentError::LandmarkCount {
            expected: template.len(),
            actual: landmarks.len(),
        });
    }
    let transform = SimilarityTransform::estimate(landmarks, template)?;
    Ok(warp_similarity(image, &transform, size))
}

/// Resize to `target_width`, keeping the aspect ratio:
/// `height = round(target_width * height / width)`.
///
/// Images more than [`MAX_ASPECT_RATIO`] times longer on one side than the
/// other are rejected, which bounds the output at `target_width²·8` pixels.
pub fn resize_to_width(image: &RgbImage, target_width: u32) -> Result<RgbImage, AlignmentError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(AlignmentError::EmptyImage);
    }
    if u64::from(width.max(height)) > u64::from(width.min(height)) * u64::from(MAX_ASPECT_RATIO) {
        return Err(AlignmentError::ExtremeAspectRatio { width, height });
    }
    let target_height = (target_width as f64 * image.height() as f64 / image.width() as f64)
        .round()
        .max(1.0) as u32;
    Ok(imageops::resize(image, target_width, target_height, FilterType::Triangle))
}

/// First pipeline stage: raw image in, canonical chip out.
pub struct Normalizer {
    capabilities: Arc<Capabilities>,
    target_width: u32,
    chip_size: u32,
    template: Landmarks,
}

impl Normalizer {
    pub fn new(capabilities: Arc<Capabilities>, target_width: u32, chip_size: u32) -> Self {
        Self {
            capabilities,
            target_width,
            chip_size,
            template: reference_template(chip_size, CHIP_PADDING),
        }
    }

    /// Align the first detected face, or report that there is none.
    ///
    /// Faces are taken in the order the detector lists them; there is no
    /// re-ranking by size or confidence here.
    pub fn align(&self, image: &FaceImage) -> Result<Outcome<AlignedChip>, CapabilityError> {
        let resized = resize_to_width(image.pixels(), self.target_width)?;
        let gray = imageops::grayscale(&resized);

        let faces = self.capabilities.detector.detect(&gray)?;
        let Some(face) = faces.first() else {
            tracing::debug!(
                width = resized.width(),
                height = resized.height(),
                "align: no face detected"
            );
            return Ok(Outcome::NoFaceFound);
        };
        tracing::debug!(
            detected = faces.len(),
            x = face.x,
            y = face.y,
            width = face.width,
            height = face.height,
            confidence = face.confidence,
            "align: using first face"
        );

        let landmarks = self.capabilities.landmarks.landmarks(&gray, face)?;
        let chip = extract_chip(&resized, &landmarks, &self.template, self.chip_size)?;
        Ok(Outcome::Success(AlignedChip::new(chip)))
    }
}
