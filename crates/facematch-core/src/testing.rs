//! Deterministic stand-ins for the vision models, for unit tests.

use crate::capability::{Capabilities, CapabilityError, FaceDetector, FaceEmbedder, LandmarkPredictor};
use crate::matcher::{EuclideanComparator, DEFAULT_TOLERANCE};
use crate::store::{IdentityStore, MemoryStore, StoreError};
use crate::types::{FaceImage, FaceRegion, IdentityRecord, Landmarks};
use image::{GrayImage, Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const GRID_CELLS: u32 = 8;
const GRID_CELL_PX: u32 = 8;
pub const GRID_DIMENSION: usize = (GRID_CELLS * GRID_CELLS) as usize;
pub const GRID_MODEL_VERSION: &str = "grid-8x8";

/// Luminance above which a pixel counts as part of a face.
const FACE_LUMA_MIN: u8 = 16;

/// A dark frame with one bright rectangular "face" of the given shade,
/// with darker eye and mouth marks. Every pixel value scales with `shade`.
pub fn face_image(width: u32, height: u32, shade: u8) -> FaceImage {
    let side = width.min(height) as f32;
    let (fw, fh) = (side * 0.5, side * 0.6);
    let (fx, fy) = ((width as f32 - fw) / 2.0, (height as f32 - fh) / 2.0);
    let mark = Rgb([shade / 2; 3]);

    FaceImage::new(RgbImage::from_fn(width, height, |x, y| {
        let u = (x as f32 - fx) / fw;
        let v = (y as f32 - fy) / fh;
        if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
            return Rgb([0; 3]);
        }
        let eye = (0.35..0.45).contains(&v) && ((0.25..0.35).contains(&u) || (0.65..0.75).contains(&u));
        let mouth = (0.78..0.83).contains(&v) && (0.35..0.65).contains(&u);
        if eye || mouth {
            mark
        } else {
            Rgb([shade; 3])
        }
    }))
}

/// Bounding box of all pixels brighter than [`FACE_LUMA_MIN`].
fn bright_region(gray: &GrayImage) -> Option<FaceRegion> {
    let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0u32, 0u32);
    for (x, y, p) in gray.enumerate_pixels() {
        if p[0] > FACE_LUMA_MIN {
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
    }
    (x0 <= x1).then(|| FaceRegion {
        x: x0 as f32,
        y: y0 as f32,
        width: (x1 - x0 + 1) as f32,
        height: (y1 - y0 + 1) as f32,
        confidence: 1.0,
        landmarks: None,
    })
}

/// Finds the single bright region, if any.
pub struct BrightRegionDetector;

impl FaceDetector for BrightRegionDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceRegion>, CapabilityError> {
        Ok(bright_region(gray).into_iter().collect())
    }
}

/// Like [`BrightRegionDetector`], but blind to images narrower than `min_width`.
pub struct SizeGatedDetector {
    pub min_width: u32,
}

impl FaceDetector for SizeGatedDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceRegion>, CapabilityError> {
        if gray.width() < self.min_width {
            return Ok(Vec::new());
        }
        BrightRegionDetector.detect(gray)
    }
}

/// Reports fixed boxes in a fixed order, ignoring image content.
pub struct ListedFacesDetector {
    regions: Vec<FaceRegion>,
}

impl ListedFacesDetector {
    fn region(x: f32, y: f32, width: f32, height: f32) -> FaceRegion {
        FaceRegion { x, y, width, height, confidence: 0.9, landmarks: None }
    }

    pub fn small_first() -> Self {
        Self {
            regions: vec![
                Self::region(40.0, 40.0, 100.0, 120.0),
                Self::region(300.0, 150.0, 200.0, 240.0),
            ],
        }
    }

    pub fn large_first() -> Self {
        let mut detector = Self::small_first();
        detector.regions.reverse();
        detector
    }
}

impl FaceDetector for ListedFacesDetector {
    fn detect(&self, _gray: &GrayImage) -> Result<Vec<FaceRegion>, CapabilityError> {
        Ok(self.regions.clone())
    }
}

/// Five points at fixed proportions of the face box.
pub struct ProportionalLandmarks;

impl LandmarkPredictor for ProportionalLandmarks {
    fn landmarks(&self, _gray: &GrayImage, r: &FaceRegion) -> Result<Landmarks, CapabilityError> {
        let at = |u: f32, v: f32| (r.x + u * r.width, r.y + v * r.height);
        Ok(Landmarks::new(vec![
            at(0.3, 0.4),
            at(0.7, 0.4),
            at(0.5, 0.6),
            at(0.35, 0.8),
            at(0.65, 0.8),
        ]))
    }
}

/// Mean luminance over an 8×8 grid, scaled to [0, 1].
pub struct GridEmbedder;

impl FaceEmbedder for GridEmbedder {
    fn input_size(&self) -> u32 {
        GRID_CELLS * GRID_CELL_PX
    }

    fn model_version(&self) -> Option<&str> {
        Some(GRID_MODEL_VERSION)
    }

    fn embed(&self, face: &RgbImage) -> Result<Vec<f32>, CapabilityError> {
        if face.width() != self.input_size() || face.height() != self.input_size() {
            return Err(CapabilityError::InferenceFailed(format!(
                "expected {0}x{0} input, got {1}x{2}",
                self.input_size(),
                face.width(),
                face.height()
            )));
        }
        let gray = image::imageops::grayscale(face);
        let mut values = vec![0.0f32; GRID_DIMENSION];
        for (x, y, p) in gray.enumerate_pixels() {
            let cell = (y / GRID_CELL_PX * GRID_CELLS + x / GRID_CELL_PX) as usize;
            values[cell] += p[0] as f32;
        }
        let per_cell = (GRID_CELL_PX * GRID_CELL_PX) as f32 * 255.0;
        Ok(values.into_iter().map(|v| v / per_cell).collect())
    }
}

/// [`GridEmbedder`] with a NaN in its first component.
pub struct NanEmbedder;

impl FaceEmbedder for NanEmbedder {
    fn input_size(&self) -> u32 {
        GridEmbedder.input_size()
    }

    fn model_version(&self) -> Option<&str> {
        GridEmbedder.model_version()
    }

    fn embed(&self, face: &RgbImage) -> Result<Vec<f32>, CapabilityError> {
        let mut values = GridEmbedder.embed(face)?;
        values[0] = f32::NAN;
        Ok(values)
    }
}

pub fn capabilities() -> Arc<Capabilities> {
    capabilities_with(BrightRegionDetector, GridEmbedder)
}

pub fn capabilities_with_detector(detector: impl FaceDetector + 'static) -> Arc<Capabilities> {
    capabilities_with(detector, GridEmbedder)
}

pub fn capabilities_with_embedder(embedder: impl FaceEmbedder + 'static) -> Arc<Capabilities> {
    capabilities_with(BrightRegionDetector, embedder)
}

fn capabilities_with(
    detector: impl FaceDetector + 'static,
    embedder: impl FaceEmbedder + 'static,
) -> Arc<Capabilities> {
    Arc::new(Capabilities {
        detector: Box::new(detector),
        landmarks: Box::new(ProportionalLandmarks),
        embedder: Box::new(embedder),
        comparator: Box::new(EuclideanComparator::new(DEFAULT_TOLERANCE)),
    })
}

/// Memory store that counts every call made against it.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn accesses(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl IdentityStore for CountingStore {
    fn get(&self, name: &str) -> Result<Option<IdentityRecord>, StoreError> {
        self.touch();
        self.inner.get(name)
    }

    fn all(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        self.touch();
        self.inner.all()
    }

    fn set(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        self.touch();
        self.inner.set(record)
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.touch();
        self.inner.delete(name)
    }
}

/// Store whose backend is always unreachable.
pub struct FailingStore;

impl FailingStore {
    fn unreachable() -> StoreError {
        StoreError::Backend("connection refused".into())
    }
}

impl IdentityStore for FailingStore {
    fn get(&self, _name: &str) -> Result<Option<IdentityRecord>, StoreError> {
        Err(Self::unreachable())
    }

    fn all(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        Err(Self::unreachable())
    }

    fn set(&self, _record: &IdentityRecord) -> Result<(), StoreError> {
        Err(Self::unreachable())
    }

    fn delete(&self, _name: &str) -> Result<(), StoreError> {
        Err(Self::unreachable())
    }
}
