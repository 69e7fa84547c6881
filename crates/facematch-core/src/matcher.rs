//! Gallery matching: threshold membership and nearest neighbor.

use crate::types::{BestMatch, Descriptor, IdentityRecord, ThresholdMatch};
use thiserror::Error;

/// Tolerance for 128-d dlib-style descriptors.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("descriptor dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("descriptor encoder mismatch: expected {expected}, got {actual}")]
    EncoderMismatch { expected: String, actual: String },
    #[error("non-finite distance to stored identity {name}")]
    NonFiniteDistance { name: String },
}

/// Distance and same-identity decision between two descriptors.
pub trait Comparator: Send + Sync {
    fn distance(&self, a: &Descriptor, b: &Descriptor) -> Result<f32, MatchError>;

    /// Largest distance still judged to be the same person.
    fn tolerance(&self) -> f32;

    fn is_same_identity(&self, a: &Descriptor, b: &Descriptor) -> Result<bool, MatchError> {
        Ok(self.distance(a, b)? <= self.tolerance())
    }
}

/// Euclidean distance with a fixed cutoff.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanComparator {
    tolerance: f32,
}

impl EuclideanComparator {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }
}

impl Default for EuclideanComparator {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl Comparator for EuclideanComparator {
    fn distance(&self, a: &Descriptor, b: &Descriptor) -> Result<f32, MatchError> {
        a.euclidean_distance(b)
    }

    fn tolerance(&self) -> f32 {
        self.tolerance
    }
}

/// Distance from the query to one stored record. The query comes first, so
/// a mismatch reports the query's encoder as the expected one.
fn distance_to(
    query: &Descriptor,
    record: &IdentityRecord,
    comparator: &dyn Comparator,
) -> Result<f32, MatchError> {
    let dist = comparator.distance(query, &record.descriptor)?;
    if !dist.is_finite() {
        return Err(MatchError::NonFiniteDistance { name: record.name.clone() });
    }
    Ok(dist)
}

/// Every stored identity the comparator accepts, in gallery order.
///
/// An incompatible descriptor anywhere in the gallery fails the whole call.
pub fn match_threshold(
    query: &Descriptor,
    gallery: &[IdentityRecord],
    comparator: &dyn Comparator,
) -> Result<Vec<ThresholdMatch>, MatchError> {
    let mut matches = Vec::new();
    for record in gallery {
        if distance_to(query, record, comparator)? <= comparator.tolerance() {
            matches.push(ThresholdMatch {
                name: record.name.clone(),
                metadata: record.metadata.clone(),
            });
        }
    }
    Ok(matches)
}

/// The stored identity closest to `query`, with no distance cutoff.
///
/// Returns `None` only for an empty gallery. On exact ties the earlier
/// gallery entry wins.
pub fn match_best(
    query: &Descriptor,
    gallery: &[IdentityRecord],
    comparator: &dyn Comparator,
) -> Result<Option<BestMatch>, MatchError> {
    let mut best_dist = f32::INFINITY;
    let mut best_idx: Option<usize> = None;

    for (i, record) in gallery.iter().enumerate() {
        let dist = distance_to(query, record, comparator)?;
        if best_idx.is_none() || dist < best_dist {
            best_dist = dist;
            best_idx = Some(i);
        }
    }

    Ok(best_idx.map(|idx| BestMatch {
        name: gallery[idx].name.clone(),
        metadata: gallery[idx].metadata.clone(),
        distance: best_dist,
        similarity: 1.0 - best_dist,
    }))
}
