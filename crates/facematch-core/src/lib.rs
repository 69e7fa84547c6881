//! facematch-core: face normalization, descriptors and identity matching.
//!
//! Images are resized, aligned into a canonical chip, encoded into a
//! fixed-length descriptor and compared against an [`IdentityStore`].
//! Detection and embedding run SCRFD and ArcFace via ONNX Runtime; both sit
//! behind the traits in [`capability`] so tests and alternative models can
//! be swapped in.

pub mod alignment;
pub mod capability;
pub mod detector;
pub mod encoder;
pub mod enrollment;
pub mod matcher;
pub mod pipeline;
pub mod recognizer;
pub mod service;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use capability::{Capabilities, CapabilityError, RegionLandmarks};
pub use detector::ScrfdDetector;
pub use matcher::{Comparator, EuclideanComparator, MatchError};
pub use pipeline::PipelineConfig;
pub use recognizer::{ArcFaceEmbedder, ARCFACE_SAME_IDENTITY_DISTANCE};
pub use service::{IdentityService, ServiceError};
pub use store::{IdentityStore, MemoryStore, StoreError};
pub use types::{BestMatch, Descriptor, FaceImage, IdentityRecord, Outcome, ProfileMetadata, ThresholdMatch};
