//! Image → descriptor pipeline: normalize, then encode.

use crate::alignment::{Normalizer, DEFAULT_CHIP_SIZE, DEFAULT_TARGET_WIDTH};
use crate::capability::{Capabilities, CapabilityError};
use crate::encoder::DescriptorEncoder;
use crate::types::{Descriptor, FaceImage, Outcome};
use std::sync::Arc;

/// Geometry of the normalization stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Width every input image is resized to before detection.
    pub target_width: u32,
    /// Edge length of the aligned chip.
    pub chip_size: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_width: DEFAULT_TARGET_WIDTH,
            chip_size: DEFAULT_CHIP_SIZE,
        }
    }
}

pub struct FacePipeline {
    normalizer: Normalizer,
    encoder: DescriptorEncoder,
}

impl FacePipeline {
    pub fn new(capabilities: Arc<Capabilities>, config: PipelineConfig) -> Self {
        Self {
            normalizer: Normalizer::new(Arc::clone(&capabilities), config.target_width, config.chip_size),
            encoder: DescriptorEncoder::new(capabilities),
        }
    }

    /// Descriptor of the first face in `image`, or `NoFaceFound` from either stage.
    pub fn describe(&self, image: &FaceImage) -> Result<Outcome<Descriptor>, CapabilityError> {
        let chip = match self.normalizer.align(image)? {
            Outcome::Success(chip) => chip,
            Outcome::NoFaceFound => return Ok(Outcome::NoFaceFound),
            Outcome::NotFound => return Ok(Outcome::NotFound),
        };
        self.encoder.encode(&chip)
    }
}
