//! Descriptor encoding for aligned chips.
//!
//! The embedder only accepts faces aligned to its own input layout, so the
//! face is detected a second time inside the chip and re-aligned to the
//! unpadded reference template before embedding.

use crate::alignment::{extract_chip, reference_template};
use crate::capability::{Capabilities, CapabilityError};
use crate::types::{AlignedChip, Descriptor, Landmarks, Outcome};
use std::sync::Arc;

pub struct DescriptorEncoder {
    capabilities: Arc<Capabilities>,
    template: Landmarks,
}

impl DescriptorEncoder {
    pub fn new(capabilities: Arc<Capabilities>) -> Self {
        let template = reference_template(capabilities.embedder.input_size(), 0.0);
        Self { capabilities, template }
    }

    /// Encode the first face found in `chip`.
    pub fn encode(&self, chip: &AlignedChip) -> Result<Outcome<Descriptor>, CapabilityError> {
        let gray = chip.to_luma();
        let faces = self.capabilities.detector.detect(&gray)?;
        let Some(face) = faces.first() else {
            tracing::debug!(chip_size = chip.size(), "encode: no face re-detected in aligned chip");
            return Ok(Outcome::NoFaceFound);
        };

        let landmarks = self.capabilities.landmarks.landmarks(&gray, face)?;
        let embedder = &self.capabilities.embedder;
        let crop = extract_chip(chip.pixels(), &landmarks, &self.template, embedder.input_size())?;
        let values = embedder.embed(&crop)?;
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(CapabilityError::InferenceFailed(format!(
                "embedder produced a non-finite value at index {pos}"
            )));
        }

        tracing::debug!(dimension = values.len(), "encode: descriptor extracted");

        Ok(Outcome::Success(Descriptor {
            values,
            model_version: embedder.model_version().map(str::to_string),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::Normalizer;
    use crate::testing;

    fn chip_for(shade: u8) -> AlignedChip {
        Normalizer::new(testing::capabilities(), 800, 256)
            .align(&testing::face_image(640, 480, shade))
            .unwrap()
            .success()
            .unwrap()
    }

    #[test]
    fn test_encode_fixed_dimension() {
        let encoder = DescriptorEncoder::new(testing::capabilities());
        let descriptor = encoder.encode(&chip_for(200)).unwrap().success().unwrap();
        assert_eq!(descriptor.dimension(), testing::GRID_DIMENSION);
        assert_eq!(descriptor.model_version.as_deref(), Some(testing::GRID_MODEL_VERSION));
    }

    #[test]
    fn test_encode_is_deterministic() {
        let encoder = DescriptorEncoder::new(testing::capabilities());
        let chip = chip_for(180);
        let a = encoder.encode(&chip).unwrap().success().unwrap();
        let b = encoder.encode(&chip).unwrap().success().unwrap();
        assert_eq!(a.euclidean_distance(&b).unwrap(), 0.0);
    }

    #[test]
    fn test_encode_no_face_in_chip() {
        // Alignment succeeds on the full image but the chip-sized re-detection fails.
        let chip = chip_for(200);
        let caps = testing::capabilities_with_detector(testing::SizeGatedDetector { min_width: 300 });
        let encoder = DescriptorEncoder::new(caps);
        assert!(matches!(encoder.encode(&chip).unwrap(), Outcome::NoFaceFound));
    }

    #[test]
    fn test_encode_rejects_non_finite_embedding() {
        let encoder = DescriptorEncoder::new(testing::capabilities_with_embedder(testing::NanEmbedder));
        let err = encoder.encode(&chip_for(200)).unwrap_err();
        assert!(matches!(err, CapabilityError::InferenceFailed(ref msg) if msg.contains("index 0")));
    }
}
