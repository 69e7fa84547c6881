//! Identity operations exposed to callers.
//!
//! Expected negatives (`NoFaceFound`, `NotFound`) come back as [`Outcome`]
//! values. `Err` is reserved for invalid input, incompatible descriptors,
//! store failures and model failures. Nothing is retried.

use crate::capability::{Capabilities, CapabilityError};
use crate::enrollment;
use crate::matcher::{self, MatchError};
use crate::pipeline::{FacePipeline, PipelineConfig};
use crate::store::{IdentityStore, StoreError};
use crate::types::{BestMatch, Descriptor, FaceImage, IdentityRecord, Outcome, ThresholdMatch};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

pub struct IdentityService<S> {
    capabilities: Arc<Capabilities>,
    pipeline: FacePipeline,
    store: S,
}

impl<S: IdentityStore> IdentityService<S> {
    pub fn new(capabilities: Arc<Capabilities>, config: PipelineConfig, store: S) -> Self {
        Self {
            pipeline: FacePipeline::new(Arc::clone(&capabilities), config),
            capabilities,
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Encode `image` and store it under `name`, replacing any existing record.
    ///
    /// Succeeds with the enrolled name.
    pub fn enroll(
        &self,
        name: &str,
        image: &FaceImage,
        handle: &str,
    ) -> Result<Outcome<String>, ServiceError> {
        enrollment::require("name", name).map_err(ServiceError::Validation)?;
        enrollment::require("handle", handle).map_err(ServiceError::Validation)?;

        let descriptor = match self.pipeline.describe(image)? {
            Outcome::Success(descriptor) => descriptor,
            _ => {
                tracing::info!(name, "enroll: no face found, nothing written");
                return Ok(Outcome::NoFaceFound);
            }
        };

        let record = enrollment::new_record(name, handle, descriptor);
        self.store.set(&record)?;
        tracing::info!(
            name,
            handle,
            dimension = record.descriptor.dimension(),
            "identity enrolled"
        );
        Ok(Outcome::Success(record.name))
    }

    /// Every stored identity the comparator accepts as the face in `image`.
    pub fn match_threshold(
        &self,
        image: &FaceImage,
    ) -> Result<Outcome<Vec<ThresholdMatch>>, ServiceError> {
        let Some(query) = self.encode_query(image)? else {
            return Ok(Outcome::NoFaceFound);
        };
        let gallery = self.store.all()?;
        if gallery.is_empty() {
            tracing::info!("match: no identities enrolled");
            return Ok(Outcome::NotFound);
        }

        let matches = matcher::match_threshold(&query, &gallery, self.capabilities.comparator.as_ref())?;
        tracing::info!(gallery = gallery.len(), matched = matches.len(), "threshold match finished");
        if matches.is_empty() {
            return Ok(Outcome::NotFound);
        }
        Ok(Outcome::Success(matches))
    }

    /// The single closest stored identity to the face in `image`.
    ///
    /// No distance cutoff applies: with at least one enrolled identity this
    /// always succeeds, however poor the closest match is.
    pub fn match_best(&self, image: &FaceImage) -> Result<Outcome<BestMatch>, ServiceError> {
        let Some(query) = self.encode_query(image)? else {
            return Ok(Outcome::NoFaceFound);
        };
        let gallery = self.store.all()?;

        match matcher::match_best(&query, &gallery, self.capabilities.comparator.as_ref())? {
            Some(best) => {
                tracing::info!(
                    gallery = gallery.len(),
                    name = %best.name,
                    distance = best.distance,
                    "best match found"
                );
                Ok(Outcome::Success(best))
            }
            None => {
                tracing::info!("best match: no identities enrolled");
                Ok(Outcome::NotFound)
            }
        }
    }

    /// Remove `name`. Removing an identity that does not exist succeeds.
    pub fn delete(&self, name: &str) -> Result<(), ServiceError> {
        enrollment::require("name", name).map_err(ServiceError::Validation)?;
        self.store.delete(name)?;
        tracing::info!(name, "identity deleted");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Outcome<IdentityRecord>, ServiceError> {
        Ok(match self.store.get(name)? {
            Some(record) => Outcome::Success(record),
            None => Outcome::NotFound,
        })
    }

    /// All enrolled identities, in store order.
    pub fn list(&self) -> Result<Vec<IdentityRecord>, ServiceError> {
        Ok(self.store.all()?)
    }

    fn encode_query(&self, image: &FaceImage) -> Result<Option<Descriptor>, ServiceError> {
        let outcome = self.pipeline.describe(image)?;
        if !outcome.is_success() {
            tracing::info!("query image: no face found");
        }
        Ok(outcome.success())
    }
}
