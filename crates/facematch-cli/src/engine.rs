use crate::config::Config;
use facematch_core::detector::DetectorError;
use facematch_core::recognizer::RecognizerError;
use facematch_core::{
    ArcFaceEmbedder, BestMatch, Capabilities, EuclideanComparator, FaceImage, IdentityRecord,
    IdentityService, IdentityStore, Outcome, PipelineConfig, RegionLandmarks, ScrfdDetector,
    ServiceError, StoreError, ThresholdMatch, ARCFACE_SAME_IDENTITY_DISTANCE,
};
use facematch_store::SqliteStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("{op} timed out after {secs}s")]
    Timeout { op: &'static str, secs: u64 },
    #[error("{op} worker panicked or was cancelled: {source}")]
    Join {
        op: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
}

/// Owns the identity service and runs each call on the blocking pool,
/// bounded by the configured timeout.
pub struct Engine<S> {
    service: Arc<IdentityService<S>>,
    timeout: Duration,
}

impl Engine<SqliteStore> {
    /// Load both ONNX models and open the database. Fails fast if either
    /// model file or the database is unavailable.
    pub fn open(config: &Config) -> Result<Self, EngineError> {
        let detector = ScrfdDetector::load(&config.scrfd_model_path())?;
        tracing::info!(path = %config.scrfd_model_path().display(), "SCRFD detector loaded");

        let embedder = ArcFaceEmbedder::load(&config.arcface_model_path())?;
        tracing::info!(path = %config.arcface_model_path().display(), "ArcFace embedder loaded");

        let capabilities = Arc::new(Capabilities {
            detector: Box::new(detector),
            landmarks: Box::new(RegionLandmarks),
            embedder: Box::new(embedder),
            comparator: Box::new(EuclideanComparator::new(ARCFACE_SAME_IDENTITY_DISTANCE)),
        });

        let store = SqliteStore::open(&config.db_path)?;
        let pipeline = PipelineConfig {
            target_width: config.target_width,
            chip_size: config.chip_size,
        };

        Ok(Self::new(
            IdentityService::new(capabilities, pipeline, store),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    pub fn enrolled_count(&self) -> Result<usize, EngineError> {
        Ok(self.service.store().count()?)
    }
}

impl<S: IdentityStore + 'static> Engine<S> {
    pub fn new(service: IdentityService<S>, timeout: Duration) -> Self {
        Self {
            service: Arc::new(service),
            timeout,
        }
    }

    pub async fn enroll(
        &self,
        name: String,
        image: FaceImage,
        handle: String,
    ) -> Result<Outcome<String>, EngineError> {
        self.run("enroll", move |svc| svc.enroll(&name, &image, &handle)).await
    }

    pub async fn match_threshold(
        &self,
        image: FaceImage,
    ) -> Result<Outcome<Vec<ThresholdMatch>>, EngineError> {
        self.run("match", move |svc| svc.match_threshold(&image)).await
    }

    pub async fn match_best(&self, image: FaceImage) -> Result<Outcome<BestMatch>, EngineError> {
        self.run("best-match", move |svc| svc.match_best(&image)).await
    }

    pub async fn delete(&self, name: String) -> Result<(), EngineError> {
        self.run("delete", move |svc| svc.delete(&name)).await
    }

    pub async fn get(&self, name: String) -> Result<Outcome<IdentityRecord>, EngineError> {
        self.run("show", move |svc| svc.get(&name)).await
    }

    pub async fn list(&self) -> Result<Vec<IdentityRecord>, EngineError> {
        self.run("list", |svc| svc.list()).await
    }

    /// Run `f` on the blocking pool. On timeout the caller gets an error;
    /// the worker is not interrupted and its result is discarded.
    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&IdentityService<S>) -> Result<T, ServiceError> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let task = tokio::task::spawn_blocking(move || f(&service));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(source)) => Err(EngineError::Join { op, source }),
            Err(_) => {
                tracing::warn!(op, timeout_secs = self.timeout.as_secs(), "operation timed out");
                Err(EngineError::Timeout {
                    op,
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facematch_core::capability::{CapabilityError, FaceDetector, FaceEmbedder};
    use facematch_core::types::FaceRegion;
    use facematch_core::MemoryStore;
    use image::{GrayImage, RgbImage};

    /// Detector that finds nothing, optionally after a delay.
    struct EmptyDetector {
        delay: Duration,
    }

    impl FaceDetector for EmptyDetector {
        fn detect(&self, _gray: &GrayImage) -> Result<Vec<FaceRegion>, CapabilityError> {
            std::thread::sleep(self.delay);
            Ok(Vec::new())
        }
    }

    struct ZeroEmbedder;

    impl FaceEmbedder for ZeroEmbedder {
        fn input_size(&self) -> u32 {
            16
        }

        fn model_version(&self) -> Option<&str> {
            None
        }

        fn embed(&self, _face: &RgbImage) -> Result<Vec<f32>, CapabilityError> {
            Ok(vec![0.0; 4])
        }
    }

    fn engine(delay: Duration, timeout: Duration) -> Engine<MemoryStore> {
        let capabilities = Arc::new(Capabilities {
            detector: Box::new(EmptyDetector { delay }),
            landmarks: Box::new(RegionLandmarks),
            embedder: Box::new(ZeroEmbedder),
            comparator: Box::new(EuclideanComparator::default()),
        });
        Engine::new(
            IdentityService::new(capabilities, PipelineConfig::default(), MemoryStore::new()),
            timeout,
        )
    }

    fn blank() -> FaceImage {
        FaceImage::new(RgbImage::new(64, 48))
    }

    #[tokio::test]
    async fn test_no_face_passes_through() {
        let engine = engine(Duration::ZERO, Duration::from_secs(5));
        let outcome = engine.enroll("Alice".into(), blank(), "alice_h".into()).await.unwrap();
        assert_eq!(outcome, Outcome::NoFaceFound);
        assert!(engine.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_error_surfaces() {
        let engine = engine(Duration::ZERO, Duration::from_secs(5));
        let err = engine.delete("  ".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::Service(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let engine = engine(Duration::from_millis(500), Duration::from_millis(50));
        let err = engine.match_best(blank()).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { op: "best-match", .. }));
    }

    #[tokio::test]
    async fn test_delete_missing_and_show() {
        let engine = engine(Duration::ZERO, Duration::from_secs(5));
        engine.delete("Ghost".into()).await.unwrap();
        assert_eq!(engine.get("Ghost".into()).await.unwrap(), Outcome::NotFound);
    }
}
