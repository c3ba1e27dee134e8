//! The `PoseDetector` capability consumed by the capture pipeline.
//!
//! Implementations own the detection model and have an explicit
//! uninitialized → loading → ready lifecycle. Every call made before
//! `Ready` is rejected with `CaptureError::ModelNotReady`.

use crate::detector::{DetectorError, FaceDetector};
use crate::error::CaptureError;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Detection, FaceDescriptor, FaceFrame};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelState {
    Uninitialized,
    Loading,
    Ready,
    /// Load failed; terminal for the process.
    Failed,
}

pub trait PoseDetector {
    fn state(&self) -> ModelState;

    /// Locate at most one primary face. `Ok(None)` when no face is present.
    fn detect_primary_face(&mut self, frame: &FaceFrame) -> Result<Option<Detection>, CaptureError>;

    /// Higher-fidelity pass used only at a committed capture.
    ///
    /// Fails with `NoFaceDetected` when the frame has no face.
    fn extract_descriptor(&mut self, frame: &FaceFrame) -> Result<FaceDescriptor, CaptureError>;
}

/// Reject calls unless the detector is `Ready`.
pub fn ensure_ready(detector: &dyn PoseDetector) -> Result<(), CaptureError> {
    match detector.state() {
        ModelState::Ready => Ok(()),
        other => Err(CaptureError::ModelNotReady(other)),
    }
}

/// Pick the primary face: largest box area, then highest confidence.
pub fn select_primary(detections: Vec<Detection>) -> Option<Detection> {
    detections.into_iter().max_by(|a, b| {
        a.bbox
            .area()
            .total_cmp(&b.bbox.area())
            .then(a.bbox.confidence.total_cmp(&b.bbox.confidence))
    })
}

/// Model file locations and detection tuning for [`OnnxPoseDetector`].
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub detector_model: String,
    pub recognizer_model: String,
    pub confidence_threshold: f32,
}

struct Models {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

/// SCRFD + ArcFace behind the `PoseDetector` interface.
pub struct OnnxPoseDetector {
    config: DetectorConfig,
    state: ModelState,
    models: Option<Models>,
}

impl OnnxPoseDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            state: ModelState::Uninitialized,
            models: None,
        }
    }

    /// Load both models. A failure is terminal; there is no retry.
    pub fn load(&mut self) -> Result<(), CaptureError> {
        match self.state {
            ModelState::Ready => return Ok(()),
            ModelState::Failed => {
                return Err(CaptureError::ModelLoadFailed("previous load failed".into()))
            }
            ModelState::Uninitialized | ModelState::Loading => {}
        }

        self.state = ModelState::Loading;
        tracing::info!(
            detector = %self.config.detector_model,
            recognizer = %self.config.recognizer_model,
            "loading face models"
        );

        let loaded = FaceDetector::load(&self.config.detector_model, self.config.confidence_threshold)
            .map_err(load_failed)
            .and_then(|detector| {
                FaceRecognizer::load(&self.config.recognizer_model)
                    .map_err(load_failed)
                    .map(|recognizer| Models { detector, recognizer })
            });

        match loaded {
            Ok(models) => {
                self.models = Some(models);
                self.state = ModelState::Ready;
                tracing::info!("face models ready");
                Ok(())
            }
            Err(e) => {
                self.state = ModelState::Failed;
                tracing::error!(error = %e, "face model load failed");
                Err(e)
            }
        }
    }

    fn models(&mut self) -> Result<&mut Models, CaptureError> {
        let state = self.state;
        match (state, self.models.as_mut()) {
            (ModelState::Ready, Some(m)) => Ok(m),
            _ => Err(CaptureError::ModelNotReady(state)),
        }
    }
}

fn load_failed(e: impl std::fmt::Display) -> CaptureError {
    CaptureError::ModelLoadFailed(e.to_string())
}

impl From<DetectorError> for CaptureError {
    fn from(e: DetectorError) -> Self {
        match e {
            DetectorError::ModelNotFound(p) => CaptureError::ModelLoadFailed(p),
            other => CaptureError::Inference(other.to_string()),
        }
    }
}

impl From<RecognizerError> for CaptureError {
    fn from(e: RecognizerError) -> Self {
        match e {
            RecognizerError::ModelNotFound(p) => CaptureError::ModelLoadFailed(p),
            other => CaptureError::Inference(other.to_string()),
        }
    }
}

impl PoseDetector for OnnxPoseDetector {
    fn state(&self) -> ModelState {
        self.state
    }

    fn detect_primary_face(&mut self, frame: &FaceFrame) -> Result<Option<Detection>, CaptureError> {
        let models = self.models()?;
        Ok(select_primary(models.detector.detect(frame)?))
    }

    fn extract_descriptor(&mut self, frame: &FaceFrame) -> Result<FaceDescriptor, CaptureError> {
        let models = self.models()?;
        let face = select_primary(models.detector.detect(frame)?).ok_or(CaptureError::NoFaceDetected)?;
        let descriptor = models.recognizer.extract(frame, &face.landmarks)?;
        tracing::debug!(
            confidence = face.bbox.confidence,
            dim = descriptor.len(),
            seq = frame.sequence,
            "descriptor extracted"
        );
        Ok(descriptor)
    }
}
