//! Capture pipeline error taxonomy.

use crate::pose_detector::ModelState;
use thiserror::Error;

/// Conditions the capture pipeline can surface.
///
/// A face that is present but at the wrong angle is not an error; it is a
/// `PoseVerdict::NotSatisfied` and only ever reaches the user as guidance.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("face model not ready (state: {0:?})")]
    ModelNotReady(ModelState),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("camera access denied: {0}")]
    CameraAccessDenied(String),
    #[error("camera disconnected: {0}")]
    CameraDisconnected(String),
    #[error("face model failed to load: {0}")]
    ModelLoadFailed(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

impl CaptureError {
    /// Terminal errors end the session; the camera must be released and the
    /// user sent back to identity entry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaptureError::CameraAccessDenied(_)
                | CaptureError::CameraDisconnected(_)
                | CaptureError::ModelLoadFailed(_)
        )
    }

    /// Short user-facing message.
    pub fn user_message(&self) -> &'static str {
        match self {
            CaptureError::ModelNotReady(_) => "Face model is still loading",
            CaptureError::NoFaceDetected => "Align Face In Frame",
            CaptureError::CameraAccessDenied(_) => "Camera access was denied",
            CaptureError::CameraDisconnected(_) => "Camera disconnected. Please start again.",
            CaptureError::ModelLoadFailed(_) => "Face capture is unavailable. Cannot proceed.",
            CaptureError::Inference(_) => "Capture failed. Please try this pose again.",
        }
    }
}
