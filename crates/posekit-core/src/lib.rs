//! posekit-core — Guided multi-pose face capture.
//!
//! Detects a face per frame (SCRFD via ONNX Runtime), classifies its
//! horizontal pose from landmark geometry, and walks an enrollment session
//! through center, left and right captures, extracting one ArcFace
//! descriptor per pose for hand-off to a matching service.

pub mod alignment;
pub mod capture_loop;
pub mod detector;
pub mod error;
pub mod matcher;
pub mod pose;
pub mod pose_detector;
pub mod recognizer;
pub mod sequencer;
pub mod types;

#[cfg(test)]
mod testing;

pub use capture_loop::{CaptureControl, CaptureEvent, CaptureLoop, CaptureSink, FrameSource, LoopOutcome};
pub use error::CaptureError;
pub use matcher::{GalleryEntry, GalleryMatcher, MatchService, MatchedItem};
pub use pose::{classify, deviation, PoseReading, PoseState, PoseThresholds, PoseVerdict};
pub use pose_detector::{DetectorConfig, ModelState, OnnxPoseDetector, PoseDetector};
pub use sequencer::{CaptureSequencer, CompletedEnrollment, EnrollmentSession, PreviewImage};
pub use types::{BoundingBox, Detection, FaceDescriptor, FaceFrame, FaceLandmarks, IdentityHint, Point};

use std::path::PathBuf;

/// Default model directory: `$XDG_DATA_HOME/posekit/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("posekit")
        .join("models")
}
