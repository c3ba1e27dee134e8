//! Enrollment state machine.
//!
//! Walks a session through Center → Left → Right → Complete, taking one
//! descriptor per pose. State only moves forward on a successful capture;
//! `reset` is the single way back to Center and discards everything.

use crate::error::CaptureError;
use crate::pose::{PoseReading, PoseState};
use crate::pose_detector::{ensure_ready, PoseDetector};
use crate::types::{FaceDescriptor, FaceFrame, IdentityHint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Default time a Satisfied verdict must hold before an automatic capture.
pub const DEFAULT_HOLD_WINDOW: Duration = Duration::from_millis(600);

/// PNG snapshot kept from the Center capture, for display only.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewImage {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

impl std::fmt::Debug for PreviewImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("png_bytes", &self.png.len())
            .finish()
    }
}

impl PreviewImage {
    fn encode(frame: &FaceFrame) -> Result<Self, image::ImageError> {
        let gray = image::GrayImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or_else(|| {
            image::ImageError::Parameter(image::error::ParameterError::from_kind(
                image::error::ParameterErrorKind::DimensionMismatch,
            ))
        })?;
        let mut png = Vec::new();
        gray.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
        Ok(Self {
            width: frame.width,
            height: frame.height,
            png,
        })
    }
}

/// One end-to-end run of the guided capture flow for a single user.
#[derive(Debug, Clone)]
pub struct EnrollmentSession {
    id: Uuid,
    identity: IdentityHint,
    started_at: DateTime<Utc>,
    state: PoseState,
    descriptors: Vec<FaceDescriptor>,
    preview: Option<PreviewImage>,
}

impl EnrollmentSession {
    /// Start a session. Refused until the detector reports `Ready`.
    pub fn begin(identity: IdentityHint, detector: &dyn PoseDetector) -> Result<Self, CaptureError> {
        ensure_ready(detector)?;
        Ok(Self::fresh(identity))
    }

    fn fresh(identity: IdentityHint) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            identity,
            started_at: Utc::now(),
            state: PoseState::Center,
            descriptors: Vec::with_capacity(PoseState::TARGETS.len()),
            preview: None,
        };
        tracing::info!(session = %session.id, name = %session.identity.name, "enrollment session started");
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &IdentityHint {
        &self.identity
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> PoseState {
        self.state
    }

    pub fn descriptors(&self) -> &[FaceDescriptor] {
        &self.descriptors
    }

    pub fn preview(&self) -> Option<&PreviewImage> {
        self.preview.as_ref()
    }

    /// Which of the three poses have been captured.
    pub fn progress(&self) -> [bool; 3] {
        std::array::from_fn(|i| i < self.descriptors.len())
    }

    /// Record the descriptor for the current pose and advance one step.
    fn record(&mut self, descriptor: FaceDescriptor) -> PoseState {
        debug_assert_eq!(self.state.index(), Some(self.descriptors.len()));
        self.descriptors.push(descriptor);
        self.state = self.state.next();
        self.state
    }

    /// Hand off a finished session. Returns the session back if it is not complete.
    pub fn into_completed(self) -> Result<CompletedEnrollment, Self> {
        if self.state != PoseState::Complete {
            return Err(self);
        }
        let Self {
            id,
            identity,
            started_at,
            state,
            descriptors,
            preview,
        } = self;
        match <[FaceDescriptor; 3]>::try_from(descriptors) {
            Ok(descriptors) => Ok(CompletedEnrollment {
                session_id: id,
                identity,
                started_at,
                completed_at: Utc::now(),
                descriptors,
                preview,
            }),
            Err(descriptors) => Err(Self {
                id,
                identity,
                started_at,
                state,
                descriptors,
                preview,
            }),
        }
    }
}

/// A session that reached `Complete`: exactly three descriptors, ordered
/// `[Center, Left, Right]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedEnrollment {
    pub session_id: Uuid,
    pub identity: IdentityHint,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub descriptors: [FaceDescriptor; 3],
    #[serde(skip)]
    pub preview: Option<PreviewImage>,
}

impl CompletedEnrollment {
    pub fn descriptor(&self, pose: PoseState) -> Option<&FaceDescriptor> {
        pose.index().map(|i| &self.descriptors[i])
    }
}

/// Per-frame evaluation of whether the current frame could be accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureAttempt {
    pub target: PoseState,
    pub accept: bool,
    pub guidance: &'static str,
}

/// Result of committing a capture.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Descriptor stored; now targeting the next pose.
    Advanced { captured: PoseState, next: PoseState },
    /// Third descriptor stored; the session is complete.
    Completed,
    /// Verdict did not hold at the instant of capture. State unchanged.
    Rejected { target: PoseState, guidance: &'static str },
    /// No face at extraction time. State unchanged; re-prompt.
    NoFace { target: PoseState },
}

/// Drives one `EnrollmentSession` through its poses.
pub struct CaptureSequencer {
    session: EnrollmentSession,
    hold_window: Duration,
    auto_capture: bool,
    satisfied_since: Option<Instant>,
}

impl CaptureSequencer {
    pub fn new(session: EnrollmentSession) -> Self {
        Self {
            session,
            hold_window: DEFAULT_HOLD_WINDOW,
            auto_capture: true,
            satisfied_since: None,
        }
    }

    pub fn with_hold_window(mut self, hold_window: Duration) -> Self {
        self.hold_window = hold_window;
        self
    }

    pub fn with_auto_capture(mut self, enabled: bool) -> Self {
        self.auto_capture = enabled;
        self
    }

    pub fn state(&self) -> PoseState {
        self.session.state
    }

    pub fn session(&self) -> &EnrollmentSession {
        &self.session
    }

    pub fn into_session(self) -> EnrollmentSession {
        self.session
    }

    /// Feed the latest reading; tracks how long the target has been held.
    pub fn observe(&mut self, reading: &PoseReading, now: Instant) -> CaptureAttempt {
        let target = self.session.state;
        let accept = target != PoseState::Complete && reading.is_satisfied(target);
        if accept {
            self.satisfied_since.get_or_insert(now);
        } else {
            self.satisfied_since = None;
        }
        CaptureAttempt {
            target,
            accept,
            guidance: reading.guidance(),
        }
    }

    /// A frame produced no verdict; the pose no longer counts as held.
    pub fn interrupt(&mut self) {
        self.satisfied_since = None;
    }

    /// True once auto-capture is on and the verdict has held for the window.
    pub fn auto_capture_due(&self, now: Instant) -> bool {
        self.auto_capture
            && self
                .satisfied_since
                .is_some_and(|since| now.saturating_duration_since(since) >= self.hold_window)
    }

    /// Commit a capture on `frame`.
    ///
    /// `reading` must be the classification of this same frame. Detector
    /// failures other than a missing face are returned as errors with the
    /// session left on the same pose.
    pub fn commit(
        &mut self,
        frame: &FaceFrame,
        reading: &PoseReading,
        detector: &mut dyn PoseDetector,
    ) -> Result<CaptureOutcome, CaptureError> {
        let target = self.session.state;
        if target == PoseState::Complete {
            return Ok(CaptureOutcome::Completed);
        }
        if !reading.is_satisfied(target) {
            self.satisfied_since = None;
            return Ok(CaptureOutcome::Rejected {
                target,
                guidance: reading.guidance(),
            });
        }

        let descriptor = match detector.extract_descriptor(frame) {
            Ok(d) => d,
            Err(CaptureError::NoFaceDetected) => {
                tracing::debug!(pose = target.label(), "no face at extraction, re-prompting");
                self.satisfied_since = None;
                return Ok(CaptureOutcome::NoFace { target });
            }
            Err(e) => {
                self.satisfied_since = None;
                tracing::warn!(pose = target.label(), error = %e, "capture failed, pose unchanged");
                return Err(e);
            }
        };

        if target == PoseState::Center {
            match PreviewImage::encode(frame) {
                Ok(preview) => self.session.preview = Some(preview),
                Err(e) => tracing::warn!(error = %e, "preview encoding failed, continuing without preview"),
            }
        }

        let next = self.session.record(descriptor);
        self.satisfied_since = None;
        tracing::info!(session = %self.session.id, pose = target.label(), next = next.label(), "pose captured");

        Ok(if next == PoseState::Complete {
            CaptureOutcome::Completed
        } else {
            CaptureOutcome::Advanced { captured: target, next }
        })
    }

    /// Explicit cancel: discard all descriptors and the preview, restart at Center.
    pub fn reset(&mut self) {
        tracing::info!(session = %self.session.id, state = self.session.state.label(), "enrollment reset");
        self.session = EnrollmentSession::fresh(self.session.identity.clone());
        self.satisfied_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{classify, PoseThresholds, PoseVerdict};
    use crate::testing::{face_with_deviation, frame, ScriptedDetector};

    fn identity() -> IdentityHint {
        IdentityHint { name: "Ada".into(), contact: Some("ada@example.com".into()) }
    }

    fn reading(dev: f32, target: PoseState) -> PoseReading {
        classify(Some(&face_with_deviation(dev)), target, &PoseThresholds::default())
    }

    fn sequencer(detector: &ScriptedDetector) -> CaptureSequencer {
        CaptureSequencer::new(EnrollmentSession::begin(identity(), detector).unwrap())
            .with_hold_window(Duration::ZERO)
    }

    const POSE_DEVIATIONS: [(PoseState, f32); 3] =
        [(PoseState::Center, 0.0), (PoseState::Left, 0.5), (PoseState::Right, -0.5)];

    #[test]
    fn test_begin_refused_until_ready() {
        let detector = ScriptedDetector::loading();
        assert!(matches!(
            EnrollmentSession::begin(identity(), &detector),
            Err(CaptureError::ModelNotReady(_))
        ));
    }

    #[test]
    fn test_full_session_produces_ordered_descriptors() {
        let mut detector = ScriptedDetector::always_face();
        let mut seq = sequencer(&detector);

        let mut outcomes = Vec::new();
        for (i, (pose, dev)) in POSE_DEVIATIONS.into_iter().enumerate() {
            assert_eq!(seq.state(), pose);
            let f = frame(i as u32);
            outcomes.push(seq.commit(&f, &reading(dev, pose), &mut detector).unwrap());
        }

        assert_eq!(
            outcomes,
            vec![
                CaptureOutcome::Advanced { captured: PoseState::Center, next: PoseState::Left },
                CaptureOutcome::Advanced { captured: PoseState::Left, next: PoseState::Right },
                CaptureOutcome::Completed,
            ]
        );
        assert_eq!(seq.state(), PoseState::Complete);
        assert!(seq.session().preview().is_some());

        let done = seq.into_session().into_completed().unwrap();
        // ScriptedDetector tags each descriptor with the frame sequence it came from.
        let tags: Vec<f32> = done.descriptors.iter().map(|d| d.values[0]).collect();
        assert_eq!(tags, vec![0.0, 1.0, 2.0]);
        assert_eq!(done.identity.name, "Ada");
    }

    #[test]
    fn test_rejects_capture_when_pose_not_held() {
        let mut detector = ScriptedDetector::always_face();
        let mut seq = sequencer(&detector);
        let outcome = seq.commit(&frame(0), &reading(0.3, PoseState::Center), &mut detector).unwrap();
        assert_eq!(
            outcome,
            CaptureOutcome::Rejected { target: PoseState::Center, guidance: "Face Forward" }
        );
        assert_eq!(seq.state(), PoseState::Center);
        assert_eq!(detector.extract_calls(), 0);
    }

    #[test]
    fn test_no_face_rejection_is_idempotent() {
        let mut detector = ScriptedDetector::never_face();
        let mut seq = sequencer(&detector);
        let satisfied = reading(0.0, PoseState::Center);
        for i in 0..5 {
            let outcome = seq.commit(&frame(i), &satisfied, &mut detector).unwrap();
            assert_eq!(outcome, CaptureOutcome::NoFace { target: PoseState::Center });
            assert_eq!(seq.state(), PoseState::Center);
            assert!(seq.session().descriptors().is_empty());
        }
        assert_eq!(detector.extract_calls(), 5);
    }

    #[test]
    fn test_inference_failure_pauses_on_same_pose() {
        let mut detector = ScriptedDetector::always_face();
        let mut seq = sequencer(&detector);
        seq.commit(&frame(0), &reading(0.0, PoseState::Center), &mut detector).unwrap();

        detector.fail_next_extract(CaptureError::Inference("tensor shape".into()));
        let err = seq.commit(&frame(1), &reading(0.5, PoseState::Left), &mut detector).unwrap_err();
        assert!(!err.is_terminal());
        assert_eq!(seq.state(), PoseState::Left);
        assert_eq!(seq.session().descriptors().len(), 1);

        // Retry the same pose succeeds.
        let outcome = seq.commit(&frame(2), &reading(0.5, PoseState::Left), &mut detector).unwrap();
        assert_eq!(outcome, CaptureOutcome::Advanced { captured: PoseState::Left, next: PoseState::Right });
    }

    #[test]
    fn test_reading_for_wrong_pose_does_not_advance() {
        // A Left-satisfying reading while targeting Center never skips ahead.
        let mut detector = ScriptedDetector::always_face();
        let mut seq = sequencer(&detector);
        let left = reading(0.5, PoseState::Left);
        assert_eq!(left.verdict, PoseVerdict::Satisfied(PoseState::Left));
        let outcome = seq.commit(&frame(0), &left, &mut detector).unwrap();
        assert!(matches!(outcome, CaptureOutcome::Rejected { .. }));
        assert_eq!(seq.state(), PoseState::Center);
    }

    #[test]
    fn test_commit_after_complete_is_noop() {
        let mut detector = ScriptedDetector::always_face();
        let mut seq = sequencer(&detector);
        for (i, (pose, dev)) in POSE_DEVIATIONS.into_iter().enumerate() {
            seq.commit(&frame(i as u32), &reading(dev, pose), &mut detector).unwrap();
        }
        let calls = detector.extract_calls();
        let outcome = seq.commit(&frame(9), &reading(0.0, PoseState::Complete), &mut detector).unwrap();
        assert_eq!(outcome, CaptureOutcome::Completed);
        assert_eq!(detector.extract_calls(), calls);
        assert_eq!(seq.session().descriptors().len(), 3);
    }

    #[test]
    fn test_reset_discards_everything() {
        let mut detector = ScriptedDetector::always_face();
        let mut seq = sequencer(&detector);
        seq.commit(&frame(0), &reading(0.0, PoseState::Center), &mut detector).unwrap();
        seq.commit(&frame(1), &reading(0.5, PoseState::Left), &mut detector).unwrap();
        let old_id = seq.session().id();

        seq.reset();
        assert_eq!(seq.state(), PoseState::Center);
        assert!(seq.session().descriptors().is_empty());
        assert!(seq.session().preview().is_none());
        assert_ne!(seq.session().id(), old_id);
        assert_eq!(seq.session().identity(), &identity());
    }

    #[test]
    fn test_incomplete_session_cannot_be_handed_off() {
        let mut detector = ScriptedDetector::always_face();
        let mut seq = sequencer(&detector);
        seq.commit(&frame(0), &reading(0.0, PoseState::Center), &mut detector).unwrap();
        let session = seq.into_session().into_completed().unwrap_err();
        assert_eq!(session.state(), PoseState::Left);
        assert_eq!(session.progress(), [true, false, false]);
    }

    #[test]
    fn test_auto_capture_requires_hold_window() {
        let detector = ScriptedDetector::always_face();
        let mut seq = CaptureSequencer::new(EnrollmentSession::begin(identity(), &detector).unwrap())
            .with_hold_window(Duration::from_millis(500));
        let t0 = Instant::now();
        let good = reading(0.0, PoseState::Center);
        let bad = reading(0.4, PoseState::Center);

        assert!(seq.observe(&good, t0).accept);
        assert!(!seq.auto_capture_due(t0 + Duration::from_millis(200)));

        // A flicker to not-satisfied restarts the window.
        assert!(!seq.observe(&bad, t0 + Duration::from_millis(300)).accept);
        seq.observe(&good, t0 + Duration::from_millis(400));
        assert!(!seq.auto_capture_due(t0 + Duration::from_millis(600)));
        assert!(seq.auto_capture_due(t0 + Duration::from_millis(900)));
    }

    #[test]
    fn test_interrupted_frame_restarts_hold_window() {
        let detector = ScriptedDetector::always_face();
        let mut seq = CaptureSequencer::new(EnrollmentSession::begin(identity(), &detector).unwrap())
            .with_hold_window(Duration::from_millis(50));
        let t0 = Instant::now();
        let good = reading(0.0, PoseState::Center);

        seq.observe(&good, t0);
        seq.interrupt();
        seq.observe(&good, t0 + Duration::from_millis(80));
        assert!(!seq.auto_capture_due(t0 + Duration::from_millis(80)));
        assert!(seq.auto_capture_due(t0 + Duration::from_millis(130)));
    }

    #[test]
    fn test_auto_capture_disabled() {
        let detector = ScriptedDetector::always_face();
        let mut seq = sequencer(&detector).with_auto_capture(false);
        let now = Instant::now();
        seq.observe(&reading(0.0, PoseState::Center), now);
        assert!(!seq.auto_capture_due(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_observe_reports_guidance() {
        let detector = ScriptedDetector::always_face();
        let mut seq = sequencer(&detector);
        let attempt = seq.observe(&reading(0.1, PoseState::Center), Instant::now());
        assert_eq!(
            attempt,
            CaptureAttempt { target: PoseState::Center, accept: true, guidance: "Perfect. Hold Steady." }
        );
    }
}
