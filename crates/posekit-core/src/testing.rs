//! Scripted fakes for driving the pipeline without models or a camera.

use crate::capture_loop::FrameSource;
use crate::error::CaptureError;
use crate::pose_detector::{ModelState, PoseDetector};
use crate::types::{BoundingBox, Detection, FaceDescriptor, FaceFrame, FaceLandmarks, Point};
use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

/// A face whose pose deviation is exactly `dev` (eyes at x=100 and x=140).
pub fn face_with_deviation(dev: f32) -> Detection {
    Detection {
        bbox: BoundingBox { x: 80.0, y: 60.0, width: 80.0, height: 100.0, confidence: 0.9 },
        landmarks: FaceLandmarks {
            left_eye: Point::new(100.0, 100.0),
            right_eye: Point::new(140.0, 100.0),
            nose_tip: Point::new(120.0 + dev * 40.0, 120.0),
            mouth_left: Point::new(108.0, 140.0),
            mouth_right: Point::new(132.0, 140.0),
        },
    }
}

pub fn frame(sequence: u32) -> FaceFrame {
    FaceFrame::new(vec![96u8; 8 * 6], 8, 6, sequence)
}

enum FaceScript {
    Always(f32),
    Never,
    /// Deviation per frame sequence; missing or `None` means no face.
    PerFrame(Vec<Option<f32>>),
}

pub struct ScriptedDetector {
    state: ModelState,
    script: FaceScript,
    fail_next_extract: Option<CaptureError>,
    /// Frame sequences whose detection fails with `Inference` after a delay.
    failing_detects: Vec<u32>,
    detect_delay: Duration,
    detect_calls: usize,
    extract_calls: usize,
}

impl ScriptedDetector {
    fn with(state: ModelState, script: FaceScript) -> Self {
        Self {
            state,
            script,
            fail_next_extract: None,
            failing_detects: Vec::new(),
            detect_delay: Duration::ZERO,
            detect_calls: 0,
            extract_calls: 0,
        }
    }

    pub fn always_face() -> Self {
        Self::with(ModelState::Ready, FaceScript::Always(0.0))
    }

    pub fn never_face() -> Self {
        Self::with(ModelState::Ready, FaceScript::Never)
    }

    pub fn per_frame(deviations: Vec<Option<f32>>) -> Self {
        Self::with(ModelState::Ready, FaceScript::PerFrame(deviations))
    }

    pub fn loading() -> Self {
        Self::with(ModelState::Loading, FaceScript::Never)
    }

    pub fn fail_next_extract(&mut self, err: CaptureError) {
        self.fail_next_extract = Some(err);
    }

    pub fn fail_detect_on(&mut self, sequences: &[u32], delay: Duration) {
        self.failing_detects = sequences.to_vec();
        self.detect_delay = delay;
    }

    pub fn detect_calls(&self) -> usize {
        self.detect_calls
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls
    }

    fn face_for(&self, frame: &FaceFrame) -> Option<Detection> {
        match &self.script {
            FaceScript::Always(dev) => Some(face_with_deviation(*dev)),
            FaceScript::Never => None,
            FaceScript::PerFrame(devs) => devs
                .get(frame.sequence as usize)
                .copied()
                .flatten()
                .map(face_with_deviation),
        }
    }
}

impl PoseDetector for ScriptedDetector {
    fn state(&self) -> ModelState {
        self.state
    }

    fn detect_primary_face(&mut self, frame: &FaceFrame) -> Result<Option<Detection>, CaptureError> {
        if self.state != ModelState::Ready {
            return Err(CaptureError::ModelNotReady(self.state));
        }
        self.detect_calls += 1;
        if self.failing_detects.contains(&frame.sequence) {
            std::thread::sleep(self.detect_delay);
            return Err(CaptureError::Inference("scripted detector failure".into()));
        }
        Ok(self.face_for(frame))
    }

    fn extract_descriptor(&mut self, frame: &FaceFrame) -> Result<FaceDescriptor, CaptureError> {
        if self.state != ModelState::Ready {
            return Err(CaptureError::ModelNotReady(self.state));
        }
        self.extract_calls += 1;
        if let Some(err) = self.fail_next_extract.take() {
            return Err(err);
        }
        self.face_for(frame).ok_or(CaptureError::NoFaceDetected)?;
        Ok(FaceDescriptor {
            values: vec![frame.sequence as f32, 1.0],
            model_version: Some("scripted".into()),
        })
    }
}

/// Observable state of a [`ScriptedSource`], shared with the test body.
#[derive(Clone, Default)]
pub struct SourceTally {
    pub running: Rc<Cell<bool>>,
    pub starts: Rc<Cell<u32>>,
    pub stops: Rc<Cell<u32>>,
}

/// Yields the given frames in order, then reports a disconnect.
pub struct ScriptedSource {
    frames: VecDeque<FaceFrame>,
    tally: SourceTally,
    deny_access: bool,
}

impl ScriptedSource {
    pub fn new(count: u32) -> (Self, SourceTally) {
        let tally = SourceTally::default();
        let source = Self {
            frames: (0..count).map(frame).collect(),
            tally: tally.clone(),
            deny_access: false,
        };
        (source, tally)
    }

    pub fn denied() -> (Self, SourceTally) {
        let (mut source, tally) = Self::new(0);
        source.deny_access = true;
        (source, tally)
    }
}

impl FrameSource for ScriptedSource {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.deny_access {
            return Err(CaptureError::CameraAccessDenied("permission denied".into()));
        }
        self.tally.starts.set(self.tally.starts.get() + 1);
        self.tally.running.set(true);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<FaceFrame, CaptureError> {
        assert!(self.tally.running.get(), "frame requested from a stopped source");
        self.frames
            .pop_front()
            .ok_or_else(|| CaptureError::CameraDisconnected("script exhausted".into()))
    }

    fn stop(&mut self) {
        self.tally.stops.set(self.tally.stops.get() + 1);
        self.tally.running.set(false);
    }

    fn is_running(&self) -> bool {
        self.tally.running.get()
    }
}
