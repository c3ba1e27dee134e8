//! Pose classification and user guidance.
//!
//! The deviation signal is computed in the detector's un-mirrored image
//! coordinates. A positive deviation means the nose sits toward image-right
//! of the eye midpoint, which is where it moves when the subject turns to
//! *their own* left. Guidance text therefore always refers to the subject's
//! left/right, regardless of whether a display mirrors the preview.

use crate::types::{Detection, FaceLandmarks};
use serde::{Deserialize, Serialize};

pub const GUIDANCE_NO_FACE: &str = "Align Face In Frame";
pub const GUIDANCE_FACE_FORWARD: &str = "Face Forward";
pub const GUIDANCE_TURN_LEFT: &str = "Turn Head LEFT";
pub const GUIDANCE_TURN_RIGHT: &str = "Turn Head RIGHT";
pub const GUIDANCE_HOLD: &str = "Perfect. Hold Steady.";
pub const GUIDANCE_COMPLETE: &str = "All Poses Captured";

/// Enrollment progress. Advances strictly Center → Left → Right → Complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PoseState {
    Center,
    Left,
    Right,
    Complete,
}

impl PoseState {
    /// The three poses that each yield one descriptor, in capture order.
    pub const TARGETS: [PoseState; 3] = [PoseState::Center, PoseState::Left, PoseState::Right];

    pub fn next(self) -> PoseState {
        match self {
            PoseState::Center => PoseState::Left,
            PoseState::Left => PoseState::Right,
            PoseState::Right | PoseState::Complete => PoseState::Complete,
        }
    }

    /// Position in the capture order; `None` for `Complete`.
    pub fn index(self) -> Option<usize> {
        PoseState::TARGETS.iter().position(|&p| p == self)
    }

    pub fn label(self) -> &'static str {
        match self {
            PoseState::Center => "center",
            PoseState::Left => "left",
            PoseState::Right => "right",
            PoseState::Complete => "complete",
        }
    }

    /// Guidance shown while the face is present but not yet in this pose.
    fn prompt(self) -> &'static str {
        match self {
            PoseState::Center => GUIDANCE_FACE_FORWARD,
            PoseState::Left => GUIDANCE_TURN_LEFT,
            PoseState::Right => GUIDANCE_TURN_RIGHT,
            PoseState::Complete => GUIDANCE_COMPLETE,
        }
    }
}

impl std::str::FromStr for PoseState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "center" => Ok(PoseState::Center),
            "left" => Ok(PoseState::Left),
            "right" => Ok(PoseState::Right),
            other => Err(format!("unknown pose '{other}' (expected center, left or right)")),
        }
    }
}

/// Deviation thresholds. Defaults are the reference tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseThresholds {
    /// |deviation| strictly below this satisfies Center.
    pub center_max: f32,
    /// deviation strictly beyond ±this satisfies Left (+) / Right (−).
    pub turn_min: f32,
}

impl Default for PoseThresholds {
    fn default() -> Self {
        Self {
            center_max: 0.25,
            turn_min: 0.35,
        }
    }
}

impl PoseThresholds {
    pub fn satisfies(&self, deviation: f32, target: PoseState) -> bool {
        match target {
            PoseState::Center => deviation.abs() < self.center_max,
            PoseState::Left => deviation > self.turn_min,
            PoseState::Right => deviation < -self.turn_min,
            PoseState::Complete => false,
        }
    }
}

/// Normalized nose offset from the eye midpoint.
///
/// Invariant to face size and frame resolution. `None` when the eye span is
/// not positive (eyes coincident or reported in the wrong order).
pub fn deviation(landmarks: &FaceLandmarks) -> Option<f32> {
    let eye_span = landmarks.right_eye.x - landmarks.left_eye.x;
    if eye_span <= f32::EPSILON {
        return None;
    }
    let eye_center = (landmarks.right_eye.x + landmarks.left_eye.x) / 2.0;
    Some((landmarks.nose_tip.x - eye_center) / eye_span)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PoseVerdict {
    Satisfied(PoseState),
    NotSatisfied(PoseState, &'static str),
}

/// Per-frame classification against the current target pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseReading {
    pub face_present: bool,
    pub deviation: Option<f32>,
    pub verdict: PoseVerdict,
}

impl PoseReading {
    pub fn is_satisfied(&self, target: PoseState) -> bool {
        self.verdict == PoseVerdict::Satisfied(target)
    }

    pub fn guidance(&self) -> &'static str {
        match self.verdict {
            PoseVerdict::Satisfied(PoseState::Complete) => GUIDANCE_COMPLETE,
            PoseVerdict::Satisfied(_) => GUIDANCE_HOLD,
            PoseVerdict::NotSatisfied(_, text) => text,
        }
    }
}

/// Classify a detection (or its absence) against `target`. Pure.
pub fn classify(detection: Option<&Detection>, target: PoseState, thresholds: &PoseThresholds) -> PoseReading {
    if target == PoseState::Complete {
        return PoseReading {
            face_present: detection.is_some(),
            deviation: detection.and_then(|d| deviation(&d.landmarks)),
            verdict: PoseVerdict::Satisfied(PoseState::Complete),
        };
    }

    let Some(detection) = detection else {
        return PoseReading {
            face_present: false,
            deviation: None,
            verdict: PoseVerdict::NotSatisfied(target, GUIDANCE_NO_FACE),
        };
    };

    let dev = deviation(&detection.landmarks);
    let verdict = match dev {
        Some(d) if thresholds.satisfies(d, target) => PoseVerdict::Satisfied(target),
        Some(_) => PoseVerdict::NotSatisfied(target, target.prompt()),
        None => PoseVerdict::NotSatisfied(target, GUIDANCE_NO_FACE),
    };

    PoseReading {
        face_present: true,
        deviation: dev,
        verdict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Point};
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn face(left_eye_x: f32, right_eye_x: f32, nose_x: f32) -> Detection {
        Detection {
            bbox: BoundingBox { x: 80.0, y: 60.0, width: 80.0, height: 100.0, confidence: 0.9 },
            landmarks: FaceLandmarks {
                left_eye: Point::new(left_eye_x, 100.0),
                right_eye: Point::new(right_eye_x, 100.0),
                nose_tip: Point::new(nose_x, 120.0),
                mouth_left: Point::new(left_eye_x + 4.0, 140.0),
                mouth_right: Point::new(right_eye_x - 4.0, 140.0),
            },
        }
    }

    // ── deviation ───────────────────────────────────────────────────

    #[test]
    fn test_deviation_center_example() {
        // eye_span = 40, eye_center = 120, deviation = (118 - 120) / 40
        let d = deviation(&face(100.0, 140.0, 118.0).landmarks).unwrap();
        assert_relative_eq!(d, -0.05, epsilon = 1e-6);
    }

    #[rstest]
    #[case(0.5)]
    #[case(2.0)]
    #[case(7.25)]
    fn test_deviation_scale_invariant(#[case] factor: f32) {
        let lm = face(100.0, 140.0, 131.0).landmarks;
        let base = deviation(&lm).unwrap();
        assert_relative_eq!(deviation(&lm.scaled(factor)).unwrap(), base, epsilon = 1e-5);
    }

    #[test]
    fn test_deviation_degenerate_eye_span() {
        assert!(deviation(&face(120.0, 120.0, 120.0).landmarks).is_none());
        assert!(deviation(&face(140.0, 100.0, 120.0).landmarks).is_none());
    }

    // ── verdicts ────────────────────────────────────────────────────

    #[test]
    fn test_center_pose_accepted() {
        let reading = classify(Some(&face(100.0, 140.0, 118.0)), PoseState::Center, &PoseThresholds::default());
        assert_eq!(reading.verdict, PoseVerdict::Satisfied(PoseState::Center));
        assert!(reading.face_present);
        assert_eq!(reading.guidance(), GUIDANCE_HOLD);
    }

    #[test]
    fn test_left_pose_rejected_then_accepted() {
        let t = PoseThresholds::default();
        let rejected = classify(Some(&face(100.0, 140.0, 130.0)), PoseState::Left, &t);
        assert_relative_eq!(rejected.deviation.unwrap(), 0.25, epsilon = 1e-6);
        assert_eq!(rejected.verdict, PoseVerdict::NotSatisfied(PoseState::Left, "Turn Head LEFT"));

        let accepted = classify(Some(&face(100.0, 140.0, 140.0)), PoseState::Left, &t);
        assert_relative_eq!(accepted.deviation.unwrap(), 0.5, epsilon = 1e-6);
        assert_eq!(accepted.verdict, PoseVerdict::Satisfied(PoseState::Left));
    }

    #[rstest]
    #[case(118.0, PoseState::Center, true)]
    #[case(130.0, PoseState::Center, false)] // |0.25| is not < 0.25
    #[case(129.0, PoseState::Center, true)]
    #[case(134.0, PoseState::Left, false)] // 0.35 is not > 0.35
    #[case(135.0, PoseState::Left, true)]
    #[case(140.0, PoseState::Right, false)]
    #[case(106.0, PoseState::Right, false)] // -0.35
    #[case(100.0, PoseState::Right, true)] // -0.5
    #[case(100.0, PoseState::Left, false)]
    fn test_threshold_table(#[case] nose_x: f32, #[case] target: PoseState, #[case] satisfied: bool) {
        let reading = classify(Some(&face(100.0, 140.0, nose_x)), target, &PoseThresholds::default());
        assert_eq!(reading.is_satisfied(target), satisfied, "deviation={:?}", reading.deviation);
    }

    #[rstest]
    #[case(PoseState::Center, "Face Forward")]
    #[case(PoseState::Left, "Turn Head LEFT")]
    #[case(PoseState::Right, "Turn Head RIGHT")]
    fn test_guidance_text_for_wrong_angle(#[case] target: PoseState, #[case] text: &str) {
        // Deviation 0.3: neither centered nor turned enough.
        let reading = classify(Some(&face(100.0, 140.0, 132.0)), target, &PoseThresholds::default());
        assert_eq!(reading.guidance(), text);
        assert!(reading.face_present);
    }

    #[test]
    fn test_no_face_distinct_from_wrong_angle() {
        let reading = classify(None, PoseState::Left, &PoseThresholds::default());
        assert!(!reading.face_present);
        assert_eq!(reading.guidance(), "Align Face In Frame");
        assert_eq!(reading.verdict, PoseVerdict::NotSatisfied(PoseState::Left, GUIDANCE_NO_FACE));
    }

    #[test]
    fn test_custom_thresholds() {
        let strict = PoseThresholds { center_max: 0.05, turn_min: 0.6 };
        let reading = classify(Some(&face(100.0, 140.0, 140.0)), PoseState::Left, &strict);
        assert!(!reading.is_satisfied(PoseState::Left));
    }

    // ── PoseState ───────────────────────────────────────────────────

    #[test]
    fn test_pose_progression_is_forward_only() {
        assert_eq!(PoseState::Center.next(), PoseState::Left);
        assert_eq!(PoseState::Left.next(), PoseState::Right);
        assert_eq!(PoseState::Right.next(), PoseState::Complete);
        assert_eq!(PoseState::Complete.next(), PoseState::Complete);
        for p in PoseState::TARGETS {
            assert!(p.next() > p);
        }
    }

    #[test]
    fn test_parse_pose() {
        assert_eq!("LEFT".parse::<PoseState>(), Ok(PoseState::Left));
        assert!("complete".parse::<PoseState>().is_err());
    }
}
