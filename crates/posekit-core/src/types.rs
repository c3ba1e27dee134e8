use serde::{Deserialize, Serialize};
use std::time::Instant;

/// A decoded grayscale frame from the video source.
///
/// Owned by the capture loop for one detection pass, never persisted.
#[derive(Clone)]
pub struct FaceFrame {
    /// Grayscale pixel data (width * height bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub captured_at: Instant,
}

impl FaceFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

impl std::fmt::Debug for FaceFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned face box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

/// Five-point landmark geometry in un-mirrored image coordinates.
///
/// `left_eye` is the eye with the smaller x in the camera image, which is
/// the subject's right eye when they face the camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub left_eye: Point,
    pub right_eye: Point,
    pub nose_tip: Point,
    pub mouth_left: Point,
    pub mouth_right: Point,
}

impl FaceLandmarks {
    /// Build from SCRFD keypoint order: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub fn from_keypoints(kps: [(f32, f32); 5]) -> Self {
        let p = |i: usize| Point::new(kps[i].0, kps[i].1);
        Self {
            left_eye: p(0),
            right_eye: p(1),
            nose_tip: p(2),
            mouth_left: p(3),
            mouth_right: p(4),
        }
    }

    /// Keypoints in SCRFD order, as consumed by the alignment transform.
    pub fn keypoints(&self) -> [(f32, f32); 5] {
        [
            (self.left_eye.x, self.left_eye.y),
            (self.right_eye.x, self.right_eye.y),
            (self.nose_tip.x, self.nose_tip.y),
            (self.mouth_left.x, self.mouth_left.y),
            (self.mouth_right.x, self.mouth_right.y),
        ]
    }

    /// Uniformly scale every point about the origin.
    pub fn scaled(&self, factor: f32) -> Self {
        let s = |p: Point| Point::new(p.x * factor, p.y * factor);
        Self {
            left_eye: s(self.left_eye),
            right_eye: s(self.right_eye),
            nose_tip: s(self.nose_tip),
            mouth_left: s(self.mouth_left),
            mouth_right: s(self.mouth_right),
        }
    }
}

/// One detected face: a box plus its landmark geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub landmarks: FaceLandmarks,
}

/// Fixed-length face embedding produced at a committed capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDescriptor {
    pub values: Vec<f32>,
    /// Model version that produced this descriptor (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl FaceDescriptor {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &FaceDescriptor) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Who is enrolling, supplied once before capture begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityHint {
    pub name: String,
    pub contact: Option<String>,
}
