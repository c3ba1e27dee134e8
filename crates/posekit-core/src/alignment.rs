//! Landmark alignment to the canonical ArcFace crop.
//!
//! Fits a 4-DOF similarity (scale, rotation, translation) from the detected
//! five points to the InsightFace reference layout and warps the frame into
//! a 112x112 crop.

use crate::types::FaceLandmarks;

/// ArcFace reference landmarks for a 112x112 output, SCRFD order.
const REFERENCE_112: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub const ALIGNED_SIZE: usize = 112;

/// dst = [a -b; b a] * src + t
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit between two centered point sets.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
            (sx / n, sy / n)
        };
        let (smx, smy) = mean(src);
        let (dmx, dmy) = mean(dst);

        let mut var = 0.0f32;
        let mut num_a = 0.0f32;
        let mut num_b = 0.0f32;
        for (s, d) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (s.0 - smx, s.1 - smy);
            let (dx, dy) = (d.0 - dmx, d.1 - dmy);
            var += sx * sx + sy * sy;
            num_a += sx * dx + sy * dy;
            num_b += sx * dy - sy * dx;
        }
        if var < 1e-12 {
            return None;
        }

        let a = num_a / var;
        let b = num_b / var;
        Some(Self {
            a,
            b,
            tx: dmx - (a * smx - b * smy),
            ty: dmy - (b * smx + a * smy),
        })
    }

    /// Map a destination point back into the source frame.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Bilinear sample; out-of-bounds reads as black.
fn sample(frame: &[u8], width: usize, height: usize, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |xi: i64, yi: i64| -> f32 {
        if xi >= 0 && yi >= 0 && (xi as usize) < width && (yi as usize) < height {
            frame.get(yi as usize * width + xi as usize).copied().unwrap_or(0) as f32
        } else {
            0.0
        }
    };

    let top = px(x0, y0) * (1.0 - fx) + px(x0 + 1, y0) * fx;
    let bot = px(x0, y0 + 1) * (1.0 - fx) + px(x0 + 1, y0 + 1) * fx;
    top * (1.0 - fy) + bot * fy
}

/// Warp a grayscale frame into a 112x112 crop aligned on `landmarks`.
///
/// Degenerate landmarks (all points coincident) yield a black crop.
pub fn align_face(frame: &[u8], width: u32, height: u32, landmarks: &FaceLandmarks) -> Vec<u8> {
    let mut out = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];
    let Some(xf) = Similarity::fit(&landmarks.keypoints(), &REFERENCE_112) else {
        tracing::debug!("degenerate landmarks, returning blank crop");
        return out;
    };

    let (w, h) = (width as usize, height as usize);
    for oy in 0..ALIGNED_SIZE {
        for ox in 0..ALIGNED_SIZE {
            if let Some((sx, sy)) = xf.invert_point(ox as f32, oy as f32) {
                out[oy * ALIGNED_SIZE + ox] = sample(frame, w, h, sx, sy).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}
