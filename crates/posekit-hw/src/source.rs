//! Camera as a `FrameSource`: a reader thread feeds a latest-frame slot.

use crate::camera::{Camera, CameraError};
use crate::frame::is_dark_frame;
use crate::frame_slot::{FrameSlot, SlotError};
use posekit_core::{CaptureError, FaceFrame, FrameSource};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Upper bound on one blocking dequeue, so the reader notices `stop` on a
/// stalled device.
const READ_POLL: Duration = Duration::from_millis(250);

/// Share of near-black pixels above which a frame counts as dark.
const DARK_THRESHOLD: f32 = 0.95;

/// Exclusive, restartable handle on a V4L2 camera.
///
/// The device is opened on `start` and closed when the reader thread exits
/// after `stop`. `stop` is idempotent.
pub struct CameraSource {
    device_path: String,
    frame_timeout: Duration,
    warmup_frames: usize,
    slot: Arc<FrameSlot>,
    shutdown: Arc<AtomicBool>,
    dark: Arc<AtomicU64>,
    reader: Option<JoinHandle<()>>,
}

impl CameraSource {
    pub fn new(device_path: impl Into<String>, frame_timeout: Duration, warmup_frames: usize) -> Self {
        Self {
            device_path: device_path.into(),
            frame_timeout,
            warmup_frames,
            slot: Arc::new(FrameSlot::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            dark: Arc::new(AtomicU64::new(0)),
            reader: None,
        }
    }

    /// Frames replaced before the capture loop got to them.
    pub fn dropped_frames(&self) -> u64 {
        self.slot.dropped()
    }

    /// Post-warmup frames that were almost entirely black (covered lens,
    /// emitter off). They are still delivered; the detector reports no face.
    pub fn dark_frames(&self) -> u64 {
        self.dark.load(Ordering::Relaxed)
    }
}

impl FrameSource for CameraSource {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.reader.is_some() {
            return Ok(());
        }
        let camera = Camera::open(&self.device_path)?;

        self.slot.reset();
        self.shutdown.store(false, Ordering::SeqCst);
        self.dark.store(0, Ordering::Relaxed);

        let reader = Reader {
            slot: Arc::clone(&self.slot),
            shutdown: Arc::clone(&self.shutdown),
            dark: Arc::clone(&self.dark),
            warmup: self.warmup_frames,
            poll: read_poll(self.frame_timeout),
        };
        let handle = std::thread::Builder::new()
            .name("posekit-camera".into())
            .spawn(move || reader.run(camera))
            .map_err(|e| CaptureError::CameraDisconnected(format!("failed to spawn reader: {e}")))?;

        self.reader = Some(handle);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<FaceFrame, CaptureError> {
        if self.reader.is_none() {
            return Err(CaptureError::CameraDisconnected("camera not started".into()));
        }
        self.slot.take(self.frame_timeout).map_err(|e| match e {
            SlotError::Closed(reason) => CaptureError::CameraDisconnected(reason),
            SlotError::Timeout(t) => {
                CaptureError::CameraDisconnected(format!("no frame within {} ms", t.as_millis()))
            }
        })
    }

    fn stop(&mut self) {
        let Some(handle) = self.reader.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::SeqCst);
        self.slot.close("camera stopped");
        if handle.join().is_err() {
            tracing::error!(device = %self.device_path, "camera reader panicked");
        }
        tracing::info!(
            device = %self.device_path,
            dropped = self.slot.dropped(),
            dark = self.dark_frames(),
            "camera released"
        );
    }

    fn is_running(&self) -> bool {
        self.reader.is_some()
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_poll(frame_timeout: Duration) -> Duration {
    frame_timeout.clamp(Duration::from_millis(1), READ_POLL)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameFate {
    Warmup,
    Dark,
    Live,
}

/// `seen` counts frames read before this one.
fn frame_fate(seen: usize, warmup: usize, gray: &[u8]) -> FrameFate {
    if seen < warmup {
        FrameFate::Warmup
    } else if is_dark_frame(gray, DARK_THRESHOLD) {
        FrameFate::Dark
    } else {
        FrameFate::Live
    }
}

/// Reader thread state. Owns nothing device-related; the camera is passed
/// to `run` and closes when it returns.
struct Reader {
    slot: Arc<FrameSlot>,
    shutdown: Arc<AtomicBool>,
    dark: Arc<AtomicU64>,
    warmup: usize,
    poll: Duration,
}

impl Reader {
    fn run(self, camera: Camera) {
        let mut stream = match camera.stream() {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "camera stream failed to start");
                self.slot.close(e.to_string());
                return;
            }
        };
        // Bounded dequeues: a stalled device must not keep `stop` waiting.
        stream.set_timeout(self.poll);

        let mut seen = 0usize;
        while !self.shutdown.load(Ordering::SeqCst) {
            let frame = match camera.read(&mut stream) {
                Ok(frame) => frame,
                // The consumer's frame timeout decides when a stall is fatal.
                Err(CameraError::Timeout) => continue,
                Err(e) => {
                    tracing::warn!(device = %camera.device_path, error = %e, "camera read failed");
                    self.slot.close(e.to_string());
                    return;
                }
            };
            let fate = frame_fate(seen, self.warmup, &frame.data);
            seen += 1;
            match fate {
                FrameFate::Warmup => {
                    tracing::trace!(seq = frame.sequence, "warmup frame discarded");
                    continue;
                }
                FrameFate::Dark => {
                    let dark = self.dark.fetch_add(1, Ordering::Relaxed) + 1;
                    if dark.is_power_of_two() {
                        tracing::debug!(seq = frame.sequence, dark, "dark frame");
                    }
                }
                FrameFate::Live => {}
            }
            self.slot.offer(frame);
        }
        tracing::debug!(device = %camera.device_path, "camera reader exiting");
    }
}
