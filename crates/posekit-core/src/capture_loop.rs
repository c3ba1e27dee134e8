//! The polling loop tying frame source, detector, classifier and sequencer.
//!
//! Single-threaded: one frame is fully processed (detect, classify and,
//! when a capture is committed, extract) before the next is requested, so
//! there is never more than one detection in flight. Sources hand out their
//! most recent frame and drop anything that arrived in between.

use crate::error::CaptureError;
use crate::pose::{classify, PoseState, PoseThresholds, GUIDANCE_NO_FACE};
use crate::pose_detector::{ensure_ready, PoseDetector};
use crate::sequencer::{CaptureOutcome, CaptureSequencer, CompletedEnrollment};
use crate::types::FaceFrame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// A live video stream held exclusively by one session.
pub trait FrameSource {
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Block until the most recent frame is available.
    fn next_frame(&mut self) -> Result<FaceFrame, CaptureError>;

    /// Release the underlying device. Must be safe to call once after `start`.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

#[derive(Default)]
struct ControlFlags {
    cancelled: AtomicBool,
    capture_requested: AtomicBool,
}

/// Cloneable handle for steering a running loop from another thread.
#[derive(Clone, Default)]
pub struct CaptureControl {
    flags: Arc<ControlFlags>,
}

impl CaptureControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a capture on the next processed frame.
    pub fn request_capture(&self) {
        self.flags.capture_requested.store(true, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.flags.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags.cancelled.load(Ordering::SeqCst)
    }

    fn take_capture_request(&self) -> bool {
        self.flags.capture_requested.swap(false, Ordering::SeqCst)
    }
}

/// What the loop reports to the user-facing channel.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Emitted once per processed frame.
    Guidance {
        target: PoseState,
        text: &'static str,
        face_present: bool,
        deviation: Option<f32>,
        progress: [bool; 3],
    },
    Captured {
        pose: PoseState,
        progress: [bool; 3],
    },
    Rejected {
        target: PoseState,
        guidance: &'static str,
    },
    /// Recoverable detector failure; the session stays on `target`.
    Fault {
        target: PoseState,
        message: String,
    },
    Completed {
        session_id: Uuid,
    },
    Cancelled,
}

pub trait CaptureSink {
    fn emit(&mut self, event: CaptureEvent);
}

impl<F: FnMut(CaptureEvent)> CaptureSink for F {
    fn emit(&mut self, event: CaptureEvent) {
        self(event)
    }
}

#[derive(Debug)]
pub enum LoopOutcome {
    Completed(CompletedEnrollment),
    Cancelled,
}

/// Holds a started source and stops it exactly once, on every exit path.
struct SourceLease<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
    released: bool,
}

impl<'a, S: FrameSource + ?Sized> SourceLease<'a, S> {
    fn start(source: &'a mut S) -> Result<Self, CaptureError> {
        source.start()?;
        tracing::info!("frame source started");
        Ok(Self {
            source,
            released: false,
        })
    }

    fn next_frame(&mut self) -> Result<FaceFrame, CaptureError> {
        self.source.next_frame()
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.source.stop();
            tracing::info!("frame source released");
        }
    }
}

impl<S: FrameSource + ?Sized> Drop for SourceLease<'_, S> {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct CaptureLoop {
    thresholds: PoseThresholds,
    control: CaptureControl,
}

impl CaptureLoop {
    pub fn new(thresholds: PoseThresholds, control: CaptureControl) -> Self {
        Self { thresholds, control }
    }

    pub fn control(&self) -> &CaptureControl {
        &self.control
    }

    /// Run until the session completes, is cancelled, or hits a terminal error.
    ///
    /// The source is released before this returns on every path. Recoverable
    /// detector failures are reported as `CaptureEvent::Fault` and the loop
    /// keeps polling on the same pose.
    pub fn run<S: FrameSource + ?Sized>(
        &self,
        source: &mut S,
        detector: &mut dyn PoseDetector,
        mut sequencer: CaptureSequencer,
        sink: &mut dyn CaptureSink,
    ) -> Result<LoopOutcome, CaptureError> {
        ensure_ready(detector)?;
        if self.control.is_cancelled() {
            tracing::info!(session = %sequencer.session().id(), "enrollment cancelled before camera start");
            sink.emit(CaptureEvent::Cancelled);
            return Ok(LoopOutcome::Cancelled);
        }
        let mut lease = SourceLease::start(source)?;

        loop {
            if self.control.is_cancelled() {
                return Ok(self.cancelled(&mut lease, sequencer, sink));
            }

            let frame = match lease.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    lease.release();
                    tracing::error!(error = %e, state = sequencer.state().label(), "frame source failed");
                    return Err(e);
                }
            };

            // The wait above may have spanned a cancel.
            if self.control.is_cancelled() {
                return Ok(self.cancelled(&mut lease, sequencer, sink));
            }

            let target = sequencer.state();
            let detection = match detector.detect_primary_face(&frame) {
                Ok(d) => d,
                Err(e) if e.is_terminal() => {
                    lease.release();
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, pose = target.label(), "detection failed");
                    sequencer.interrupt();
                    sink.emit(CaptureEvent::Fault { target, message: e.to_string() });
                    continue;
                }
            };

            let reading = classify(detection.as_ref(), target, &self.thresholds);
            let now = Instant::now();
            let attempt = sequencer.observe(&reading, now);
            tracing::trace!(
                seq = frame.sequence,
                pose = target.label(),
                deviation = ?reading.deviation,
                accept = attempt.accept,
                "frame classified"
            );
            sink.emit(CaptureEvent::Guidance {
                target,
                text: attempt.guidance,
                face_present: reading.face_present,
                deviation: reading.deviation,
                progress: sequencer.session().progress(),
            });

            let manual = self.control.take_capture_request();
            if !manual && !sequencer.auto_capture_due(now) {
                continue;
            }
            if self.control.is_cancelled() {
                return Ok(self.cancelled(&mut lease, sequencer, sink));
            }

            match sequencer.commit(&frame, &reading, detector) {
                Ok(CaptureOutcome::Advanced { captured, .. }) => {
                    sink.emit(CaptureEvent::Captured {
                        pose: captured,
                        progress: sequencer.session().progress(),
                    });
                }
                Ok(CaptureOutcome::Completed) => {
                    lease.release();
                    return match sequencer.into_session().into_completed() {
                        Ok(done) => {
                            tracing::info!(session = %done.session_id, "enrollment complete");
                            sink.emit(CaptureEvent::Captured { pose: PoseState::Right, progress: [true; 3] });
                            sink.emit(CaptureEvent::Completed { session_id: done.session_id });
                            Ok(LoopOutcome::Completed(done))
                        }
                        Err(session) => Err(CaptureError::Inference(format!(
                            "session {} reached {:?} with {} descriptors",
                            session.id(),
                            session.state(),
                            session.descriptors().len()
                        ))),
                    };
                }
                Ok(CaptureOutcome::Rejected { target, guidance }) => {
                    sink.emit(CaptureEvent::Rejected { target, guidance });
                }
                Ok(CaptureOutcome::NoFace { target }) => {
                    sink.emit(CaptureEvent::Rejected { target, guidance: GUIDANCE_NO_FACE });
                }
                Err(e) if e.is_terminal() => {
                    lease.release();
                    return Err(e);
                }
                Err(e) => {
                    sink.emit(CaptureEvent::Fault { target, message: e.to_string() });
                }
            }
        }
    }

    fn cancelled<S: FrameSource + ?Sized>(
        &self,
        lease: &mut SourceLease<'_, S>,
        sequencer: CaptureSequencer,
        sink: &mut dyn CaptureSink,
    ) -> LoopOutcome {
        lease.release();
        let session = sequencer.into_session();
        tracing::info!(
            session = %session.id(),
            state = session.state().label(),
            discarded = session.descriptors().len(),
            "enrollment cancelled"
        );
        drop(session);
        sink.emit(CaptureEvent::Cancelled);
        LoopOutcome::Cancelled
    }
}
