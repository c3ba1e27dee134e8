use crate::config::Config;
use posekit_core::{
    CaptureControl, CaptureError, CaptureEvent, CaptureLoop, CaptureSequencer, DetectorConfig,
    EnrollmentSession, IdentityHint, LoopOutcome, OnnxPoseDetector, PoseThresholds,
};
use posekit_hw::CameraSource;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Guidance is sent best-effort; lifecycle events always get through.
const EVENT_BUFFER: usize = 16;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Everything the engine thread needs, detached from `Config`.
struct EnrollJob {
    identity: IdentityHint,
    detector: DetectorConfig,
    thresholds: PoseThresholds,
    camera_device: String,
    frame_timeout: Duration,
    warmup_frames: usize,
    hold_window: Duration,
    auto_capture: bool,
}

/// Front-end side of a running enrollment.
pub struct EngineHandle {
    control: CaptureControl,
    events: mpsc::Receiver<CaptureEvent>,
    result: oneshot::Receiver<Result<LoopOutcome, CaptureError>>,
}

impl EngineHandle {
    /// Commands for the running session; safe to clone onto other threads.
    pub fn control(&self) -> &CaptureControl {
        &self.control
    }

    /// Next event from the capture loop; `None` once the engine has finished.
    pub async fn next_event(&mut self) -> Option<CaptureEvent> {
        self.events.recv().await
    }

    /// Wait for the session outcome.
    pub async fn finish(self) -> Result<LoopOutcome, EngineError> {
        Ok(self.result.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Spawn one enrollment on a dedicated OS thread.
///
/// The thread loads the models, opens the camera and runs the capture loop.
/// It owns the detector and the camera for the whole session; both are
/// released when the thread exits.
pub fn spawn_enrollment(config: &Config, identity: IdentityHint, manual: bool) -> Result<EngineHandle, EngineError> {
    let job = EnrollJob {
        identity,
        detector: config.detector_config(),
        thresholds: config.thresholds,
        camera_device: config.camera_device.clone(),
        frame_timeout: config.frame_timeout(),
        warmup_frames: config.warmup_frames,
        hold_window: config.hold_window(),
        auto_capture: config.auto_capture && !manual,
    };

    let control = CaptureControl::new();
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (result_tx, result_rx) = oneshot::channel();

    let loop_control = control.clone();
    std::thread::Builder::new()
        .name("posekit-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let result = run_enrollment(job, loop_control, &event_tx);
            if let Err(e) = &result {
                tracing::error!(error = %e, "enrollment failed");
            }
            let _ = result_tx.send(result);
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle {
        control,
        events: event_rx,
        result: result_rx,
    })
}

fn run_enrollment(
    job: EnrollJob,
    control: CaptureControl,
    events: &mpsc::Sender<CaptureEvent>,
) -> Result<LoopOutcome, CaptureError> {
    let mut detector = OnnxPoseDetector::new(job.detector);
    detector.load()?;

    let session = EnrollmentSession::begin(job.identity, &detector)?;
    tracing::info!(
        session = %session.id(),
        name = %session.identity().name,
        auto_capture = job.auto_capture,
        "enrollment session started"
    );

    let sequencer = CaptureSequencer::new(session)
        .with_hold_window(job.hold_window)
        .with_auto_capture(job.auto_capture);
    let mut source = CameraSource::new(job.camera_device, job.frame_timeout, job.warmup_frames);
    let mut sink = |event: CaptureEvent| forward(events, event);

    CaptureLoop::new(job.thresholds, control).run(&mut source, &mut detector, sequencer, &mut sink)
}

fn forward(events: &mpsc::Sender<CaptureEvent>, event: CaptureEvent) {
    if matches!(event, CaptureEvent::Guidance { .. }) {
        // A newer frame will follow; a full channel just skips this one.
        let _ = events.try_send(event);
    } else if events.blocking_send(event).is_err() {
        tracing::debug!("event receiver dropped");
    }
}
