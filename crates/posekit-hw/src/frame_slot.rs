//! Single-slot, latest-frame-wins mailbox between the camera reader and
//! the capture loop.
//!
//! A frame offered while another is still pending replaces it; the older
//! one is counted as dropped. Frames are never queued.

use posekit_core::FaceFrame;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
    /// Producer closed the slot, with its reason.
    Closed(String),
    Timeout(Duration),
}

#[derive(Default)]
struct SlotState {
    pending: Option<FaceFrame>,
    closed: Option<String>,
    dropped: u64,
}

#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a frame. Returns `false` if it displaced an unconsumed one.
    /// Frames offered after `close` are discarded.
    pub fn offer(&self, frame: FaceFrame) -> bool {
        let mut state = self.lock();
        if state.closed.is_some() {
            return true;
        }
        let displaced = state.pending.replace(frame).is_some();
        if displaced {
            state.dropped += 1;
        }
        drop(state);
        self.ready.notify_one();
        !displaced
    }

    /// Wait for the next frame. A pending frame is still delivered after close.
    pub fn take(&self, timeout: Duration) -> Result<FaceFrame, SlotError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(frame) = state.pending.take() {
                return Ok(frame);
            }
            if let Some(reason) = &state.closed {
                return Err(SlotError::Closed(reason.clone()));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SlotError::Timeout(timeout));
            }
            state = match self.ready.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Close the slot; waiters wake with `SlotError::Closed`.
    pub fn close(&self, reason: impl Into<String>) {
        let mut state = self.lock();
        if state.closed.is_none() {
            state.closed = Some(reason.into());
        }
        drop(state);
        self.ready.notify_all();
    }

    /// Clear pending frame, close reason and counters for a fresh stream.
    pub fn reset(&self) {
        *self.lock() = SlotState::default();
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}
