//! posekit-hw — Camera access for the capture pipeline.
//!
//! V4L2 capture converted to grayscale frames, exposed to the pipeline as a
//! `FrameSource` that always hands out the most recent frame.

pub mod camera;
pub mod frame;
pub mod frame_slot;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame_slot::{FrameSlot, SlotError};
pub use source::CameraSource;
