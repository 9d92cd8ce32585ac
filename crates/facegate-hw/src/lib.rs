//! facegate-hw — V4L2 camera capture for the facegate pipeline.
//!
//! A [`CameraSession`] is a live [`facegate_core::FrameSource`]: it streams
//! grayscale frames, skips dark ones and releases the device when dropped.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraSession, DeviceInfo, PixelFormat};
pub use frame::FrameError;
