//! vigil-hw: V4L2 camera capture as a frame source for the verification loop.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraSource, DeviceInfo, PixelFormat};
pub use frame::FrameError;
