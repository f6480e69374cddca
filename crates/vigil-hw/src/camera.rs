//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, FrameError};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;
use vigil_core::{CaptureError, Frame, FrameSource};

/// Buffers queued on the capture stream.
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(Self::Yuyv)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(Self::Grey)
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            Some(Self::Y16)
        } else {
            None
        }
    }

    /// Decode one raw buffer of `width` × `height` pixels.
    pub fn decode(self, buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
        match self {
            Self::Yuyv => frame::yuyv_to_rgb(buf, width, height),
            Self::Grey => frame::grey_to_rgb(buf, width, height),
            Self::Y16 => frame::y16_to_rgb(buf, width, height),
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0"), requesting
    /// YUYV at `width` × `height`. The driver may substitute GREY or Y16.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// Live camera as a [`FrameSource`]. Never reports end of stream.
///
/// One mmap stream is started on construction and kept for the source's lifetime;
/// every frame is a buffer dequeued from it.
pub struct CameraSource {
    stream: MmapStream<'static>,
    camera: Camera,
    sequence: u64,
}

impl CameraSource {
    /// Start streaming from `camera`, discarding `warmup_frames` while auto exposure settles.
    pub fn new(camera: Camera, warmup_frames: usize) -> Result<Self, CameraError> {
        let stream = MmapStream::with_buffers(&camera.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        tracing::info!(
            device = %camera.device_path,
            buffers = STREAM_BUFFERS,
            "camera stream created"
        );

        let mut source = Self {
            stream,
            camera,
            sequence: 0,
        };

        if warmup_frames > 0 {
            tracing::info!(count = warmup_frames, "discarding warmup frames");
            for _ in 0..warmup_frames {
                if let Err(e) = source.dequeue() {
                    tracing::debug!(error = %e, "warmup capture failed");
                }
            }
        }

        Ok(source)
    }

    /// Dequeue the next buffer from the running stream and convert it.
    fn dequeue(&mut self) -> Result<Result<RgbImage, FrameError>, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        tracing::trace!(device_seq = meta.sequence, bytes = buf.len(), "dequeued buffer");

        let camera = &self.camera;
        Ok(camera.pixel_format.decode(buf, camera.width, camera.height))
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let sequence = self.sequence;
        self.sequence += 1;

        let decoded = self
            .dequeue()
            .map_err(|e| CaptureError::Failed(e.to_string()))?;
        Ok(Some(frame_from_decoded(decoded, sequence)))
    }
}

/// A malformed buffer becomes an empty frame, which the verification loop skips.
fn frame_from_decoded(decoded: Result<RgbImage, FrameError>, sequence: u64) -> Frame {
    match decoded {
        Ok(image) => Frame::new(image, sequence),
        Err(e) => {
            tracing::debug!(sequence, error = %e, "malformed camera buffer");
            Frame::empty(sequence)
        }
    }
}
