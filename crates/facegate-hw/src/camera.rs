//! V4L2 camera capture via the `v4l` crate.

use std::path::Path;

use facegate_core::{Frame, FrameSource, SourceError};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

use crate::frame;

/// Consecutive dark frames skipped before one is handed out anyway.
const MAX_DARK_SKIPS: usize = 10;
const DARK_THRESHOLD: f32 = 0.95;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("video capture not supported by {0}")]
    CaptureNotSupported(String),
}

impl From<CameraError> for SourceError {
    fn from(e: CameraError) -> Self {
        SourceError::DeviceUnavailable(e.to_string())
    }
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
    /// YUYV 4:2:2 packed (2 bytes/pixel, Y channel extracted).
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
}

/// An opened V4L2 capture device with a negotiated format.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a capture device (e.g. "/dev/video0") and ask for `width`x`height` YUYV.
    /// The driver may settle on GREY or Y16 instead.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.raw_os_error() == Some(16) {
                CameraError::DeviceBusy(device_path.to_string())
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::CaptureNotSupported(device_path.to_string()));
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            format = ?pixel_format,
            "opened camera"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Start streaming. The device is released when the session is dropped.
    pub fn start(self) -> Result<CameraSession, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        Ok(CameraSession {
            stream,
            camera: self,
            frames: 0,
            dark_skipped: 0,
        })
    }

    fn to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let converted = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height),
            PixelFormat::Grey => frame::grey_to_grayscale(buf, self.width, self.height),
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, self.width, self.height),
        };
        converted.map_err(|e| CameraError::CaptureFailed(e.to_string()))
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

/// A streaming camera, usable as a [`FrameSource`] for one request.
pub struct CameraSession {
    // Declared first so streaming stops before the device handle closes.
    stream: MmapStream<'static>,
    camera: Camera,
    frames: u64,
    dark_skipped: u64,
}

impl CameraSession {
    /// Open `device_path` and start streaming in one step.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        Camera::open(device_path, width, height)?.start()
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    fn capture(&mut self) -> Result<Vec<u8>, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;
        let gray = self.camera.to_grayscale(buf)?;
        tracing::trace!(seq = sequence, "frame captured");
        Ok(gray)
    }
}

impl FrameSource for CameraSession {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let mut gray = self.capture()?;
        let mut skipped = 0;
        while frame::is_dark_frame(&gray, DARK_THRESHOLD) && skipped < MAX_DARK_SKIPS {
            skipped += 1;
            gray = self.capture()?;
        }
        if skipped == MAX_DARK_SKIPS {
            tracing::warn!(device = %self.camera.device_path, "camera keeps returning dark frames");
        }
        self.dark_skipped += skipped as u64;
        self.frames += 1;

        Ok(Some(Frame {
            data: gray,
            width: self.camera.width,
            height: self.camera.height,
        }))
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        tracing::debug!(
            device = %self.camera.device_path,
            frames = self.frames,
            dark_skipped = self.dark_skipped,
            "camera released"
        );
    }
}
