//! Frame sources: anything that can hand the pipeline frames one at a time.
//!
//! A live camera (see `facegate-hw`) and decoded still images are treated the
//! same once a [`Frame`] is in hand.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

use crate::types::Frame;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("image source unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("failed to decode image: {0}")]
    Decode(String),
}

/// Produces frames for detection.
pub trait FrameSource {
    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Start over from the first frame. Live sources ignore this.
    fn restart(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        (**self).next_frame()
    }

    fn restart(&mut self) {
        (**self).restart()
    }
}

/// A finite list of already-decoded frames.
#[derive(Debug, Clone, Default)]
pub struct StillFrames {
    frames: Vec<Frame>,
    cursor: usize,
}

impl StillFrames {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames, cursor: 0 }
    }

    /// Decode each file into a frame.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self, SourceError> {
        let frames = paths
            .iter()
            .map(|p| {
                let path = p.as_ref();
                image::open(path)
                    .map(|img| Frame::from_image(&img))
                    .map_err(|e| SourceError::Decode(format!("{}: {e}", path.display())))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(frames))
    }

    /// Decode base64 uploads; a `data:image/...;base64,` prefix is accepted.
    pub fn from_base64<S: AsRef<str>>(payloads: &[S]) -> Result<Self, SourceError> {
        let frames = payloads
            .iter()
            .map(|p| decode_base64_frame(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(frames))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for StillFrames {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let frame = self.frames.get(self.cursor).cloned();
        if frame.is_some() {
            self.cursor += 1;
        }
        Ok(frame)
    }

    fn restart(&mut self) {
        self.cursor = 0;
    }
}

/// Decode one base64-encoded image into a grayscale frame.
pub fn decode_base64_frame(payload: &str) -> Result<Frame, SourceError> {
    let data = match payload.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload,
    };
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| SourceError::Decode(format!("invalid base64: {e}")))?;
    let img = image::load_from_memory(&bytes).map_err(|e| SourceError::Decode(e.to_string()))?;
    Ok(Frame::from_image(&img))
}
