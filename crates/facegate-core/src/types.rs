use std::fmt;

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Longest identity name accepted after sanitisation.
const MAX_IDENTITY_NAME_LEN: usize = 64;

/// A single-channel intensity frame, the unit every detector and normalizer consumes.
///
/// Color sources (uploads, YUYV cameras) are reduced to luma before they become a `Frame`.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Convert any decoded image to a grayscale frame.
    pub fn from_image(image: &DynamicImage) -> Self {
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();
        Self {
            data: gray.into_raw(),
            width,
            height,
        }
    }

    /// View the frame as an `image` buffer. `None` if `data` does not cover `width * height`.
    pub fn to_gray_image(&self) -> Option<GrayImage> {
        let pixels = (self.width as usize) * (self.height as usize);
        if self.data.len() < pixels {
            return None;
        }
        GrayImage::from_raw(self.width, self.height, self.data[..pixels].to_vec())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Axis-aligned bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Whether both sides reach `min_size` pixels. Smaller faces are too far away to use.
    pub fn is_usable(&self, min_size: u32) -> bool {
        self.width >= min_size as f32 && self.height >= min_size as f32
    }
}

/// A sanitised identity name, safe to use as a dataset directory key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityName(String);

impl IdentityName {
    /// Sanitise a raw display name.
    ///
    /// Surrounding whitespace is trimmed, inner whitespace runs become `_`, and
    /// anything other than alphanumerics, `-`, `_` and `.` is dropped.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let mut name = String::with_capacity(raw.len());
        let mut pending_space = false;
        for ch in raw.trim().chars() {
            if ch.is_whitespace() {
                pending_space = true;
                continue;
            }
            if !(ch.is_alphanumeric() || ch == '-' || ch == '_' || ch == '.') {
                continue;
            }
            if pending_space && !name.is_empty() {
                name.push('_');
            }
            pending_space = false;
            name.push(ch);
        }

        let reason = if name.is_empty() {
            Some("name is empty after sanitisation")
        } else if name.starts_with('.') {
            Some("name must not start with '.'")
        } else if name.chars().count() > MAX_IDENTITY_NAME_LEN {
            Some("name is longer than 64 characters")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(PipelineError::InvalidIdentityName {
                name: raw.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw model answer for one crop: nearest label and its distance (lower = more similar).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub label: u32,
    pub distance: f64,
}

/// The categorical decision exposed outside the core.
///
/// `name` is only ever populated when `matched` is true; an above-threshold
/// nearest label is never revealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityDecision {
    pub name: Option<String>,
    /// Distance of the evaluated face; `None` when no face was evaluated.
    pub confidence: Option<f64>,
    pub matched: bool,
}

impl IdentityDecision {
    pub fn unknown(confidence: Option<f64>) -> Self {
        Self {
            name: None,
            confidence,
            matched: false,
        }
    }

    /// Display name, `"Unknown"` for unmatched decisions.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

/// Decision for one detected face within a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDecision {
    pub bbox: BoundingBox,
    pub decision: IdentityDecision,
}

/// Everything learned from identifying one or more frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyReport {
    /// Lowest-distance matched candidate, or Unknown.
    pub primary: IdentityDecision,
    pub candidates: Vec<CandidateDecision>,
    pub frames_examined: usize,
}

/// Result of a full training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    /// Number of labels, including identities that have no samples yet.
    pub people: usize,
    /// Number of samples the model was fitted on.
    pub images: usize,
    pub generation: String,
    pub trained_at: String,
}
