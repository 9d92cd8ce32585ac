//! Crop normalization: every face that reaches the model goes through here.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};

use crate::types::{BoundingBox, Frame};

/// Side length of the canonical crop. Training and matching must agree on it.
pub const CANONICAL_SIZE: u32 = 200;

/// A canonical single-channel face crop of `CANONICAL_SIZE` x `CANONICAL_SIZE`.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceCrop(GrayImage);

impl FaceCrop {
    pub fn image(&self) -> &GrayImage {
        &self.0
    }

    pub fn into_image(self) -> GrayImage {
        self.0
    }
}

/// Extract `bbox` from `frame` and bring it to canonical size.
///
/// The box is clamped to the frame first; `None` when nothing of it lies inside.
pub fn normalize_crop(frame: &Frame, bbox: &BoundingBox) -> Option<FaceCrop> {
    let gray = frame.to_gray_image()?;

    let x0 = bbox.x.max(0.0).floor() as u32;
    let y0 = bbox.y.max(0.0).floor() as u32;
    let x1 = ((bbox.x + bbox.width).ceil().max(0.0) as u32).min(frame.width);
    let y1 = ((bbox.y + bbox.height).ceil().max(0.0) as u32).min(frame.height);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let region = imageops::crop_imm(&gray, x0, y0, x1 - x0, y1 - y0).to_image();
    Some(to_canonical(region))
}

/// Normalize an already-cropped image, e.g. a stored sample.
pub fn normalize_image(image: &DynamicImage) -> FaceCrop {
    to_canonical(image.to_luma8())
}

fn to_canonical(gray: GrayImage) -> FaceCrop {
    if gray.dimensions() == (CANONICAL_SIZE, CANONICAL_SIZE) {
        return FaceCrop(gray);
    }
    FaceCrop(imageops::resize(
        &gray,
        CANONICAL_SIZE,
        CANONICAL_SIZE,
        FilterType::Triangle,
    ))
}
