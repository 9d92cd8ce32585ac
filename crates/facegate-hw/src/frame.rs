//! Raw buffer conversion to 8-bit grayscale, and dark-frame detection.

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format} buffer length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len("YUYV", yuyv, expected)?;
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Copy an 8-bit GREY buffer, dropping any driver padding past the image.
pub fn grey_to_grayscale(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    check_len("GREY", grey, expected)?;
    Ok(grey[..expected].to_vec())
}

/// Downscale 16-bit little-endian grayscale to 8 bits (high byte).
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len("Y16", y16, expected)?;
    Ok(y16[..expected]
        .chunks_exact(2)
        .map(|px| (u16::from_le_bytes([px[0], px[1]]) >> 8) as u8)
        .collect())
}

fn check_len(format: &'static str, buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// True when more than `threshold_pct` of pixels fall in the darkest bucket (0–31).
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}
