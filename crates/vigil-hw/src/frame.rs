//! Raw camera buffer → RGB conversion.

use image::{Rgb, RgbImage};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

fn check_len(buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// BT.601 limited-range YCbCr → RGB.
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> Rgb<u8> {
    let c = y as i32 - 16;
    let d = cb as i32 - 128;
    let e = cr as i32 - 128;
    let clamp = |v: i32| ((v + 128) >> 8).clamp(0, 255) as u8;
    Rgb([
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ])
}

/// Convert packed YUYV 4:2:2 (`[Y0, U, Y1, V]` per pixel pair) to RGB.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = (width * height) as usize;
    check_len(yuyv, pixels * 2)?;

    let mut rgb = RgbImage::new(width, height);
    for (i, pixel) in rgb.pixels_mut().enumerate() {
        let pair = (i / 2) * 4;
        let y = yuyv[i * 2];
        *pixel = ycbcr_to_rgb(y, yuyv[pair + 1], yuyv[pair + 3]);
    }
    Ok(rgb)
}

/// Expand 8-bit grayscale to RGB.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = (width * height) as usize;
    check_len(grey, pixels)?;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let v = grey[(y * width + x) as usize];
        Rgb([v, v, v])
    }))
}

/// Expand 16-bit little-endian grayscale to RGB, keeping the high byte.
pub fn y16_to_rgb(y16: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = (width * height) as usize;
    check_len(y16, pixels * 2)?;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let v = y16[(y * width + x) as usize * 2 + 1];
        Rgb([v, v, v])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_chroma_is_gray() {
        // 2x1: black then white, neutral chroma.
        let rgb = yuyv_to_rgb(&[16, 128, 235, 128], 2, 1).unwrap();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_yuyv_red_chroma() {
        let rgb = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        let p = rgb.get_pixel(0, 0);
        assert!(p[0] > 240 && p[1] < 20 && p[2] < 20, "{p:?}");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(matches!(
            yuyv_to_rgb(&[100, 128], 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[0, 50, 100, 150], 2, 2).unwrap();
        assert_eq!(*rgb.get_pixel(1, 1), Rgb([150, 150, 150]));
        assert!(grey_to_rgb(&[0, 1], 2, 2).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        let rgb = y16_to_rgb(&[0xff, 0x12, 0x00, 0xab], 2, 1).unwrap();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0x12, 0x12, 0x12]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([0xab, 0xab, 0xab]));
    }
}
