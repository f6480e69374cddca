//! Frame annotation: one hollow rectangle per verified face.

use crate::types::{FaceVerdict, Region};
use image::{Rgb, RgbImage};
use imageproc::rect::Rect;

pub const MATCHED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const NOT_MATCHED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const BORDER_THICKNESS: u32 = 3;

pub fn verdict_color(matched: bool) -> Rgb<u8> {
    if matched {
        MATCHED_COLOR
    } else {
        NOT_MATCHED_COLOR
    }
}

/// Draw every verdict onto `image`, colour-coded by outcome.
pub fn draw_verdicts(image: &mut RgbImage, faces: &[FaceVerdict]) {
    for face in faces {
        draw_region(image, &face.region, verdict_color(face.result.matched), BORDER_THICKNESS);
    }
}

/// Outline `region` with a border `thickness` pixels wide, drawn inwards.
pub fn draw_region(image: &mut RgbImage, region: &Region, color: Rgb<u8>, thickness: u32) {
    for inset in 0..thickness {
        let (Some(width), Some(height)) = (
            region.width.checked_sub(2 * inset),
            region.height.checked_sub(2 * inset),
        ) else {
            break;
        };
        if width == 0 || height == 0 {
            break;
        }
        let rect = Rect::at((region.x + inset) as i32, (region.y + inset) as i32)
            .of_size(width, height);
        imageproc::drawing::draw_hollow_rect_mut(image, rect, color);
    }
}
