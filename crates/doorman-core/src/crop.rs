//! Face crop geometry.
//!
//! Detection boxes are always expressed relative to the detector's square
//! input, whatever the camera resolution. Cropping therefore pads the box in
//! model space first, then remaps it into source pixels with per-axis scale
//! factors, then clamps to the source bounds.

use crate::geometry::FaceBox;
use image::{imageops, RgbImage};

/// Fraction of the box extent added on each side before cropping.
pub const DEFAULT_CROP_MARGIN: f32 = 0.5;

/// Crop region within the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Compute the padded crop region for `face` in a `source_width × source_height` image.
///
/// The result always lies inside the image and is at least 1×1.
pub fn crop_region(
    face: &FaceBox,
    input_size: u32,
    source_width: u32,
    source_height: u32,
    margin: f32,
) -> CropRegion {
    let padded = face.expand(margin);

    let scale_x = source_width as f32 / input_size as f32;
    let scale_y = source_height as f32 / input_size as f32;
    let mapped = padded.scale(scale_x, scale_y);

    let (x, width) = clamp_span(mapped.left, mapped.right, source_width);
    let (y, height) = clamp_span(mapped.top, mapped.bottom, source_height);

    CropRegion { x, y, width, height }
}

/// Clamp `[start, end)` to `[0, limit)`, keeping at least one pixel.
fn clamp_span(start: f32, end: f32, limit: u32) -> (u32, u32) {
    let limit_f = limit as f32;
    let start = (start.clamp(0.0, limit_f) as u32).min(limit.saturating_sub(1));
    let end = end.clamp(0.0, limit_f) as u32;
    (start, end.saturating_sub(start).max(1))
}

/// Cut the padded face region out of `image`.
pub fn crop_face(image: &RgbImage, face: &FaceBox, input_size: u32, margin: f32) -> RgbImage {
    let region = crop_region(face, input_size, image.width(), image.height(), margin);
    tracing::debug!(
        x = region.x,
        y = region.y,
        width = region.width,
        height = region.height,
        "face crop"
    );
    imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inside(region: &CropRegion, w: u32, h: u32) -> bool {
        region.width >= 1 && region.height >= 1 && region.x + region.width <= w && region.y + region.height <= h
    }

    #[test]
    fn test_full_square_box_stays_in_bounds() {
        let face = FaceBox::new(0.0, 0.0, 128.0, 128.0);
        for (w, h) in [(640, 480), (128, 128), (1920, 1080), (97, 311)] {
            let region = crop_region(&face, 128, w, h, DEFAULT_CROP_MARGIN);
            assert!(inside(&region, w, h), "{region:?} for {w}x{h}");
            assert_eq!(region, CropRegion { x: 0, y: 0, width: w, height: h });
        }
    }

    #[test]
    fn test_margin_then_scale() {
        // 20px box centered at (64, 64) → padded to 40px → ×5 horizontally, ×3.75 vertically
        let face = FaceBox::new(54.0, 54.0, 74.0, 74.0);
        let region = crop_region(&face, 128, 640, 480, 0.5);
        assert_eq!(region, CropRegion { x: 220, y: 165, width: 200, height: 150 });
    }

    #[test]
    fn test_zero_margin_is_plain_remap() {
        let face = FaceBox::new(32.0, 32.0, 64.0, 64.0);
        let region = crop_region(&face, 128, 256, 256, 0.0);
        assert_eq!(region, CropRegion { x: 64, y: 64, width: 64, height: 64 });
    }

    #[test]
    fn test_edge_box_is_clamped() {
        let face = FaceBox::new(100.0, 0.0, 128.0, 20.0);
        let region = crop_region(&face, 128, 320, 240, 0.5);
        assert!(inside(&region, 320, 240), "{region:?}");
        assert_eq!(region.y, 0);
    }

    #[test]
    fn test_zero_area_box_yields_one_pixel() {
        let face = FaceBox::new(128.0, 128.0, 128.0, 128.0);
        let region = crop_region(&face, 128, 64, 64, 0.5);
        assert_eq!(region, CropRegion { x: 63, y: 63, width: 1, height: 1 });
    }

    #[test]
    fn test_crop_face_dimensions() {
        let img = RgbImage::new(640, 480);
        let face = FaceBox::new(54.0, 54.0, 74.0, 74.0);
        let crop = crop_face(&img, &face, 128, 0.5);
        assert_eq!(crop.dimensions(), (200, 150));
    }
}
