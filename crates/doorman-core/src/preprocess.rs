//! Image → tensor conversion shared by the detector and the embedder.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

/// Resize `image` to `size × size` (bilinear) and pack it as an NHWC
/// `[1, size, size, 3]` tensor with RGB channels scaled to `[0, 1]`.
pub fn image_to_tensor(image: &RgbImage, size: usize) -> Array4<f32> {
    let resized = if image.width() as usize == size && image.height() as usize == size {
        image.clone()
    } else {
        imageops::resize(image, size as u32, size as u32, FilterType::Triangle)
    };

    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            tensor[[0, y, x, c]] = pixel[c] as f32 / 255.0;
        }
    }

    tensor
}
