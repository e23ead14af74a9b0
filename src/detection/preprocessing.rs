use crate::models::DecodedImage;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

/// Resize to the square model input, ignoring aspect ratio
pub fn to_model_input(img: &DynamicImage, size: u32) -> RgbImage {
    image::imageops::resize(&img.to_rgb8(), size, size, FilterType::Triangle)
}

/// Factors mapping model-input pixels back to source pixels
pub fn scale_factors(width: u32, height: u32, size: u32) -> (f32, f32) {
    (width as f32 / size as f32, height as f32 / size as f32)
}

/// Pack a batch as NCHW f32 in [0, 1], channel order RGB
pub fn batch_to_nchw(batch: &[DecodedImage], size: u32) -> Vec<f32> {
    let side = size as usize;
    let plane = side * side;
    let mut data = vec![0.0f32; batch.len() * 3 * plane];

    for (n, item) in batch.iter().enumerate() {
        let rgb = to_model_input(&item.image, size);
        let base = n * 3 * plane;
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let offset = y as usize * side + x as usize;
            for c in 0..3 {
                data[base + c * plane + offset] = pixel[c] as f32 / 255.0;
            }
        }
    }

    data
}
