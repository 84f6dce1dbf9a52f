use image::DynamicImage;
use image::imageops::{self, FilterType};
use ndarray::Array4;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("{0}")]
    InvalidImage(String),
    #[error("{0}")]
    Preprocess(String),
}

pub fn decode(image: &[u8]) -> Result<DynamicImage, ImageError> {
    image::load_from_memory(image).map_err(|e| ImageError::InvalidImage(e.to_string()))
}

/// Stretches the image to `size`x`size` RGB and scales it into [0, 1].
/// The result is NHWC with a batch of one.
pub fn to_tensor(image: &DynamicImage, size: u32) -> Result<Array4<f32>, ImageError> {
    let rgb = image.to_rgb8();
    let resized = imageops::resize(&rgb, size, size, FilterType::CatmullRom);

    let side = size as usize;
    let pixels: Vec<f32> = resized
        .into_raw()
        .into_iter()
        .map(|v| f32::from(v) / 255.0)
        .collect();

    Array4::from_shape_vec((1, side, side, 3), pixels)
        .map_err(|e| ImageError::Preprocess(e.to_string()))
}
