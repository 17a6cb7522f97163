use crate::VisionResult;
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};

pub const OPENAI_CLIP_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
pub const OPENAI_CLIP_STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    /// Stretch to exactly (height, width).
    Exact,
    /// Scale the shorter edge to the target, then center crop.
    ShortestEdgeCenterCrop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    pub height: u32,
    pub width: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub resize: ResizeMode,
}

impl PreprocessConfig {
    /// BLIP image processor: 384x384 bicubic resize without cropping.
    pub fn blip() -> Self {
        Self {
            height: 384,
            width: 384,
            mean: OPENAI_CLIP_MEAN,
            std: OPENAI_CLIP_STD,
            resize: ResizeMode::Exact,
        }
    }

    pub fn clip() -> Self {
        Self {
            height: 224,
            width: 224,
            mean: OPENAI_CLIP_MEAN,
            std: OPENAI_CLIP_STD,
            resize: ResizeMode::ShortestEdgeCenterCrop,
        }
    }
}

/// Decode raw upload bytes into an RGB raster.
///
/// Any decoding failure (empty input, unknown format, truncated data) is
/// reported as [`crate::VisionError::InvalidImage`].
pub fn decode_rgb(image_bytes: &[u8]) -> VisionResult<RgbImage> {
    let image = image::load_from_memory(image_bytes)?;
    Ok(image.to_rgb8())
}

/// Resize, scale to [0, 1], normalize per channel and lay out as (1, 3, H, W).
pub fn to_tensor(image: &RgbImage, config: &PreprocessConfig) -> Array4<f32> {
    let image = resize(image, config);
    let (height, width) = (config.height as usize, config.width as usize);

    let mut array = Array4::zeros((1, 3, height, width));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            array[[0, c, y as usize, x as usize]] =
                (pixel[c] as f32 / 255.0 - config.mean[c]) / config.std[c];
        }
    }

    array
}

pub fn preprocess(image_bytes: &[u8], config: &PreprocessConfig) -> VisionResult<Array4<f32>> {
    let image = decode_rgb(image_bytes)?;
    Ok(to_tensor(&image, config))
}

fn resize(image: &RgbImage, config: &PreprocessConfig) -> RgbImage {
    match config.resize {
        ResizeMode::Exact => bounded_resize(image, config.width, config.height),
        ResizeMode::ShortestEdgeCenterCrop => {
            // crop in source coordinates first, so the work never exceeds the source size
            let (left, top, crop_w, crop_h) = center_crop_box(image.dimensions(), config);
            let cropped = image::imageops::crop_imm(image, left, top, crop_w, crop_h).to_image();
            bounded_resize(&cropped, config.width, config.height)
        }
    }
}

/// Bicubic resize whose float buffer stays near the target size.
///
/// `imageops::resize` keeps a `source width x target height` intermediate, so
/// sources far larger than the target are first box-sampled down to twice the
/// target on each oversized axis.
fn bounded_resize(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let (max_w, max_h) = (width.saturating_mul(2), height.saturating_mul(2));
    if w > max_w || h > max_h {
        let shrunk = image::imageops::thumbnail(image, w.min(max_w), h.min(max_h));
        return image::imageops::resize(&shrunk, width, height, FilterType::CatmullRom);
    }
    image::imageops::resize(image, width, height, FilterType::CatmullRom)
}

/// Largest centered box of the target aspect ratio inside a `(w, h)` source.
fn center_crop_box((w, h): (u32, u32), config: &PreprocessConfig) -> (u32, u32, u32, u32) {
    let target = config.width as f64 / config.height as f64;
    let (crop_w, crop_h) = if w as f64 / h as f64 > target {
        (((h as f64 * target).round() as u32).clamp(1, w), h)
    } else {
        (w, ((w as f64 / target).round() as u32).clamp(1, h))
    };
    ((w - crop_w) / 2, (h - crop_h) / 2, crop_w, crop_h)
}
