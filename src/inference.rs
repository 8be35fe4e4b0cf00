//! Frame inference seam and tensor conversion
//!
//! The pipeline repairs frames through the [`InferenceEngine`] trait; the
//! production implementation wraps an ONNX inpainting model, the fallback is
//! a pure-Rust diffusion fill, and tests inject a mock. Tensor conversion and
//! the blend-back compositing shared by model-backed engines live here.

use crate::{
    error::{Result, WmRemovalError},
    region::RegionMask,
    video::VideoFrame,
};

use async_trait::async_trait;
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;

/// Trait for frame repair engines
///
/// Engines are initialized once and shared across pipeline runs; `repair`
/// takes `&self` so a single engine can serve concurrent pipelines.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Load model weights and warm the execution provider
    async fn initialize(&mut self) -> Result<()>;

    /// Repaint the masked pixels of one frame
    ///
    /// The returned frame has the input's dimensions, index, and timestamp;
    /// pixels outside the mask are identical to the input.
    async fn repair(&self, frame: &VideoFrame, mask: &RegionMask) -> Result<VideoFrame>;

    /// Whether `initialize` has completed
    fn is_initialized(&self) -> bool;

    /// Short engine name for logs
    fn name(&self) -> &'static str;
}

/// Convert an RGB frame to a normalized `[1, 3, H, W]` tensor
///
/// The raster is resized to `size`x`size` and channel values scaled to
/// `[0, 1]`, the input layout LaMa-style inpainting models expect.
pub fn frame_to_tensor(image: &RgbImage, size: u32) -> Array4<f32> {
    let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = f32::from(pixel[0]) / 255.0;
        tensor[[0, 1, y, x]] = f32::from(pixel[1]) / 255.0;
        tensor[[0, 2, y, x]] = f32::from(pixel[2]) / 255.0;
    }
    tensor
}

/// Convert a region mask to a binary `[1, 1, H, W]` tensor
///
/// Nearest-neighbor resampling keeps the mask hard-edged at model resolution.
pub fn mask_to_tensor(mask: &RegionMask, size: u32) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 1, size as usize, size as usize));
    for y in 0..size {
        let src_y = (u64::from(y) * u64::from(mask.height) / u64::from(size)) as u32;
        for x in 0..size {
            let src_x = (u64::from(x) * u64::from(mask.width) / u64::from(size)) as u32;
            if mask.is_masked(src_x, src_y) {
                tensor[[0, 0, y as usize, x as usize]] = 1.0;
            }
        }
    }
    tensor
}

/// Convert a `[1, 3, H, W]` model output back to an RGB raster
///
/// # Errors
///
/// Returns an inference error when the tensor shape is not `[1, 3, H, W]`.
pub fn tensor_to_image(tensor: &Array4<f32>) -> Result<RgbImage> {
    let shape = tensor.shape();
    if shape[0] != 1 || shape[1] != 3 {
        return Err(WmRemovalError::inference(format!(
            "unexpected output tensor shape {:?}",
            shape
        )));
    }
    let (height, width) = (shape[2], shape[3]);
    let mut image = RgbImage::new(width as u32, height as u32);
    for y in 0..height {
        for x in 0..width {
            let r = (tensor[[0, 0, y, x]].clamp(0.0, 1.0) * 255.0).round() as u8;
            let g = (tensor[[0, 1, y, x]].clamp(0.0, 1.0) * 255.0).round() as u8;
            let b = (tensor[[0, 2, y, x]].clamp(0.0, 1.0) * 255.0).round() as u8;
            image.put_pixel(x as u32, y as u32, image::Rgb([r, g, b]));
        }
    }
    Ok(image)
}

/// Composite repainted pixels into the source frame inside the mask only
///
/// The model output is resized back to frame resolution; every pixel outside
/// the mask is taken bit-for-bit from the source frame.
pub fn blend_masked(source: &RgbImage, repainted: &RgbImage, mask: &RegionMask) -> RgbImage {
    let (width, height) = (source.width(), source.height());
    let repainted = if repainted.dimensions() == (width, height) {
        repainted.clone()
    } else {
        image::imageops::resize(repainted, width, height, FilterType::Triangle)
    };

    let mut output = source.clone();
    for y in 0..height {
        for x in 0..width {
            if mask.is_masked(x, y) {
                output.put_pixel(x, y, *repainted.get_pixel(x, y));
            }
        }
    }
    output
}
