//! Model-free inpainting fallback
//!
//! Fills the masked region by diffusing boundary colors inward, the same
//! role classical inpainting plays when no model weights are installed.
//! Quality is below a learned model but the backend has zero setup cost.

use crate::{
    error::{Result, WmRemovalError},
    inference::InferenceEngine,
    region::RegionMask,
    video::VideoFrame,
};

use async_trait::async_trait;
use image::RgbImage;

/// Number of smoothing sweeps applied after the initial fill
const SMOOTHING_PASSES: usize = 4;

/// Pure-Rust diffusion inpainting backend
#[derive(Debug, Default)]
pub struct DiffusionInpaintBackend;

impl DiffusionInpaintBackend {
    /// Create a new diffusion backend
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Fill masked pixels from known neighbors, boundary inward
    fn fill(image: &RgbImage, mask: &RegionMask) -> RgbImage {
        let (width, height) = image.dimensions();
        let mut output = image.clone();
        let mut known: Vec<bool> = mask.data.iter().map(|&v| v == 0).collect();
        let mut frontier: Vec<(u32, u32)> = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .filter(|&(x, y)| mask.is_masked(x, y))
            .collect();

        // Peel the unknown region layer by layer; each pass fills every
        // pixel that touches at least one known neighbor.
        while !frontier.is_empty() {
            let mut filled_this_pass = Vec::new();
            let mut remaining = Vec::new();

            for &(x, y) in &frontier {
                let mut sum = [0u32; 3];
                let mut count = 0u32;
                for (nx, ny) in neighbors(x, y, width, height) {
                    if known[(ny * width + nx) as usize] {
                        let p = output.get_pixel(nx, ny);
                        sum[0] += u32::from(p[0]);
                        sum[1] += u32::from(p[1]);
                        sum[2] += u32::from(p[2]);
                        count += 1;
                    }
                }
                if count > 0 {
                    output.put_pixel(
                        x,
                        y,
                        image::Rgb([
                            (sum[0] / count) as u8,
                            (sum[1] / count) as u8,
                            (sum[2] / count) as u8,
                        ]),
                    );
                    filled_this_pass.push((x, y));
                } else {
                    remaining.push((x, y));
                }
            }

            if filled_this_pass.is_empty() {
                // Fully unknown frame, nothing to diffuse from
                break;
            }
            for &(x, y) in &filled_this_pass {
                known[(y * width + x) as usize] = true;
            }
            frontier = remaining;
        }

        // Smoothing sweeps over the filled region flatten the onion-ring
        // artifacts of the layer fill
        for _ in 0..SMOOTHING_PASSES {
            let snapshot = output.clone();
            for y in 0..height {
                for x in 0..width {
                    if !mask.is_masked(x, y) {
                        continue;
                    }
                    let mut sum = [0u32; 3];
                    let mut count = 0u32;
                    for (nx, ny) in neighbors(x, y, width, height) {
                        let p = snapshot.get_pixel(nx, ny);
                        sum[0] += u32::from(p[0]);
                        sum[1] += u32::from(p[1]);
                        sum[2] += u32::from(p[2]);
                        count += 1;
                    }
                    if count > 0 {
                        output.put_pixel(
                            x,
                            y,
                            image::Rgb([
                                (sum[0] / count) as u8,
                                (sum[1] / count) as u8,
                                (sum[2] / count) as u8,
                            ]),
                        );
                    }
                }
            }
        }

        output
    }
}

/// 8-connected neighborhood clipped to the frame
fn neighbors(x: u32, y: u32, width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
    let (x, y) = (i64::from(x), i64::from(y));
    [
        (-1, -1),
        (0, -1),
        (1, -1),
        (-1, 0),
        (1, 0),
        (-1, 1),
        (0, 1),
        (1, 1),
    ]
    .into_iter()
    .filter_map(move |(dx, dy)| {
        let (nx, ny) = (x + dx, y + dy);
        if nx >= 0 && ny >= 0 && nx < i64::from(width) && ny < i64::from(height) {
            Some((nx as u32, ny as u32))
        } else {
            None
        }
    })
}

#[async_trait]
impl InferenceEngine for DiffusionInpaintBackend {
    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn repair(&self, frame: &VideoFrame, mask: &RegionMask) -> Result<VideoFrame> {
        if (frame.width(), frame.height()) != (mask.width, mask.height) {
            return Err(WmRemovalError::inference(format!(
                "mask {}x{} does not match frame {}x{}",
                mask.width,
                mask.height,
                frame.width(),
                frame.height()
            )));
        }

        let image = frame.image.clone();
        let mask = mask.clone();
        let filled = tokio::task::spawn_blocking(move || Self::fill(&image, &mask))
            .await
            .map_err(|e| WmRemovalError::inference(format!("fill task panicked: {e}")))?;

        Ok(VideoFrame::new(filled, frame.index, frame.timestamp))
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "diffusion-fill"
    }
}
