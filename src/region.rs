//! Watermark region validation and mask generation
//!
//! The user selects a rectangle on the preview frame in source-pixel
//! coordinates. Once validated against the frame bounds the region is fixed
//! for the whole video; the binary mask derived from it marks the pixels the
//! inference engine repaints.

use crate::error::{Result, WmRemovalError};
use serde::{Deserialize, Serialize};

/// A user-selected rectangle in source-frame pixel coordinates
///
/// Coordinates are signed so that out-of-bounds client input can be carried
/// to [`Region::validate`] instead of being silently clamped at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Region {
    /// Create a new region
    #[must_use]
    pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Validate this region against the frame dimensions
    ///
    /// Accepts exactly the regions satisfying `0 <= x`, `0 <= y`,
    /// `width > 0`, `height > 0`, `x + width <= frame_width`, and
    /// `y + height <= frame_height`.
    ///
    /// # Errors
    ///
    /// Returns `WmRemovalError::InvalidRegion` describing the violated bound.
    pub fn validate(self, frame_width: u32, frame_height: u32) -> Result<ValidatedRegion> {
        if self.width <= 0 || self.height <= 0 {
            return Err(WmRemovalError::invalid_region(format!(
                "region size {}x{} is degenerate",
                self.width, self.height
            )));
        }
        if self.x < 0 || self.y < 0 {
            return Err(WmRemovalError::invalid_region(format!(
                "region origin ({}, {}) is negative",
                self.x, self.y
            )));
        }
        if self.x + self.width > i64::from(frame_width) {
            return Err(WmRemovalError::invalid_region(format!(
                "region right edge {} exceeds frame width {}",
                self.x + self.width,
                frame_width
            )));
        }
        if self.y + self.height > i64::from(frame_height) {
            return Err(WmRemovalError::invalid_region(format!(
                "region bottom edge {} exceeds frame height {}",
                self.y + self.height,
                frame_height
            )));
        }

        Ok(ValidatedRegion {
            x: self.x as u32,
            y: self.y as u32,
            width: self.width as u32,
            height: self.height as u32,
            frame_width,
            frame_height,
        })
    }
}

/// A region checked against the frame bounds, immutable once produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Width of the frames this region was validated against
    pub frame_width: u32,
    /// Height of the frames this region was validated against
    pub frame_height: u32,
}

impl ValidatedRegion {
    /// Render the binary mask for one frame
    ///
    /// All frames of a video share the source dimensions, so the mask is
    /// identical for every frame of a run.
    #[must_use]
    pub fn to_mask(&self) -> RegionMask {
        let mut data = vec![0u8; (self.frame_width * self.frame_height) as usize];
        for y in self.y..self.y + self.height {
            let row = (y * self.frame_width) as usize;
            for x in self.x..self.x + self.width {
                data[row + x as usize] = 255;
            }
        }
        RegionMask {
            width: self.frame_width,
            height: self.frame_height,
            data,
        }
    }

    /// Number of pixels inside the region
    #[must_use]
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Binary mask of frame dimensions; 255 marks pixels to be repainted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMask {
    pub width: u32,
    pub height: u32,
    /// Row-major mask values, one byte per pixel (0 or 255)
    pub data: Vec<u8>,
}

impl RegionMask {
    /// Whether the pixel at (x, y) is inside the repaint region
    #[must_use]
    pub fn is_masked(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.data[(y * self.width + x) as usize] != 0
    }

    /// Number of masked pixels
    #[must_use]
    pub fn masked_pixels(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }
}
