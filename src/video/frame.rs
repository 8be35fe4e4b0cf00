//! Video frame representation

use image::RgbImage;
use std::time::Duration;

/// A single decoded video frame
///
/// Frames carry their raster in RGB, the zero-based index in decode order,
/// and the presentation timestamp derived from the stream time base.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame raster in RGB
    pub image: RgbImage,
    /// Zero-based index in decode order
    pub index: u64,
    /// Presentation timestamp
    pub timestamp: Duration,
}

impl VideoFrame {
    /// Create a new video frame
    #[must_use]
    pub fn new(image: RgbImage, index: u64, timestamp: Duration) -> Self {
        Self {
            image,
            index,
            timestamp,
        }
    }

    /// Frame width in pixels
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Frame height in pixels
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Raw RGB bytes in row-major order
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Size of the raster in bytes
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.image.as_raw().len()
    }
}
