use cv_hal::INVALID_DISP_16;
use image::{GrayImage, Luma};

/// Host copy of a left disparity map.
///
/// Values are disparities in pixels; [`INVALID_DISP_16`] marks pixels without a
/// trustworthy match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisparityMap {
    pub data: Vec<u16>,
    pub width: u32,
    pub height: u32,
    pub disparity_size: u32,
}

impl DisparityMap {
    pub fn new(width: u32, height: u32, disparity_size: u32, data: Vec<u16>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self {
            data,
            width,
            height,
            disparity_size,
        }
    }

    /// Disparity at `(x, y)`, or `None` outside the image and for invalid pixels.
    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = y as usize * self.width as usize + x as usize;
        self.data.get(idx).copied().filter(|&d| d != INVALID_DISP_16)
    }

    pub fn is_valid(&self, x: u32, y: u32) -> bool {
        self.get(x, y).is_some()
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|&&d| d != INVALID_DISP_16).count()
    }

    /// Convert to a grayscale image for visualization.
    ///
    /// Disparities are scaled to the full 8-bit range; invalid pixels are black.
    pub fn to_image(&self) -> GrayImage {
        let max = self.disparity_size.saturating_sub(1).max(1);
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let value = self
                .get(x, y)
                .map_or(0, |d| (u32::from(d).min(max) * 255 / max) as u8);
            Luma([value])
        })
    }
}
