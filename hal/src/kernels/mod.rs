//! Device kernels of the stereo pipeline.
//!
//! Every kernel validates that its buffers belong to the launching device and
//! are large enough for the requested image before touching memory, then runs
//! its body on the device's worker pool.

pub mod cast;
pub mod consistency;
pub mod median;
pub mod sgm;

use crate::{Device, DeviceBuffer, Error, Result};

/// Marks an 8-bit disparity that has no trustworthy match.
pub const INVALID_DISP_8: u8 = u8::MAX;

/// 16-bit counterpart of [`INVALID_DISP_8`].
pub const INVALID_DISP_16: u16 = u16::MAX;

pub use cast::{cast_8bit_16bit, widen_disparity};
pub use consistency::check_consistency;
pub use median::median_filter;
pub use sgm::{semi_global_matching, SgmParams};

pub(crate) fn pixel_count(width: usize, height: usize) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidInput(format!(
            "image dimensions must be non-zero, got {width}x{height}"
        )));
    }
    width
        .checked_mul(height)
        .ok_or_else(|| Error::InvalidInput(format!("image of {width}x{height} pixels overflows")))
}

pub(crate) fn check_buffers(device: &Device, buffers: &[&DeviceBuffer]) -> Result<()> {
    buffers.iter().try_for_each(|b| device.check_owned(b))
}
