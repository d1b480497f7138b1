use rayon::prelude::*;

use super::{check_buffers, pixel_count, INVALID_DISP_8};
use crate::{Device, DeviceBuffer, Result};

/// 3x3 median filter over an 8-bit disparity map.
///
/// Border pixels are copied unchanged. An invalid pixel stays invalid, so the
/// filter never turns a rejected match into an accepted one.
pub fn median_filter(
    device: &Device,
    src: &DeviceBuffer,
    dst: &mut DeviceBuffer,
    width: usize,
    height: usize,
) -> Result<()> {
    check_buffers(device, &[src, &*dst])?;
    let n = pixel_count(width, height)?;
    let src = src.view::<u8>(n)?;
    let dst = dst.view_mut::<u8>(n)?;

    device.launch(|| median_3x3(src, dst, width, height));
    Ok(())
}

pub(crate) fn median_3x3(src: &[u8], dst: &mut [u8], width: usize, height: usize) {
    dst.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        for (x, out) in row.iter_mut().enumerate() {
            let center = src[y * width + x];
            if center == INVALID_DISP_8 || x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                *out = center;
                continue;
            }

            let mut window = [0u8; 9];
            for (k, v) in window.iter_mut().enumerate() {
                let sy = y + k / 3 - 1;
                let sx = x + k % 3 - 1;
                *v = src[sy * width + sx];
            }
            window.sort_unstable();
            *out = window[4];
        }
    });
}
