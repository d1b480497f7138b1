use rayon::prelude::*;

use super::{check_buffers, pixel_count, INVALID_DISP_8};
use crate::{Device, DeviceBuffer, Error, Pixel, Result};

/// Left/right consistency check.
///
/// A left disparity `d` at `(x, y)` survives only if the right map holds a
/// disparity within one of `d` at `(x - d, y)` and the left source pixel is
/// non-zero. Everything else is overwritten with [`INVALID_DISP_8`] in place.
pub fn check_consistency(
    device: &Device,
    left_disp: &mut DeviceBuffer,
    right_disp: &DeviceBuffer,
    src_left: &DeviceBuffer,
    width: usize,
    height: usize,
    depth_bits: u32,
) -> Result<()> {
    check_buffers(device, &[&*left_disp, right_disp, src_left])?;
    match depth_bits {
        8 => check_typed::<u8>(device, left_disp, right_disp, src_left, width, height),
        16 => check_typed::<u16>(device, left_disp, right_disp, src_left, width, height),
        other => Err(Error::not_supported(format!(
            "consistency check for {other}-bit source images"
        ))),
    }
}

fn check_typed<P: Pixel>(
    device: &Device,
    left_disp: &mut DeviceBuffer,
    right_disp: &DeviceBuffer,
    src_left: &DeviceBuffer,
    width: usize,
    height: usize,
) -> Result<()> {
    let n = pixel_count(width, height)?;
    let left = left_disp.view_mut::<u8>(n)?;
    let right = right_disp.view::<u8>(n)?;
    let src = src_left.view::<P>(n)?;

    device.launch(|| left_right_check(left, right, src, width));
    Ok(())
}

pub(crate) fn left_right_check<P: Pixel>(left: &mut [u8], right: &[u8], src: &[P], width: usize) {
    left.par_chunks_mut(width)
        .zip(right.par_chunks(width))
        .zip(src.par_chunks(width))
        .for_each(|((l_row, r_row), s_row)| {
            for x in 0..width {
                let d = l_row[x];
                if d == INVALID_DISP_8 {
                    continue;
                }
                let d = usize::from(d);
                let consistent = !s_row[x].is_zero()
                    && d <= x
                    && r_row[x - d] != INVALID_DISP_8
                    && usize::from(r_row[x - d]).abs_diff(d) <= 1;
                if !consistent {
                    l_row[x] = INVALID_DISP_8;
                }
            }
        });
}
