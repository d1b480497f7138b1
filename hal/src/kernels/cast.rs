use rayon::prelude::*;

use super::{check_buffers, INVALID_DISP_16, INVALID_DISP_8};
use crate::{Device, DeviceBuffer, Result};

/// Widen one disparity, keeping the value of valid disparities.
#[inline]
pub fn widen_disparity(value: u8) -> u16 {
    if value == INVALID_DISP_8 {
        INVALID_DISP_16
    } else {
        u16::from(value)
    }
}

/// Widen `count` 8-bit disparities of `src` into `dst`.
pub fn cast_8bit_16bit(
    device: &Device,
    src: &DeviceBuffer,
    dst: &mut DeviceBuffer,
    count: usize,
) -> Result<()> {
    check_buffers(device, &[src, &*dst])?;
    let src = src.view::<u8>(count)?;
    let dst = dst.view_mut::<u16>(count)?;

    device.launch(|| {
        dst.par_chunks_mut(4096)
            .zip(src.par_chunks(4096))
            .for_each(|(out, input)| {
                for (o, &v) in out.iter_mut().zip(input) {
                    *o = widen_disparity(v);
                }
            });
    });
    Ok(())
}
