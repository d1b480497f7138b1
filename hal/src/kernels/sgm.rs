//! Semi-Global Matching kernel.
//!
//! Matching cost is the Hamming distance between 9x7 census signatures. Costs
//! are aggregated along eight scanline directions with the usual P1/P2 smoothness
//! terms and both disparity maps are read out of the same aggregated volume with
//! a winner-take-all search and a uniqueness test.

use rayon::prelude::*;

use super::{check_buffers, pixel_count, INVALID_DISP_8};
use crate::{Device, DeviceBuffer, Error, Pixel, Result};

const CENSUS_WIDTH: usize = 9;
const CENSUS_HEIGHT: usize = 7;

/// Cost assigned where `x - d` falls outside the right image.
const OUT_OF_RANGE_COST: u8 = (CENSUS_WIDTH * CENSUS_HEIGHT - 1) as u8;

/// Aggregation directions `(dx, dy)`.
const PATHS: [(isize, isize); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (-1, 1),
    (1, -1),
    (-1, -1),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SgmParams {
    /// Penalty for a disparity change of one between neighbours.
    pub p1: u32,
    /// Penalty for larger disparity changes.
    pub p2: u32,
    /// A match is kept only if `best <= uniqueness * second_best`.
    pub uniqueness: f32,
}

impl Default for SgmParams {
    fn default() -> Self {
        Self {
            p1: 10,
            p2: 120,
            uniqueness: 0.95,
        }
    }
}

/// Compute left- and right-reference disparity maps of a rectified pair.
///
/// `src_left`/`src_right` hold `width * height` pixels of type `P`. Each output
/// receives one byte per pixel: a disparity in `0..DISP` or [`INVALID_DISP_8`].
#[allow(clippy::too_many_arguments)]
pub fn semi_global_matching<P: Pixel, const DISP: usize>(
    device: &Device,
    src_left: &DeviceBuffer,
    src_right: &DeviceBuffer,
    dst_left: &mut DeviceBuffer,
    dst_right: &mut DeviceBuffer,
    width: usize,
    height: usize,
    params: &SgmParams,
) -> Result<()> {
    check_buffers(device, &[src_left, src_right, &*dst_left, &*dst_right])?;
    if DISP == 0 || DISP >= usize::from(INVALID_DISP_8) {
        return Err(Error::not_supported(format!("{DISP} disparities")));
    }
    let n = pixel_count(width, height)?;
    let left = src_left.view::<P>(n)?;
    let right = src_right.view::<P>(n)?;
    let out_left = dst_left.view_mut::<u8>(n)?;
    let out_right = dst_right.view_mut::<u8>(n)?;

    device.launch(|| {
        let census_left = census_transform(left, width, height);
        let census_right = census_transform(right, width, height);
        let cost = matching_cost::<DISP>(&census_left, &census_right, width);
        let aggregated = aggregate::<DISP>(&cost, width, height, params.p1, params.p2);
        winner_takes_all::<DISP>(&aggregated, width, params.uniqueness, out_left, out_right);
    });
    Ok(())
}

fn census_transform<P: Pixel>(src: &[P], width: usize, height: usize) -> Vec<u64> {
    let (rx, ry) = (CENSUS_WIDTH / 2, CENSUS_HEIGHT / 2);
    let mut out = vec![0u64; src.len()];
    out.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        for (x, signature) in row.iter_mut().enumerate() {
            let center = src[y * width + x];
            let mut bits = 0u64;
            for wy in 0..CENSUS_HEIGHT {
                for wx in 0..CENSUS_WIDTH {
                    if wx == rx && wy == ry {
                        continue;
                    }
                    let sy = (y + wy).checked_sub(ry).filter(|&sy| sy < height);
                    let sx = (x + wx).checked_sub(rx).filter(|&sx| sx < width);
                    let bit = match (sx, sy) {
                        (Some(sx), Some(sy)) => center > src[sy * width + sx],
                        _ => false,
                    };
                    bits = (bits << 1) | u64::from(bit);
                }
            }
            *signature = bits;
        }
    });
    out
}

/// Per-pixel, per-disparity Hamming costs laid out as `[(y * width + x) * DISP + d]`.
fn matching_cost<const DISP: usize>(left: &[u64], right: &[u64], width: usize) -> Vec<u8> {
    let mut cost = vec![0u8; left.len() * DISP];
    cost.par_chunks_mut(width * DISP)
        .enumerate()
        .for_each(|(y, row)| {
            let l_row = &left[y * width..(y + 1) * width];
            let r_row = &right[y * width..(y + 1) * width];
            for (x, costs) in row.chunks_exact_mut(DISP).enumerate() {
                for (d, c) in costs.iter_mut().enumerate() {
                    *c = if d <= x {
                        (l_row[x] ^ r_row[x - d]).count_ones() as u8
                    } else {
                        OUT_OF_RANGE_COST
                    };
                }
            }
        });
    cost
}

/// One step of the path recurrence:
/// `Lr(p, d) = C(p, d) + min(Lr(p-r, d), Lr(p-r, d±1) + P1, min_k Lr(p-r, k) + P2) - min_k Lr(p-r, k)`.
#[inline]
fn path_step(cost: &[u8], prev: &[u16], out: &mut [u16], p1: u32, p2: u32) {
    let prev_min = u32::from(prev.iter().copied().min().unwrap_or(0));
    // penalties may be as large as u32::MAX; best stays <= prev[d] <= u16::MAX
    let jump = prev_min.saturating_add(p2);
    let last = out.len() - 1;
    for (d, o) in out.iter_mut().enumerate() {
        let mut best = u32::from(prev[d]).min(jump);
        if d > 0 {
            best = best.min(u32::from(prev[d - 1]).saturating_add(p1));
        }
        if d < last {
            best = best.min(u32::from(prev[d + 1]).saturating_add(p1));
        }
        let lr = u32::from(cost[d]) + best - prev_min;
        *o = lr.min(u32::from(u16::MAX)) as u16;
    }
}

#[inline]
fn path_start(cost: &[u8], out: &mut [u16]) {
    for (o, &c) in out.iter_mut().zip(cost) {
        *o = u16::from(c);
    }
}

#[inline]
fn accumulate(sum: &mut [u16], lr: &[u16]) {
    for (s, &l) in sum.iter_mut().zip(lr) {
        *s = s.saturating_add(l);
    }
}

/// Sum of the path costs over all directions, saturating at `u16::MAX`.
fn aggregate<const DISP: usize>(cost: &[u8], width: usize, height: usize, p1: u32, p2: u32) -> Vec<u16> {
    let row_len = width * DISP;
    let mut sum = vec![0u16; cost.len()];

    for &(dx, dy) in &PATHS {
        if dy == 0 {
            // rows are independent
            sum.par_chunks_mut(row_len)
                .zip(cost.par_chunks(row_len))
                .for_each(|(sum_row, cost_row)| {
                    let mut prev = [0u16; DISP];
                    let mut cur = [0u16; DISP];
                    for step in 0..width {
                        let x = if dx > 0 { step } else { width - 1 - step };
                        let c = &cost_row[x * DISP..(x + 1) * DISP];
                        if step == 0 {
                            path_start(c, &mut cur);
                        } else {
                            path_step(c, &prev, &mut cur, p1, p2);
                        }
                        accumulate(&mut sum_row[x * DISP..(x + 1) * DISP], &cur);
                        std::mem::swap(&mut prev, &mut cur);
                    }
                });
            continue;
        }

        // each row depends on the previous one along the path; pixels within a row do not
        let mut prev_row = vec![0u16; row_len];
        let mut cur_row = vec![0u16; row_len];
        for step in 0..height {
            let y = if dy > 0 { step } else { height - 1 - step };
            let cost_row = &cost[y * row_len..(y + 1) * row_len];
            let sum_row = &mut sum[y * row_len..(y + 1) * row_len];
            let prev = &prev_row;
            cur_row
                .par_chunks_mut(DISP)
                .zip(sum_row.par_chunks_mut(DISP))
                .enumerate()
                .for_each(|(x, (cur, sum_px))| {
                    let c = &cost_row[x * DISP..(x + 1) * DISP];
                    let px = x as isize - dx;
                    if step == 0 || px < 0 || px >= width as isize {
                        path_start(c, cur);
                    } else {
                        let px = px as usize;
                        path_step(c, &prev[px * DISP..(px + 1) * DISP], cur, p1, p2);
                    }
                    accumulate(sum_px, cur);
                });
            std::mem::swap(&mut prev_row, &mut cur_row);
        }
    }

    sum
}

/// Best disparity among `candidates` or `INVALID_DISP_8` when ambiguous.
///
/// Costs at disparities adjacent to the winner do not count as competitors.
#[inline]
fn select(candidates: impl Iterator<Item = (usize, u16)> + Clone, uniqueness: f32) -> u8 {
    let mut best_d = 0usize;
    let mut best_cost = u16::MAX;
    let mut found = false;
    for (d, c) in candidates.clone() {
        if !found || c < best_cost {
            best_d = d;
            best_cost = c;
            found = true;
        }
    }
    if !found {
        return INVALID_DISP_8;
    }

    let unique = candidates
        .filter(|&(d, _)| d.abs_diff(best_d) > 1)
        .all(|(_, c)| f32::from(c) * uniqueness >= f32::from(best_cost));
    if unique {
        best_d as u8
    } else {
        INVALID_DISP_8
    }
}

fn winner_takes_all<const DISP: usize>(
    aggregated: &[u16],
    width: usize,
    uniqueness: f32,
    out_left: &mut [u8],
    out_right: &mut [u8],
) {
    let row_len = width * DISP;
    out_left
        .par_chunks_mut(width)
        .zip(out_right.par_chunks_mut(width))
        .zip(aggregated.par_chunks(row_len))
        .for_each(|((left_row, right_row), agg_row)| {
            for x in 0..width {
                let costs = &agg_row[x * DISP..(x + 1) * DISP];
                let reachable = DISP.min(x + 1);
                left_row[x] = select(costs[..reachable].iter().copied().enumerate(), uniqueness);

                // right pixel x sees left pixel x + d at disparity d
                let reachable = DISP.min(width - x);
                right_row[x] = select(
                    (0..reachable).map(|d| (d, agg_row[(x + d) * DISP + d])),
                    uniqueness,
                );
            }
        });
}
