//! Dense matching engines and the selector that picks one per pipeline.

use std::marker::PhantomData;

use cv_hal::kernels::{semi_global_matching, SgmParams};
use cv_hal::{Device, DeviceBuffer, Pixel};

use crate::config::{DepthBits, DisparitySize, Parameters};
use crate::Result;

/// A matcher producing raw 8-bit left and right disparity maps.
pub trait MatchingEngine {
    /// Pixel depth of the sources the engine reads.
    fn input_depth(&self) -> DepthBits;

    /// Number of disparities searched.
    fn disparity_size(&self) -> DisparitySize;

    #[allow(clippy::too_many_arguments)]
    fn execute(
        &self,
        device: &Device,
        dst_left: &mut DeviceBuffer,
        dst_right: &mut DeviceBuffer,
        src_left: &DeviceBuffer,
        src_right: &DeviceBuffer,
        width: usize,
        height: usize,
        params: &Parameters,
    ) -> Result<()>;
}

/// Semi-Global Matching specialised for pixel type `P` and `DISP` disparities.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemiGlobalMatching<P, const DISP: usize> {
    _pixel: PhantomData<P>,
}

impl<P: Pixel, const DISP: usize> SemiGlobalMatching<P, DISP> {
    pub fn new() -> Self {
        Self {
            _pixel: PhantomData,
        }
    }
}

impl<P: Pixel, const DISP: usize> MatchingEngine for SemiGlobalMatching<P, DISP> {
    fn input_depth(&self) -> DepthBits {
        if P::BITS == 8 {
            DepthBits::Eight
        } else {
            DepthBits::Sixteen
        }
    }

    fn disparity_size(&self) -> DisparitySize {
        if DISP == 64 {
            DisparitySize::D64
        } else {
            DisparitySize::D128
        }
    }

    fn execute(
        &self,
        device: &Device,
        dst_left: &mut DeviceBuffer,
        dst_right: &mut DeviceBuffer,
        src_left: &DeviceBuffer,
        src_right: &DeviceBuffer,
        width: usize,
        height: usize,
        params: &Parameters,
    ) -> Result<()> {
        let params = SgmParams {
            p1: params.p1,
            p2: params.p2,
            uniqueness: params.uniqueness,
        };
        semi_global_matching::<P, DISP>(
            device, src_left, src_right, dst_left, dst_right, width, height, &params,
        )?;
        Ok(())
    }
}

/// The four specialised engines. Selected once when a pipeline is built; each
/// call dispatches with a single match and then runs fully monomorphised code.
#[derive(Debug, Clone, Copy)]
pub enum EngineVariant {
    U8D64(SemiGlobalMatching<u8, 64>),
    U8D128(SemiGlobalMatching<u8, 128>),
    U16D64(SemiGlobalMatching<u16, 64>),
    U16D128(SemiGlobalMatching<u16, 128>),
}

impl EngineVariant {
    pub fn select(input_depth: DepthBits, disparity_size: DisparitySize) -> Self {
        match (input_depth, disparity_size) {
            (DepthBits::Eight, DisparitySize::D64) => EngineVariant::U8D64(SemiGlobalMatching::new()),
            (DepthBits::Eight, DisparitySize::D128) => {
                EngineVariant::U8D128(SemiGlobalMatching::new())
            }
            (DepthBits::Sixteen, DisparitySize::D64) => {
                EngineVariant::U16D64(SemiGlobalMatching::new())
            }
            (DepthBits::Sixteen, DisparitySize::D128) => {
                EngineVariant::U16D128(SemiGlobalMatching::new())
            }
        }
    }
}

impl MatchingEngine for EngineVariant {
    fn input_depth(&self) -> DepthBits {
        match self {
            EngineVariant::U8D64(_) | EngineVariant::U8D128(_) => DepthBits::Eight,
            EngineVariant::U16D64(_) | EngineVariant::U16D128(_) => DepthBits::Sixteen,
        }
    }

    fn disparity_size(&self) -> DisparitySize {
        match self {
            EngineVariant::U8D64(_) | EngineVariant::U16D64(_) => DisparitySize::D64,
            EngineVariant::U8D128(_) | EngineVariant::U16D128(_) => DisparitySize::D128,
        }
    }

    fn execute(
        &self,
        device: &Device,
        dst_left: &mut DeviceBuffer,
        dst_right: &mut DeviceBuffer,
        src_left: &DeviceBuffer,
        src_right: &DeviceBuffer,
        width: usize,
        height: usize,
        params: &Parameters,
    ) -> Result<()> {
        match self {
            EngineVariant::U8D64(e) => {
                e.execute(device, dst_left, dst_right, src_left, src_right, width, height, params)
            }
            EngineVariant::U8D128(e) => {
                e.execute(device, dst_left, dst_right, src_left, src_right, width, height, params)
            }
            EngineVariant::U16D64(e) => {
                e.execute(device, dst_left, dst_right, src_left, src_right, width, height, params)
            }
            EngineVariant::U16D128(e) => {
                e.execute(device, dst_left, dst_right, src_left, src_right, width, height, params)
            }
        }
    }
}
