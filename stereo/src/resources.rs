use cv_hal::{BufferLocation, Device, DeviceBuffer};

use crate::config::PipelineConfig;
use crate::engine::EngineVariant;
use crate::Result;

/// Device scratch memory of one pipeline.
///
/// Every disparity buffer holds two bytes per pixel: the matcher and filters
/// use the first half as an 8-bit map, and the final stage reuses
/// `left_disp` as the 16-bit widening target.
#[derive(Debug)]
pub struct DeviceScratch {
    /// Staged input pair; absent when the caller supplies device input.
    pub src_left: Option<DeviceBuffer>,
    pub src_right: Option<DeviceBuffer>,
    /// Raw matcher output.
    pub left_disp: DeviceBuffer,
    pub right_disp: DeviceBuffer,
    /// Median-filtered maps.
    pub tmp_left_disp: DeviceBuffer,
    pub tmp_right_disp: DeviceBuffer,
}

impl DeviceScratch {
    fn allocate(device: &Device, config: &PipelineConfig) -> Result<Self> {
        // `?` drops whatever was already allocated on failure
        let (src_left, src_right) = match config.inout.input_location() {
            BufferLocation::Host => (
                Some(device.alloc_zeroed(config.input_bytes())?),
                Some(device.alloc_zeroed(config.input_bytes())?),
            ),
            BufferLocation::Device => (None, None),
        };
        let disp_bytes = config.pixel_count() * std::mem::size_of::<u16>();
        Ok(Self {
            src_left,
            src_right,
            left_disp: device.alloc_zeroed(disp_bytes)?,
            right_disp: device.alloc_zeroed(disp_bytes)?,
            tmp_left_disp: device.alloc_zeroed(disp_bytes)?,
            tmp_right_disp: device.alloc_zeroed(disp_bytes)?,
        })
    }

    pub fn buffer_count(&self) -> usize {
        4 + usize::from(self.src_left.is_some()) + usize::from(self.src_right.is_some())
    }

    pub fn total_bytes(&self) -> usize {
        [&self.src_left, &self.src_right]
            .into_iter()
            .flatten()
            .chain([
                &self.left_disp,
                &self.right_disp,
                &self.tmp_left_disp,
                &self.tmp_right_disp,
            ])
            .map(DeviceBuffer::len)
            .sum()
    }
}

/// The selected engine together with the scratch memory it runs on.
///
/// Built once per pipeline; dropping it returns every buffer to the device.
#[derive(Debug)]
pub struct StereoResources {
    pub engine: EngineVariant,
    pub scratch: DeviceScratch,
}

impl StereoResources {
    pub fn new(device: &Device, config: &PipelineConfig) -> Result<Self> {
        let engine = EngineVariant::select(config.input_depth, config.disparity_size);
        let scratch = DeviceScratch::allocate(device, config)?;
        tracing::debug!(
            device = %device.id(),
            buffers = scratch.buffer_count(),
            bytes = scratch.total_bytes(),
            ?engine,
            "stereo resources allocated"
        );
        Ok(Self { engine, scratch })
    }

    pub fn buffer_count(&self) -> usize {
        self.scratch.buffer_count()
    }
}
