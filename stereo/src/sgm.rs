//! The stereo pipeline: match, median filter, consistency check, emit.

use std::time::Instant;

use cv_hal::kernels::{cast_8bit_16bit, check_consistency, median_filter, widen_disparity};
use cv_hal::{BufferLocation, Device, DeviceBuffer};
use image::{GrayImage, ImageBuffer, Luma};

use crate::config::{DepthBits, PipelineConfig, StereoConfig};
use crate::disparity::DisparityMap;
use crate::engine::MatchingEngine;
use crate::resources::{DeviceScratch, StereoResources};
use crate::{Error, Result};

/// An input image handed to [`StereoSgm::execute`].
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
    /// Raw pixel bytes in host memory (native-endian for 16-bit pixels).
    Host(&'a [u8]),
    Device(&'a DeviceBuffer),
}

impl<'a> Source<'a> {
    pub fn host16(pixels: &'a [u16]) -> Self {
        Source::Host(bytemuck::cast_slice(pixels))
    }

    pub fn location(&self) -> BufferLocation {
        match self {
            Source::Host(_) => BufferLocation::Host,
            Source::Device(_) => BufferLocation::Device,
        }
    }

    fn len(&self) -> usize {
        match self {
            Source::Host(bytes) => bytes.len(),
            Source::Device(buf) => buf.len(),
        }
    }
}

/// Where [`StereoSgm::execute`] writes the left disparity map.
#[derive(Debug)]
pub enum Destination<'a> {
    Host(&'a mut [u8]),
    Device(&'a mut DeviceBuffer),
}

impl<'a> Destination<'a> {
    pub fn host16(pixels: &'a mut [u16]) -> Self {
        Destination::Host(bytemuck::cast_slice_mut(pixels))
    }

    pub fn location(&self) -> BufferLocation {
        match self {
            Destination::Host(_) => BufferLocation::Host,
            Destination::Device(_) => BufferLocation::Device,
        }
    }

    fn len(&self) -> usize {
        match self {
            Destination::Host(bytes) => bytes.len(),
            Destination::Device(buf) => buf.len(),
        }
    }
}

/// How the filtered left map reaches the caller, fixed before any stage runs.
enum Finalize<'a> {
    /// The median stage already wrote into the caller's device buffer.
    Aliased(&'a mut DeviceBuffer),
    Widen(&'a mut DeviceBuffer),
    Download(&'a mut [u8]),
    WidenAndDownload(&'a mut [u8]),
}

impl<'a> Finalize<'a> {
    /// `dst` must already have passed the locality check against `config`.
    fn new(dst: Destination<'a>, config: &PipelineConfig) -> Self {
        debug_assert_eq!(dst.location(), config.inout.output_location());
        match dst {
            Destination::Device(buf) if config.aliases_output() => Finalize::Aliased(buf),
            Destination::Device(buf) => Finalize::Widen(buf),
            Destination::Host(bytes) => match config.output_depth {
                DepthBits::Eight => Finalize::Download(bytes),
                DepthBits::Sixteen => Finalize::WidenAndDownload(bytes),
            },
        }
    }
}

fn trace_stage(name: &'static str, start: Instant) {
    tracing::trace!(stage = name, elapsed_us = start.elapsed().as_micros() as u64, "stage done");
}

fn check_len(buffer: &'static str, actual: usize, required: usize) -> Result<()> {
    if actual < required {
        return Err(Error::BufferTooSmall {
            buffer,
            required,
            actual,
        });
    }
    Ok(())
}

fn check_location(buffer: &'static str, actual: BufferLocation, expected: BufferLocation) -> Result<()> {
    if actual != expected {
        return Err(Error::LocalityMismatch {
            buffer,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Semi-Global Matching stereo pipeline bound to one device.
///
/// Construction validates the configuration, selects the matching engine and
/// allocates all device scratch memory. [`execute`](Self::execute) then runs the
/// fixed pipeline on that memory and never allocates device buffers.
///
/// The matching kernel still needs working memory of its own (census
/// transforms, the `width * height * disparity_size` cost volume and the path
/// aggregation sums). That memory is host memory taken per call and is not
/// counted against the device budget; at 640x480 with 128 disparities it is
/// about 120 MB.
#[derive(Debug)]
pub struct StereoSgm {
    device: Device,
    config: PipelineConfig,
    resources: StereoResources,
}

impl StereoSgm {
    pub fn new(device: &Device, config: &StereoConfig) -> Result<Self> {
        let config = config.validate()?;
        let resources = StereoResources::new(device, &config)?;
        tracing::debug!(
            device = %device.id(),
            width = config.width,
            height = config.height,
            disparity_size = config.disparity_size.count(),
            input_bits = config.input_depth.bits(),
            output_bits = config.output_depth.bits(),
            inout = ?config.inout,
            "stereo pipeline created"
        );
        Ok(Self {
            device: device.clone(),
            config,
            resources,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Number of device buffers held by this pipeline.
    pub fn buffer_count(&self) -> usize {
        self.resources.buffer_count()
    }

    pub fn engine(&self) -> &dyn MatchingEngine {
        &self.resources.engine
    }

    /// Compute the left disparity map of `left`/`right` into `dst`.
    ///
    /// Sources hold `width * height` pixels at the input depth and `dst` room for
    /// as many pixels at the output depth. Their residency must match the
    /// configured [`ExecuteInOut`](crate::ExecuteInOut). On error the contents of
    /// `dst` are unspecified.
    pub fn execute(&mut self, left: Source<'_>, right: Source<'_>, dst: Destination<'_>) -> Result<()> {
        let config = self.config;
        let _span = tracing::debug_span!("stereo_sgm_execute", width = config.width, height = config.height)
            .entered();

        let input_location = config.inout.input_location();
        check_location("left", left.location(), input_location)?;
        check_location("right", right.location(), input_location)?;
        check_location("destination", dst.location(), config.inout.output_location())?;
        check_len("left", left.len(), config.input_bytes())?;
        check_len("right", right.len(), config.input_bytes())?;
        check_len("destination", dst.len(), config.output_bytes())?;

        let device = &self.device;
        let StereoResources { engine, scratch } = &mut self.resources;
        let DeviceScratch {
            src_left,
            src_right,
            left_disp,
            right_disp,
            tmp_left_disp,
            tmp_right_disp,
        } = scratch;

        let (w, h, n) = (config.width, config.height, config.pixel_count());
        let mut finalize = Finalize::new(dst, &config);

        let t = Instant::now();
        let src_l = stage_source(device, "left", left, src_left.as_mut(), config.input_bytes())?;
        let src_r = stage_source(device, "right", right, src_right.as_mut(), config.input_bytes())?;
        trace_stage("stage_input", t);

        let t = Instant::now();
        engine.execute(device, left_disp, right_disp, src_l, src_r, w, h, &config.params)?;
        trace_stage("match", t);

        let t = Instant::now();
        let left_target: &mut DeviceBuffer = match &mut finalize {
            Finalize::Aliased(buf) => &mut **buf,
            _ => &mut *tmp_left_disp,
        };
        median_filter(device, left_disp, left_target, w, h)?;
        median_filter(device, right_disp, tmp_right_disp, w, h)?;
        trace_stage("median", t);

        let t = Instant::now();
        check_consistency(device, left_target, tmp_right_disp, src_l, w, h, config.input_depth.bits())?;
        trace_stage("consistency", t);

        let t = Instant::now();
        match finalize {
            Finalize::Aliased(_) => {}
            Finalize::Widen(buf) => cast_8bit_16bit(device, tmp_left_disp, buf, n)?,
            Finalize::Download(bytes) => device.download(tmp_left_disp, &mut bytes[..n])?,
            Finalize::WidenAndDownload(bytes) => {
                // the raw left map is no longer needed and has room for 16 bits per pixel
                cast_8bit_16bit(device, tmp_left_disp, left_disp, n)?;
                device.download(left_disp, &mut bytes[..2 * n])?;
            }
        }
        trace_stage("finalize", t);
        Ok(())
    }

    /// Run the pipeline on 8-bit host images and collect the result.
    pub fn compute_gray(&mut self, left: &GrayImage, right: &GrayImage) -> Result<DisparityMap> {
        self.check_image_input(DepthBits::Eight, left.dimensions(), right.dimensions())?;
        self.compute_host(Source::Host(left.as_raw()), Source::Host(right.as_raw()))
    }

    /// Run the pipeline on 16-bit host images and collect the result.
    pub fn compute_gray16(
        &mut self,
        left: &ImageBuffer<Luma<u16>, Vec<u16>>,
        right: &ImageBuffer<Luma<u16>, Vec<u16>>,
    ) -> Result<DisparityMap> {
        self.check_image_input(DepthBits::Sixteen, left.dimensions(), right.dimensions())?;
        self.compute_host(Source::host16(left.as_raw()), Source::host16(right.as_raw()))
    }

    fn check_image_input(&self, depth: DepthBits, left: (u32, u32), right: (u32, u32)) -> Result<()> {
        if depth != self.config.input_depth {
            return Err(Error::PixelDepthMismatch {
                expected: self.config.input_depth,
                actual: depth,
            });
        }
        let expected = (self.config.width as u32, self.config.height as u32);
        if left != expected || right != expected {
            return Err(Error::DimensionMismatch(format!(
                "pipeline expects {}x{} images, got {}x{} and {}x{}",
                expected.0, expected.1, left.0, left.1, right.0, right.1
            )));
        }
        check_location("left", BufferLocation::Host, self.config.inout.input_location())?;
        check_location("destination", BufferLocation::Host, self.config.inout.output_location())
    }

    fn compute_host(&mut self, left: Source<'_>, right: Source<'_>) -> Result<DisparityMap> {
        let n = self.config.pixel_count();
        let data = match self.config.output_depth {
            DepthBits::Eight => {
                let mut out = vec![0u8; n];
                self.execute(left, right, Destination::Host(&mut out))?;
                out.into_iter().map(widen_disparity).collect()
            }
            DepthBits::Sixteen => {
                let mut out = vec![0u16; n];
                self.execute(left, right, Destination::host16(&mut out))?;
                out
            }
        };
        Ok(DisparityMap::new(
            self.config.width as u32,
            self.config.height as u32,
            self.config.disparity_size.count(),
            data,
        ))
    }
}

/// Make `source` available on the device, uploading host data into `staging`.
fn stage_source<'a>(
    device: &Device,
    name: &'static str,
    source: Source<'a>,
    staging: Option<&'a mut DeviceBuffer>,
    bytes: usize,
) -> Result<&'a DeviceBuffer> {
    match (source, staging) {
        (Source::Host(data), Some(buf)) => {
            device.upload(buf, &data[..bytes])?;
            Ok(buf)
        }
        (Source::Device(buf), None) => Ok(buf),
        (source, staging) => Err(Error::LocalityMismatch {
            buffer: name,
            expected: if staging.is_some() {
                BufferLocation::Host
            } else {
                BufferLocation::Device
            },
            actual: source.location(),
        }),
    }
}
