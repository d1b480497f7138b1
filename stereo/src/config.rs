//! Pipeline configuration.
//!
//! [`StereoConfig`] is the raw, builder-style description a caller assembles.
//! [`StereoConfig::validate`] turns it into a [`PipelineConfig`] whose fields can
//! only hold supported values; everything downstream works on the validated form.

use std::fmt;

use cv_hal::BufferLocation;

/// Why a configuration was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("input depth must be 8 or 16 bits, got {0}")]
    UnsupportedInputDepth(u32),

    #[error("output depth must be 8 or 16 bits, got {0}")]
    UnsupportedOutputDepth(u32),

    #[error("disparity size must be 64 or 128, got {0}")]
    UnsupportedDisparitySize(u32),

    #[error("image dimensions must be non-zero, got {width}x{height}")]
    EmptyImage { width: u32, height: u32 },

    #[error("penalties must satisfy 0 < P1 < P2, got P1={p1} P2={p2}")]
    InvalidPenalties { p1: u32, p2: u32 },

    #[error("uniqueness must be in (0, 1], got {0}")]
    InvalidUniqueness(f32),
}

/// Bit depth of a pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthBits {
    Eight,
    Sixteen,
}

impl DepthBits {
    pub fn bits(self) -> u32 {
        match self {
            DepthBits::Eight => 8,
            DepthBits::Sixteen => 16,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            DepthBits::Eight => 1,
            DepthBits::Sixteen => 2,
        }
    }
}

impl TryFrom<u32> for DepthBits {
    type Error = u32;

    fn try_from(bits: u32) -> Result<Self, u32> {
        match bits {
            8 => Ok(DepthBits::Eight),
            16 => Ok(DepthBits::Sixteen),
            other => Err(other),
        }
    }
}

impl fmt::Display for DepthBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Number of disparities searched per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisparitySize {
    D64,
    D128,
}

impl DisparitySize {
    pub fn count(self) -> u32 {
        match self {
            DisparitySize::D64 => 64,
            DisparitySize::D128 => 128,
        }
    }
}

impl TryFrom<u32> for DisparitySize {
    type Error = u32;

    fn try_from(size: u32) -> Result<Self, u32> {
        match size {
            64 => Ok(DisparitySize::D64),
            128 => Ok(DisparitySize::D128),
            other => Err(other),
        }
    }
}

/// Residency of the input pair and of the output map.
///
/// Encoded in two bits: bit 0 set means device input, bit 1 set means device
/// output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecuteInOut {
    #[default]
    HostToHost,
    DeviceToHost,
    HostToDevice,
    DeviceToDevice,
}

impl ExecuteInOut {
    pub const ALL: [ExecuteInOut; 4] = [
        ExecuteInOut::HostToHost,
        ExecuteInOut::DeviceToHost,
        ExecuteInOut::HostToDevice,
        ExecuteInOut::DeviceToDevice,
    ];

    pub fn new(input: BufferLocation, output: BufferLocation) -> Self {
        match (input, output) {
            (BufferLocation::Host, BufferLocation::Host) => ExecuteInOut::HostToHost,
            (BufferLocation::Device, BufferLocation::Host) => ExecuteInOut::DeviceToHost,
            (BufferLocation::Host, BufferLocation::Device) => ExecuteInOut::HostToDevice,
            (BufferLocation::Device, BufferLocation::Device) => ExecuteInOut::DeviceToDevice,
        }
    }

    /// Decode the two-bit form. Higher bits are ignored.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => ExecuteInOut::HostToHost,
            1 => ExecuteInOut::DeviceToHost,
            2 => ExecuteInOut::HostToDevice,
            _ => ExecuteInOut::DeviceToDevice,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            ExecuteInOut::HostToHost => 0,
            ExecuteInOut::DeviceToHost => 1,
            ExecuteInOut::HostToDevice => 2,
            ExecuteInOut::DeviceToDevice => 3,
        }
    }

    pub fn input_location(self) -> BufferLocation {
        if self.bits() & 0b01 != 0 {
            BufferLocation::Device
        } else {
            BufferLocation::Host
        }
    }

    pub fn output_location(self) -> BufferLocation {
        if self.bits() & 0b10 != 0 {
            BufferLocation::Device
        } else {
            BufferLocation::Host
        }
    }
}

/// Smoothness penalties and the uniqueness ratio of the matcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parameters {
    /// Penalty for a disparity change of one between neighbours.
    pub p1: u32,
    /// Penalty for larger disparity changes.
    pub p2: u32,
    /// A match is kept only if its cost is at most `uniqueness` times any
    /// competing cost.
    pub uniqueness: f32,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            p1: 10,
            p2: 120,
            uniqueness: 0.95,
        }
    }
}

impl Parameters {
    pub fn new(p1: u32, p2: u32, uniqueness: f32) -> Self {
        Self { p1, p2, uniqueness }
    }

    pub fn with_penalties(mut self, p1: u32, p2: u32) -> Self {
        self.p1 = p1;
        self.p2 = p2;
        self
    }

    pub fn with_uniqueness(mut self, uniqueness: f32) -> Self {
        self.uniqueness = uniqueness;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.p1 == 0 || self.p1 >= self.p2 {
            return Err(ConfigError::InvalidPenalties {
                p1: self.p1,
                p2: self.p2,
            });
        }
        // also rejects NaN
        if !(self.uniqueness > 0.0 && self.uniqueness <= 1.0) {
            return Err(ConfigError::InvalidUniqueness(self.uniqueness));
        }
        Ok(())
    }
}

/// Caller-facing description of a stereo pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoConfig {
    pub width: u32,
    pub height: u32,
    pub disparity_size: u32,
    pub input_depth_bits: u32,
    pub output_depth_bits: u32,
    pub inout: ExecuteInOut,
    pub params: Parameters,
}

impl StereoConfig {
    /// 128 disparities, 8-bit input and output, host buffers on both ends.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            disparity_size: 128,
            input_depth_bits: 8,
            output_depth_bits: 8,
            inout: ExecuteInOut::HostToHost,
            params: Parameters::default(),
        }
    }

    pub fn with_disparity_size(mut self, disparity_size: u32) -> Self {
        self.disparity_size = disparity_size;
        self
    }

    pub fn with_depths(mut self, input_bits: u32, output_bits: u32) -> Self {
        self.input_depth_bits = input_bits;
        self.output_depth_bits = output_bits;
        self
    }

    pub fn with_inout(mut self, inout: ExecuteInOut) -> Self {
        self.inout = inout;
        self
    }

    pub fn with_params(mut self, params: Parameters) -> Self {
        self.params = params;
        self
    }

    pub fn validate(&self) -> Result<PipelineConfig, ConfigError> {
        let input_depth = DepthBits::try_from(self.input_depth_bits)
            .map_err(ConfigError::UnsupportedInputDepth)?;
        let output_depth = DepthBits::try_from(self.output_depth_bits)
            .map_err(ConfigError::UnsupportedOutputDepth)?;
        let disparity_size = DisparitySize::try_from(self.disparity_size)
            .map_err(ConfigError::UnsupportedDisparitySize)?;
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::EmptyImage {
                width: self.width,
                height: self.height,
            });
        }
        self.params.validate()?;

        Ok(PipelineConfig {
            width: self.width as usize,
            height: self.height as usize,
            disparity_size,
            input_depth,
            output_depth,
            inout: self.inout,
            params: self.params,
        })
    }
}

/// A [`StereoConfig`] that passed validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub width: usize,
    pub height: usize,
    pub disparity_size: DisparitySize,
    pub input_depth: DepthBits,
    pub output_depth: DepthBits,
    pub inout: ExecuteInOut,
    pub params: Parameters,
}

impl PipelineConfig {
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn input_bytes(&self) -> usize {
        self.pixel_count() * self.input_depth.bytes_per_pixel()
    }

    pub fn output_bytes(&self) -> usize {
        self.pixel_count() * self.output_depth.bytes_per_pixel()
    }

    /// Whether the median stage writes the left map straight into the caller's
    /// destination.
    pub fn aliases_output(&self) -> bool {
        self.inout.output_location() == BufferLocation::Device
            && self.output_depth == DepthBits::Eight
    }
}
