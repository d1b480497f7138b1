//! Semi-Global Matching stereo pipeline.
//!
//! [`StereoSgm`] computes dense disparity maps from rectified 8- or 16-bit
//! image pairs on a [`cv_hal::Device`]. A pipeline is configured once with a
//! [`StereoConfig`], allocates its device scratch memory up front and then runs
//! match, median filter, left/right consistency check and output conversion on
//! every [`StereoSgm::execute`] call.
//!
//! ```no_run
//! use cv_hal::Device;
//! use cv_stereo::{Destination, Source, StereoConfig, StereoSgm};
//!
//! # fn main() -> cv_stereo::Result<()> {
//! let device = Device::cpu()?;
//! let config = StereoConfig::new(640, 480).with_disparity_size(64).with_depths(8, 16);
//! let mut sgm = StereoSgm::new(&device, &config)?;
//!
//! let left = vec![0u8; 640 * 480];
//! let right = vec![0u8; 640 * 480];
//! let mut disparity = vec![0u16; 640 * 480];
//! sgm.execute(Source::Host(&left), Source::Host(&right), Destination::host16(&mut disparity))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod disparity;
pub mod engine;
pub mod parallel;
pub mod resources;
pub mod sgm;

pub use config::{
    ConfigError, DepthBits, DisparitySize, ExecuteInOut, Parameters, PipelineConfig, StereoConfig,
};
pub use disparity::DisparityMap;
pub use engine::{EngineVariant, MatchingEngine, SemiGlobalMatching};
pub use parallel::init_global_thread_pool;
pub use resources::{DeviceScratch, StereoResources};
pub use sgm::{Destination, Source, StereoSgm};

pub use cv_hal::{BufferLocation, INVALID_DISP_16, INVALID_DISP_8};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Hal(#[from] cv_hal::Error),

    #[error("{buffer} buffer is in {actual} memory, pipeline expects {expected} memory")]
    LocalityMismatch {
        buffer: &'static str,
        expected: BufferLocation,
        actual: BufferLocation,
    },

    #[error("{buffer} buffer holds {actual} bytes, {required} required")]
    BufferTooSmall {
        buffer: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("pipeline expects {expected} input, got {actual}")]
    PixelDepthMismatch { expected: DepthBits, actual: DepthBits },

    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}
