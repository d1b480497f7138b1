//! Compute device abstraction for the stereo pipeline.
//!
//! A [`Device`] owns its memory accounting and a kernel worker pool. Memory
//! handed out by a device lives in [`DeviceBuffer`]s, which are only readable on
//! the host through explicit transfers ([`Device::upload`] / [`Device::download`]).
//! The kernels in [`kernels`] operate on device buffers directly.

pub mod backend;
pub mod config;
pub mod device;
pub mod kernels;
pub mod memory;
pub mod pixel;

pub use backend::{BackendType, DeviceId};
pub use config::{read_cpu_threads_from_env, read_device_max_bytes_from_env};
pub use device::{Device, DeviceBuilder, TransferStats};
pub use kernels::{INVALID_DISP_16, INVALID_DISP_8};
pub use memory::{BufferLocation, DeviceBuffer, MemoryStats, BUFFER_ALIGNMENT};
pub use pixel::Pixel;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Memory error: {0}")]
    MemoryError(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn not_supported(feature: impl Into<String>) -> Self {
        Self::NotSupported(feature.into())
    }
}
