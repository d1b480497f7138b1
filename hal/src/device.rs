use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::backend::{BackendType, DeviceId};
use crate::config::{read_cpu_threads_from_env, read_device_max_bytes_from_env};
use crate::memory::{DeviceBuffer, MemoryLedger, MemoryStats};
use crate::{Error, Result};

static NEXT_DEVICE_ID: AtomicU32 = AtomicU32::new(0);

/// Host/device transfer counters of a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferStats {
    pub host_to_device: u64,
    pub device_to_host: u64,
    pub device_to_device: u64,
    pub host_to_device_bytes: u64,
    pub device_to_host_bytes: u64,
    pub device_to_device_bytes: u64,
}

#[derive(Default)]
struct TransferCounters {
    h2d: AtomicU64,
    d2h: AtomicU64,
    d2d: AtomicU64,
    h2d_bytes: AtomicU64,
    d2h_bytes: AtomicU64,
    d2d_bytes: AtomicU64,
}

impl TransferCounters {
    fn record(count: &AtomicU64, bytes_counter: &AtomicU64, bytes: usize) {
        count.fetch_add(1, Ordering::Relaxed);
        bytes_counter.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TransferStats {
        TransferStats {
            host_to_device: self.h2d.load(Ordering::Relaxed),
            device_to_host: self.d2h.load(Ordering::Relaxed),
            device_to_device: self.d2d.load(Ordering::Relaxed),
            host_to_device_bytes: self.h2d_bytes.load(Ordering::Relaxed),
            device_to_host_bytes: self.d2h_bytes.load(Ordering::Relaxed),
            device_to_device_bytes: self.d2d_bytes.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.h2d,
            &self.d2h,
            &self.d2d,
            &self.h2d_bytes,
            &self.d2h_bytes,
            &self.d2d_bytes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

struct DeviceInner {
    id: DeviceId,
    backend: BackendType,
    ledger: Arc<MemoryLedger>,
    transfers: TransferCounters,
    pool: rayon::ThreadPool,
}

/// Handle to a compute device.
///
/// Cloning is cheap and every clone refers to the same memory accounting and
/// kernel pool. Operations are blocking: when a call returns, its effect on
/// device memory is complete.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceBuilder {
    memory_budget: Option<usize>,
    num_threads: Option<usize>,
}

impl DeviceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from `RUSTCV_DEVICE_MAX_BYTES` and `RUSTCV_CPU_THREADS`.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            memory_budget: read_device_max_bytes_from_env()?,
            num_threads: read_cpu_threads_from_env()?,
        })
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    pub fn build(self) -> Result<Device> {
        if self.num_threads == Some(0) {
            return Err(Error::InvalidInput("device thread count must be >= 1".into()));
        }

        let id = DeviceId(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed));
        let thread_name_prefix = format!("cv-device{}-", id.0);
        let mut pool = rayon::ThreadPoolBuilder::new()
            .thread_name(move |i| format!("{}{}", thread_name_prefix, i));
        if let Some(n) = self.num_threads {
            pool = pool.num_threads(n);
        }
        let pool = pool
            .build()
            .map_err(|e| Error::DeviceError(format!("failed to start kernel pool for {id}: {e}")))?;

        tracing::debug!(
            %id,
            threads = pool.current_num_threads(),
            budget = ?self.memory_budget,
            "device created"
        );

        Ok(Device {
            inner: Arc::new(DeviceInner {
                id,
                backend: BackendType::Cpu,
                ledger: Arc::new(MemoryLedger::new(self.memory_budget)),
                transfers: TransferCounters::default(),
                pool,
            }),
        })
    }
}

impl Device {
    /// Device with no memory budget and one worker per logical core.
    pub fn cpu() -> Result<Self> {
        DeviceBuilder::new().build()
    }

    pub fn from_env() -> Result<Self> {
        DeviceBuilder::from_env()?.build()
    }

    pub fn builder() -> DeviceBuilder {
        DeviceBuilder::new()
    }

    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    pub fn backend(&self) -> BackendType {
        self.inner.backend
    }

    pub fn memory_budget(&self) -> Option<usize> {
        self.inner.ledger.budget()
    }

    pub fn num_threads(&self) -> usize {
        self.inner.pool.current_num_threads()
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.inner.ledger.snapshot()
    }

    pub fn transfer_stats(&self) -> TransferStats {
        self.inner.transfers.snapshot()
    }

    pub fn reset_transfer_stats(&self) {
        self.inner.transfers.reset();
    }

    /// Allocate `bytes` of zero-initialized device memory.
    pub fn alloc_zeroed(&self, bytes: usize) -> Result<DeviceBuffer> {
        DeviceBuffer::zeroed(self.inner.id, bytes, self.inner.ledger.clone()).map_err(|e| {
            tracing::warn!(id = %self.inner.id, bytes, error = %e, "device allocation failed");
            e
        })
    }

    /// Copy `src` into the start of `dst`.
    pub fn upload(&self, dst: &mut DeviceBuffer, src: &[u8]) -> Result<()> {
        self.check_owned(dst)?;
        if src.len() > dst.len() {
            return Err(Error::InvalidInput(format!(
                "upload of {} bytes into a {} byte device buffer",
                src.len(),
                dst.len()
            )));
        }
        dst.bytes_mut()[..src.len()].copy_from_slice(src);
        let t = &self.inner.transfers;
        TransferCounters::record(&t.h2d, &t.h2d_bytes, src.len());
        Ok(())
    }

    /// Fill `dst` from the start of `src`.
    pub fn download(&self, src: &DeviceBuffer, dst: &mut [u8]) -> Result<()> {
        self.check_owned(src)?;
        if dst.len() > src.len() {
            return Err(Error::InvalidInput(format!(
                "download of {} bytes from a {} byte device buffer",
                dst.len(),
                src.len()
            )));
        }
        dst.copy_from_slice(&src.bytes()[..dst.len()]);
        let t = &self.inner.transfers;
        TransferCounters::record(&t.d2h, &t.d2h_bytes, dst.len());
        Ok(())
    }

    /// Copy the first `bytes` bytes of `src` into `dst`.
    pub fn copy(&self, src: &DeviceBuffer, dst: &mut DeviceBuffer, bytes: usize) -> Result<()> {
        self.check_owned(src)?;
        self.check_owned(dst)?;
        if bytes > src.len() || bytes > dst.len() {
            return Err(Error::InvalidInput(format!(
                "device copy of {bytes} bytes between buffers of {} and {} bytes",
                src.len(),
                dst.len()
            )));
        }
        dst.bytes_mut()[..bytes].copy_from_slice(&src.bytes()[..bytes]);
        let t = &self.inner.transfers;
        TransferCounters::record(&t.d2d, &t.d2d_bytes, bytes);
        Ok(())
    }

    /// Set every byte of `buffer` to `value`.
    pub fn fill(&self, buffer: &mut DeviceBuffer, value: u8) -> Result<()> {
        self.check_owned(buffer)?;
        let bytes = buffer.bytes_mut();
        self.launch(|| bytes.par_chunks_mut(1 << 16).for_each(|chunk| chunk.fill(value)));
        Ok(())
    }

    /// Block until the kernel pool is idle. Operations already complete before
    /// returning, so this is only a barrier for callers that share the pool.
    pub fn synchronize(&self) {
        self.launch(|| ());
    }

    /// Run a kernel body on this device's worker pool.
    pub(crate) fn launch<F, R>(&self, kernel: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.inner.pool.install(kernel)
    }

    pub(crate) fn check_owned(&self, buffer: &DeviceBuffer) -> Result<()> {
        if buffer.device_id() != self.inner.id {
            return Err(Error::DeviceError(format!(
                "buffer belongs to {}, not {}",
                buffer.device_id(),
                self.inner.id
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("backend", &self.inner.backend)
            .field("memory", &self.memory_stats())
            .finish()
    }
}
