//! Device memory: owned allocations and byte accounting.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::backend::DeviceId;
use crate::{Error, Result};

/// Device allocations are rounded up to a multiple of this many bytes and are
/// aligned to it, so any allocation can be viewed as `u16` pixels.
pub const BUFFER_ALIGNMENT: usize = std::mem::size_of::<u64>();

/// Residency of a buffer handed to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferLocation {
    Host,
    Device,
}

impl fmt::Display for BufferLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferLocation::Host => write!(f, "host"),
            BufferLocation::Device => write!(f, "device"),
        }
    }
}

/// Point-in-time view of a device's allocation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryStats {
    pub live_buffers: usize,
    pub live_bytes: usize,
    pub peak_bytes: usize,
}

/// Atomic allocation counters shared by a device and every buffer it hands out.
pub(crate) struct MemoryLedger {
    live_buffers: AtomicUsize,
    current: AtomicUsize,
    peak: AtomicUsize,
    budget: Option<usize>,
}

impl MemoryLedger {
    pub(crate) fn new(budget: Option<usize>) -> Self {
        Self {
            live_buffers: AtomicUsize::new(0),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            budget,
        }
    }

    pub(crate) fn budget(&self) -> Option<usize> {
        self.budget
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        let budget = self.budget;
        let reserved = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(bytes)
                    .filter(|&next| budget.map_or(true, |limit| next <= limit))
            });

        match reserved {
            Ok(previous) => {
                self.peak.fetch_max(previous + bytes, Ordering::Relaxed);
                self.live_buffers.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(current) => Err(Error::MemoryError(format!(
                "allocation of {bytes} bytes exceeds device budget ({current} of {} bytes in use)",
                budget.unwrap_or(usize::MAX)
            ))),
        }
    }

    fn release(&self, bytes: usize) {
        self.current.fetch_sub(bytes, Ordering::AcqRel);
        self.live_buffers.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MemoryStats {
        MemoryStats {
            live_buffers: self.live_buffers.load(Ordering::Relaxed),
            live_bytes: self.current.load(Ordering::Acquire),
            peak_bytes: self.peak.load(Ordering::Relaxed),
        }
    }
}

/// A zero-initialized allocation in device memory.
///
/// The allocation is returned to its device when the buffer is dropped. Host
/// code never sees the contents directly; it goes through
/// [`Device::upload`](crate::Device::upload) and
/// [`Device::download`](crate::Device::download).
pub struct DeviceBuffer {
    words: Box<[u64]>,
    len: usize,
    device_id: DeviceId,
    ledger: Arc<MemoryLedger>,
}

impl DeviceBuffer {
    pub(crate) fn zeroed(device_id: DeviceId, len: usize, ledger: Arc<MemoryLedger>) -> Result<Self> {
        ledger.reserve(len)?;
        let words = vec![0u64; len.div_ceil(BUFFER_ALIGNMENT)].into_boxed_slice();
        tracing::trace!(%device_id, bytes = len, "device buffer allocated");
        Ok(Self {
            words,
            len,
            device_id,
            ledger,
        })
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&*self.words)[..self.len]
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut *self.words)[..self.len]
    }

    /// First `count` elements of the buffer interpreted as `T`.
    pub(crate) fn view<T: bytemuck::Pod>(&self, count: usize) -> Result<&[T]> {
        self.check_capacity::<T>(count)?;
        Ok(&bytemuck::cast_slice::<u64, T>(&*self.words)[..count])
    }

    pub(crate) fn view_mut<T: bytemuck::Pod>(&mut self, count: usize) -> Result<&mut [T]> {
        self.check_capacity::<T>(count)?;
        Ok(&mut bytemuck::cast_slice_mut::<u64, T>(&mut *self.words)[..count])
    }

    fn check_capacity<T>(&self, count: usize) -> Result<()> {
        let required = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| Error::InvalidInput(format!("element count {count} overflows")))?;
        if required > self.len {
            return Err(Error::InvalidInput(format!(
                "device buffer holds {} bytes, {required} required",
                self.len
            )));
        }
        Ok(())
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.ledger.release(self.len);
        tracing::trace!(device_id = %self.device_id, bytes = self.len, "device buffer released");
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceBuffer(len={}, {})", self.len, self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(budget: Option<usize>) -> Arc<MemoryLedger> {
        Arc::new(MemoryLedger::new(budget))
    }

    #[test]
    fn test_drop_releases_bytes() {
        let ledger = ledger(None);
        let a = DeviceBuffer::zeroed(DeviceId(0), 100, ledger.clone()).unwrap();
        let b = DeviceBuffer::zeroed(DeviceId(0), 28, ledger.clone()).unwrap();
        assert_eq!(ledger.snapshot().live_buffers, 2);
        assert_eq!(ledger.snapshot().live_bytes, 128);

        drop(a);
        assert_eq!(ledger.snapshot().live_buffers, 1);
        assert_eq!(ledger.snapshot().live_bytes, 28);

        drop(b);
        let stats = ledger.snapshot();
        assert_eq!(stats.live_buffers, 0);
        assert_eq!(stats.live_bytes, 0);
        assert_eq!(stats.peak_bytes, 128);
    }

    #[test]
    fn test_budget_is_enforced() {
        let ledger = ledger(Some(64));
        let _a = DeviceBuffer::zeroed(DeviceId(0), 48, ledger.clone()).unwrap();
        let err = DeviceBuffer::zeroed(DeviceId(0), 17, ledger.clone()).unwrap_err();
        assert!(matches!(err, Error::MemoryError(_)));
        // a failed reservation leaves the counters untouched
        assert_eq!(ledger.snapshot().live_buffers, 1);
        assert_eq!(ledger.snapshot().live_bytes, 48);
        assert!(DeviceBuffer::zeroed(DeviceId(0), 16, ledger).is_ok());
    }

    #[test]
    fn test_views_are_bounded_and_zeroed() {
        let mut buf = DeviceBuffer::zeroed(DeviceId(3), 10, ledger(None)).unwrap();
        assert_eq!(buf.len(), 10);
        assert_eq!(buf.bytes().len(), 10);
        assert!(buf.bytes().iter().all(|&b| b == 0));

        assert_eq!(buf.view::<u16>(5).unwrap().len(), 5);
        assert!(buf.view::<u16>(6).is_err());

        buf.view_mut::<u16>(5).unwrap()[4] = 0xABCD;
        assert_eq!(buf.view::<u16>(5).unwrap()[4], 0xABCD);
    }
}
