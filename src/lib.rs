pub use cv_hal as hal;
pub use cv_stereo as stereo;

/// Initialize the global Rayon thread pool used by host-side work.
///
/// Call this once at application startup. Repeated calls are idempotent and
/// return the first initialization result. Device kernels are unaffected: each
/// device runs on its own pool.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `RUSTCV_CPU_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> cv_stereo::Result<()> {
    cv_stereo::init_global_thread_pool(num_threads)
}
