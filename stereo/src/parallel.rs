use std::sync::OnceLock;

use cv_hal::read_cpu_threads_from_env;

use crate::{Error, Result};

static THREAD_POOL_INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Size rayon's global pool once per process.
///
/// Kernels run on their device's own pool; this only affects host-side rayon
/// work. `num_threads` takes precedence over `RUSTCV_CPU_THREADS`; with neither
/// the global pool keeps rayon's defaults. Later calls return the first result.
pub fn init_global_thread_pool(num_threads: Option<usize>) -> Result<()> {
    THREAD_POOL_INIT
        .get_or_init(|| {
            let from_env = read_cpu_threads_from_env().map_err(|e| e.to_string())?;
            let Some(num_threads) = num_threads.or(from_env) else {
                return Ok(());
            };
            if num_threads == 0 {
                return Err("thread count must be >= 1".to_string());
            }

            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
                .map_err(|e| {
                    format!(
                        "Failed to initialize global thread pool with \
                         {num_threads} threads: {e}"
                    )
                })
        })
        .as_ref()
        .map_err(|e| Error::ThreadPool(e.clone()))?;
    Ok(())
}
