pub mod cpu;

pub use cpu::{CpuBatchNormBackend, CpuBuffer};

/// Register the host backend with the global backend registry.
///
/// This function is called automatically via a static initializer, but can also
/// be called manually to ensure the backend is registered.
/// The backend is registered under both "cpu" and "host" names.
pub fn register_cpu_backend() {
    bnorm::backend::registry::register_batch_norm_backend("cpu", CpuBatchNormBackend::new);
    bnorm::backend::registry::register_batch_norm_backend("host", CpuBatchNormBackend::new);
}

// Auto-register on library load
#[cfg(any(target_os = "linux", target_os = "android"))]
#[used]
#[link_section = ".init_array"]
static REGISTER_CPU_BACKEND: extern "C" fn() = {
    extern "C" fn register() {
        register_cpu_backend();
    }
    register
};
