//! Device Selection
//!
//! Picks the candle [`Device`] models are built on. Graph tensors and every
//! parameter of a model must live on the same device.
//!
//! Set `EQGRAPH_NO_GPU=1` to force CPU regardless of compiled-in backends.

use candle_core::Device;
use tracing::info;

/// Check if GPU is disabled via environment variable.
pub fn gpu_disabled() -> bool {
    std::env::var("EQGRAPH_NO_GPU")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Get the best available device for tensor operations
///
/// Priority:
/// 1. `EQGRAPH_NO_GPU` (forces CPU if set)
/// 2. Metal
/// 3. CUDA
/// 4. CPU
pub fn best_device() -> Device {
    if gpu_disabled() {
        info!("Using CPU device (EQGRAPH_NO_GPU set)");
        return Device::Cpu;
    }

    if let Some(device) = gpu_device() {
        return device;
    }

    info!("Using CPU device");
    Device::Cpu
}

/// First compiled-in GPU that initializes, if any.
pub fn gpu_device() -> Option<Device> {
    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            info!("Using Metal device");
            return Some(device);
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("Using CUDA device");
            return Some(device);
        }
    }

    None
}

/// Force CPU device, ignoring GPU availability.
pub fn cpu_device() -> Device {
    Device::Cpu
}
