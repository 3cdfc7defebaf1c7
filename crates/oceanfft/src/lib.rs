//! OceanFFT: 2D inverse FFT of a DC-centred spectrum on a compute device.
//!
//! Goals:
//! - Turn an `N × N` complex spectrum into its spatial field entirely on the device.
//! - Run the butterfly network as `2·log2(N)` ping-pong passes driven from the host.
//! - Stay backend-agnostic: anything implementing [`ComputeBackend`] can host the program.
//!
//! ```no_run
//! use oceanfft::{api, HostBackend, Ifft};
//! use num_complex::Complex32;
//!
//! let backend = HostBackend::default();
//! let grid = api::ComputeBackend::create_buffer(
//!     &backend,
//!     &api::BufferDescriptor::complex_grid("spectrum", 256),
//! )?;
//! api::upload_grid(&backend, &grid, &vec![Complex32::new(0.0, 0.0); 256 * 256])?;
//! let mut ifft = Ifft::new(&backend, 256)?;
//! ifft.transform(&grid)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backend;
pub mod butterfly;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod ifft;
pub mod kernels;
pub mod permutation;
pub mod twiddle;

pub use oceanfft_api as api;
pub use oceanfft_api::ComputeBackend;

pub use butterfly::{Axis, BufferRole};
pub use config::{IfftConfig, Normalization};
pub use error::{IfftError, Result};
pub use host::{HostBackend, HostProgram};
pub use ifft::{Ifft, PassRoles};
pub use twiddle::TwiddleTable;

use serde::{Deserialize, Serialize};

/// Preferred compute backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendPreference {
    #[default]
    Auto,
    Wgpu,
    Host,
}

/// Power preference used when initializing a WGPU backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    #[default]
    HighPerformance,
    LowPower,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BackendOptions {
    pub preference: BackendPreference,
    pub allow_host_fallback: bool,
    pub power_preference: PowerPreference,
    pub force_fallback_adapter: bool,
    pub local_group_size: u32,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            preference: BackendPreference::Auto,
            allow_host_fallback: true,
            power_preference: PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            local_group_size: config::DEFAULT_LOCAL_GROUP_SIZE,
        }
    }
}

impl BackendOptions {
    /// Backend options matching a transform configuration.
    pub fn for_config(config: &IfftConfig) -> Self {
        Self {
            local_group_size: config.local_group_size,
            ..Self::default()
        }
    }
}

/// Create the compute backend selected by `options`.
pub fn create_backend(options: &BackendOptions) -> anyhow::Result<Box<dyn ComputeBackend>> {
    if options.preference == BackendPreference::Host {
        log::info!("OceanFFT: using in-process host backend");
        return Ok(Box::new(HostBackend::ifft(options.local_group_size)));
    }

    #[cfg(feature = "wgpu")]
    {
        let wgpu_options = backend::wgpu::WgpuBackendOptions {
            power_preference: match options.power_preference {
                PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
                PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            },
            force_fallback_adapter: options.force_fallback_adapter,
            local_group_size: options.local_group_size,
        };
        match backend::wgpu::WgpuBackend::new(wgpu_options) {
            Ok(wgpu_backend) => {
                log::info!("OceanFFT: using WGPU backend {}", wgpu_backend.device_info());
                return Ok(Box::new(wgpu_backend));
            }
            Err(err) => {
                if options.preference == BackendPreference::Wgpu && !options.allow_host_fallback {
                    return Err(err.context("OceanFFT: wgpu backend initialization failed"));
                }
                log::warn!("OceanFFT: wgpu backend initialization failed: {err}");
            }
        }
    }

    #[cfg(not(feature = "wgpu"))]
    {
        if options.preference == BackendPreference::Wgpu && !options.allow_host_fallback {
            anyhow::bail!("OceanFFT: wgpu backend requested but the `wgpu` feature is disabled");
        }
    }

    log::info!("OceanFFT: falling back to in-process host backend");
    Ok(Box::new(HostBackend::ifft(options.local_group_size)))
}
