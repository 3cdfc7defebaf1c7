use log::{debug, info};
use oceanfft_api::{
    download_twiddles, BufferDescriptor, BufferFormat, BufferHandle, BufferSlot, ComputeBackend,
    KernelHandle, ScalarSlot, ScalarValue, HORIZONTAL_STEP_KERNEL, PERMUTE_KERNEL,
    PRECOMPUTE_KERNEL, VERTICAL_STEP_KERNEL,
};
use tracing::info_span;

use crate::butterfly::{self, Axis, BufferRole, StepKernel};
use crate::config::IfftConfig;
use crate::dispatch::dispatch_groups;
use crate::error::{DeviceResultExt, IfftError, Result};
use crate::permutation::{self, PermuteKernel};
use crate::twiddle::{self, TwiddleTable};

/// Where the data resided after each butterfly sequence of a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassRoles {
    pub after_horizontal: BufferRole,
    pub after_vertical: BufferRole,
}

#[derive(Debug, Clone, Copy)]
struct IfftKernels {
    precompute: KernelHandle,
    precompute_groups: [u32; 3],
    horizontal: StepKernel,
    vertical: StepKernel,
    permute: PermuteKernel,
}

impl IfftKernels {
    fn resolve<B: ComputeBackend + ?Sized>(
        backend: &B,
        size: u32,
        stages: u32,
        local_group_size: u32,
    ) -> Result<Self> {
        let find = |name: &'static str| {
            backend
                .find_kernel(name)
                .ok_or(IfftError::KernelNotFound { name })
        };
        let precompute = find(PRECOMPUTE_KERNEL)?;
        let horizontal = find(HORIZONTAL_STEP_KERNEL)?;
        let vertical = find(VERTICAL_STEP_KERNEL)?;
        let permute = find(PERMUTE_KERNEL)?;

        let g = local_group_size;
        let expect_group = |name: &str, kernel: KernelHandle, expected: [u32; 3]| {
            let actual = backend.workgroup_size(kernel);
            if actual == expected {
                Ok(())
            } else {
                Err(IfftError::InvalidConfig(format!(
                    "local_group_size {g} expects {name} workgroup {expected:?}, backend compiled {actual:?}"
                )))
            }
        };
        expect_group(PRECOMPUTE_KERNEL, precompute, [1, g, 1])?;
        expect_group(HORIZONTAL_STEP_KERNEL, horizontal, [g, g, 1])?;
        expect_group(VERTICAL_STEP_KERNEL, vertical, [g, g, 1])?;
        expect_group(PERMUTE_KERNEL, permute, [g, g, 1])?;

        let grid_groups = |kernel: KernelHandle| dispatch_groups(size, size, backend.workgroup_size(kernel));
        Ok(Self {
            precompute,
            // one invocation per butterfly: (stage, j) with j < size / 2
            precompute_groups: dispatch_groups(stages, size / 2, backend.workgroup_size(precompute)),
            horizontal: StepKernel {
                axis: Axis::Horizontal,
                handle: horizontal,
                groups: grid_groups(horizontal),
            },
            vertical: StepKernel {
                axis: Axis::Vertical,
                handle: vertical,
                groups: grid_groups(vertical),
            },
            permute: PermuteKernel {
                handle: permute,
                groups: grid_groups(permute),
            },
        })
    }
}

/// 2D inverse FFT of an `N × N` complex grid on a compute backend.
///
/// Owns the twiddle/index table and one scratch grid for its whole lifetime;
/// both are released through the backend on drop. A single instance must not
/// run two transforms at once.
pub struct Ifft<B: ComputeBackend> {
    backend: B,
    size: u32,
    stages: u32,
    config: IfftConfig,
    kernels: IfftKernels,
    twiddles: BufferHandle,
    scratch: BufferHandle,
    last_roles: Option<PassRoles>,
}

impl<B: ComputeBackend> Ifft<B> {
    pub fn new(backend: B, size: u32) -> Result<Self> {
        Self::with_config(backend, size, IfftConfig::default())
    }

    /// Validate, resolve the four kernels, allocate the table and scratch grid,
    /// then precompute the table. The backend's workgroups must match
    /// `config.local_group_size`. Nothing is allocated when validation fails.
    pub fn with_config(backend: B, size: u32, config: IfftConfig) -> Result<Self> {
        let stages = twiddle::validate_size(size)?;
        config.validate().map_err(IfftError::InvalidConfig)?;
        let kernels = IfftKernels::resolve(&backend, size, stages, config.local_group_size)?;

        let twiddles = backend
            .create_buffer(&BufferDescriptor::new(
                "oceanfft-twiddle-indices",
                size,
                stages,
                BufferFormat::TwiddleEntry,
            ))
            .device_context(|| "allocating twiddle table".to_string())?;
        let scratch = match backend.create_buffer(&BufferDescriptor::complex_grid(
            "oceanfft-ping-pong",
            size,
        )) {
            Ok(handle) => handle,
            Err(source) => {
                backend.release_buffer(&twiddles);
                return Err(IfftError::Device {
                    context: "allocating ping-pong grid".to_string(),
                    source,
                });
            }
        };

        // From here on, Drop releases both buffers on any error.
        let ifft = Self {
            backend,
            size,
            stages,
            config,
            kernels,
            twiddles,
            scratch,
            last_roles: None,
        };
        ifft.precompute()?;
        info!(
            "ifft ready: size={} stages={} local_group={} normalization={:?} on {}",
            size,
            stages,
            ifft.config.local_group_size,
            ifft.config.normalization,
            ifft.backend.device_info()
        );
        Ok(ifft)
    }

    fn precompute(&self) -> Result<()> {
        let _span = info_span!("ifft.precompute", size = self.size, stages = self.stages).entered();
        let context = || "precompute".to_string();
        let kernel = self.kernels.precompute;
        self.backend
            .bind_buffer(kernel, BufferSlot::TwiddleTable, &self.twiddles)
            .device_context(context)?;
        self.backend
            .set_scalar(ScalarSlot::Size, ScalarValue::U32(self.size))
            .device_context(context)?;
        self.backend
            .dispatch(kernel, self.kernels.precompute_groups)
            .device_context(context)?;
        self.backend.barrier().device_context(context)?;
        debug!(
            "precomputed {}x{} twiddle table with {:?} groups",
            self.stages, self.size, self.kernels.precompute_groups
        );
        Ok(())
    }

    /// Transform `grid` in place from a DC-centred spectrum to the spatial field.
    ///
    /// `grid` must be an `N × N` complex buffer of this backend. The caller
    /// must not touch it until this returns.
    pub fn transform(&mut self, grid: &BufferHandle) -> Result<()> {
        self.check_grid(grid)?;
        let _span = info_span!("ifft.transform", size = self.size).entered();
        self.last_roles = None;
        self.bind(grid)?;

        let after_horizontal =
            butterfly::run_pass(&self.backend, &self.kernels.horizontal, self.stages, BufferRole::Grid)?;
        let after_vertical =
            butterfly::run_pass(&self.backend, &self.kernels.vertical, self.stages, after_horizontal)?;
        permutation::run_pass(&self.backend, &self.kernels.permute, after_vertical)?;

        self.last_roles = Some(PassRoles {
            after_horizontal,
            after_vertical,
        });
        debug!(
            "transform of grid {} done: horizontal -> {:?}, vertical -> {:?}",
            grid.buffer_id, after_horizontal, after_vertical
        );
        Ok(())
    }

    fn check_grid(&self, grid: &BufferHandle) -> Result<()> {
        if grid.width != self.size
            || grid.height != self.size
            || grid.format != BufferFormat::ComplexF32
        {
            return Err(IfftError::GridMismatch {
                expected: self.size,
                width: grid.width,
                height: grid.height,
                format: grid.format,
            });
        }
        Ok(())
    }

    fn bind(&self, grid: &BufferHandle) -> Result<()> {
        let context = || "binding transform buffers".to_string();
        for step in [self.kernels.horizontal.handle, self.kernels.vertical.handle] {
            self.backend
                .bind_buffer(step, BufferSlot::TwiddleTable, &self.twiddles)
                .device_context(context)?;
        }
        for kernel in [
            self.kernels.horizontal.handle,
            self.kernels.vertical.handle,
            self.kernels.permute.handle,
        ] {
            self.backend
                .bind_buffer(kernel, BufferSlot::Grid, grid)
                .device_context(context)?;
            self.backend
                .bind_buffer(kernel, BufferSlot::PingPong, &self.scratch)
                .device_context(context)?;
        }
        // Scalars are shared program state; another user of the backend may have changed them.
        self.backend
            .set_scalar(ScalarSlot::Size, ScalarValue::U32(self.size))
            .device_context(context)?;
        self.backend
            .set_scalar(
                ScalarSlot::Scale,
                ScalarValue::F32(self.config.normalization.scale(self.size)),
            )
            .device_context(context)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Butterfly stages per axis, `log2(size)`.
    pub fn stages(&self) -> u32 {
        self.stages
    }

    pub fn config(&self) -> &IfftConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Buffer roles observed during the most recent successful transform.
    pub fn last_roles(&self) -> Option<PassRoles> {
        self.last_roles
    }

    /// Read the device-resident twiddle/index table back to the host.
    pub fn twiddle_table(&self) -> Result<TwiddleTable> {
        let entries = download_twiddles(&self.backend, &self.twiddles)
            .device_context(|| "reading twiddle table".to_string())?;
        TwiddleTable::from_entries(self.size, entries)
    }
}

impl<B: ComputeBackend> Drop for Ifft<B> {
    fn drop(&mut self) {
        self.backend.release_buffer(&self.twiddles);
        self.backend.release_buffer(&self.scratch);
    }
}
