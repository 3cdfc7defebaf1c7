//! Checkerboard sign correction, the last pass of every transform.

use oceanfft_api::{ComputeBackend, KernelHandle, ScalarSlot, ScalarValue};

use crate::butterfly::BufferRole;
use crate::error::{DeviceResultExt, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermuteKernel {
    pub handle: KernelHandle,
    pub groups: [u32; 3],
}

/// Multiply every cell of `source` by `(-1)^(x+y)` (and the configured scale)
/// and store it in the caller's grid.
pub fn run_pass<B: ComputeBackend + ?Sized>(
    backend: &B,
    kernel: &PermuteKernel,
    source: BufferRole,
) -> Result<()> {
    let context = || format!("permute from {source:?}");
    backend
        .set_scalar(ScalarSlot::PingPong, ScalarValue::Bool(source.ping_pong()))
        .device_context(context)?;
    backend
        .dispatch(kernel.handle, kernel.groups)
        .device_context(context)?;
    backend.barrier().device_context(context)
}
