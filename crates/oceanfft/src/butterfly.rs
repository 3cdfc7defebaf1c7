//! Butterfly pass engine: `log2(N)` ping-pong stages along one axis.

use log::trace;
use oceanfft_api::{ComputeBackend, KernelHandle, ScalarSlot, ScalarValue};
use serde::{Deserialize, Serialize};

use crate::error::{DeviceResultExt, Result};

/// Which of the two grids currently holds the valid data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BufferRole {
    /// The caller-supplied grid (buffer A).
    Grid,
    /// The transform's own scratch grid (buffer B).
    Scratch,
}

impl BufferRole {
    pub fn other(self) -> Self {
        match self {
            BufferRole::Grid => BufferRole::Scratch,
            BufferRole::Scratch => BufferRole::Grid,
        }
    }

    /// Value of the kernels' `PingPong` scalar when this buffer is the source.
    pub fn ping_pong(self) -> bool {
        self == BufferRole::Scratch
    }

    /// Where the data sits after `stages` stages that started in `self`.
    pub fn after_stages(self, stages: u32) -> Self {
        if stages % 2 == 0 {
            self
        } else {
            self.other()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Axis {
    Horizontal,
    Vertical,
}

impl Axis {
    pub fn label(self) -> &'static str {
        match self {
            Axis::Horizontal => "horizontal",
            Axis::Vertical => "vertical",
        }
    }
}

/// A resolved step kernel and its per-stage dispatch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepKernel {
    pub axis: Axis,
    pub handle: KernelHandle,
    pub groups: [u32; 3],
}

/// Run every stage of one axis, starting with `source` as the current source
/// buffer, and return the buffer that holds the result.
///
/// Each stage is followed by a barrier; the first backend error stops the pass.
pub fn run_pass<B: ComputeBackend + ?Sized>(
    backend: &B,
    kernel: &StepKernel,
    stages: u32,
    source: BufferRole,
) -> Result<BufferRole> {
    let mut current = source;
    for step in 0..stages {
        let context = || format!("{} step {}", kernel.axis.label(), step);
        backend
            .set_scalar(ScalarSlot::Step, ScalarValue::U32(step))
            .device_context(context)?;
        backend
            .set_scalar(ScalarSlot::PingPong, ScalarValue::Bool(current.ping_pong()))
            .device_context(context)?;
        backend
            .dispatch(kernel.handle, kernel.groups)
            .device_context(context)?;
        backend.barrier().device_context(context)?;
        trace!(
            "{} step {}: {:?} -> {:?}",
            kernel.axis.label(),
            step,
            current,
            current.other()
        );
        current = current.other();
    }
    Ok(current)
}
