//! OceanFFT compute API: the device capability surface the transform is written against.
//!
//! Goals:
//! - Keep the butterfly network independent of any particular graphics API.
//! - Describe the device program by its four named entry points and the buffers/scalars they use.
//! - Share the plain-old-data element layouts between host code and device code.

use anyhow::{anyhow, ensure};
use bytemuck::{Pod, Zeroable};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Entry point that fills the twiddle/index table.
pub const PRECOMPUTE_KERNEL: &str = "PrecomputeTwiddleFactorsAndIndices";
/// Entry point running one butterfly stage along rows.
pub const HORIZONTAL_STEP_KERNEL: &str = "HorizontalStep";
/// Entry point running one butterfly stage along columns.
pub const VERTICAL_STEP_KERNEL: &str = "VerticalStep";
/// Entry point applying the checkerboard sign correction.
pub const PERMUTE_KERNEL: &str = "Permute";

pub const IFFT_KERNELS: [&str; 4] = [
    PRECOMPUTE_KERNEL,
    HORIZONTAL_STEP_KERNEL,
    VERTICAL_STEP_KERNEL,
    PERMUTE_KERNEL,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BufferFormat {
    /// Two f32 components per cell (real, imaginary).
    ComplexF32,
    /// One [`TwiddleEntry`] per cell.
    TwiddleEntry,
}

impl BufferFormat {
    pub fn element_size(self) -> usize {
        match self {
            BufferFormat::ComplexF32 => std::mem::size_of::<Complex32>(),
            BufferFormat::TwiddleEntry => std::mem::size_of::<TwiddleEntry>(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: BufferFormat,
}

impl BufferDescriptor {
    pub fn new(label: impl Into<String>, width: u32, height: u32, format: BufferFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
        }
    }

    /// Square complex grid of `size × size` cells.
    pub fn complex_grid(label: impl Into<String>, size: u32) -> Self {
        Self::new(label, size, size, BufferFormat::ComplexF32)
    }

    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> u64 {
        self.len() as u64 * self.format.element_size() as u64
    }
}

/// Device-side buffer owned by a backend. Cloning the handle does not clone the storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferHandle {
    pub buffer_id: u64,
    pub width: u32,
    pub height: u32,
    pub format: BufferFormat,
}

impl BufferHandle {
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Named buffer bindings shared by the four entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BufferSlot {
    TwiddleTable,
    /// The caller-supplied grid (buffer A).
    Grid,
    /// Internal scratch grid (buffer B).
    PingPong,
}

impl BufferSlot {
    pub fn binding(self) -> u32 {
        match self {
            BufferSlot::TwiddleTable => 0,
            BufferSlot::Grid => 1,
            BufferSlot::PingPong => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScalarSlot {
    Size,
    Step,
    PingPong,
    Scale,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    U32(u32),
    Bool(bool),
    F32(f32),
}

impl ScalarValue {
    pub fn as_u32(self) -> u32 {
        match self {
            ScalarValue::U32(v) => v,
            ScalarValue::Bool(v) => v as u32,
            ScalarValue::F32(v) => v as u32,
        }
    }

    pub fn as_f32(self) -> f32 {
        match self {
            ScalarValue::U32(v) => v as f32,
            ScalarValue::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
            ScalarValue::F32(v) => v,
        }
    }
}

/// One cell of the twiddle/index table.
///
/// Layout matches the WGSL `TwiddleEntry { twiddle: vec2<f32>, indices: vec2<u32> }`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct TwiddleEntry {
    pub twiddle: [f32; 2],
    pub indices: [u32; 2],
}

impl TwiddleEntry {
    pub fn new(twiddle: Complex32, index_a: u32, index_b: u32) -> Self {
        Self {
            twiddle: [twiddle.re, twiddle.im],
            indices: [index_a, index_b],
        }
    }

    pub fn twiddle(&self) -> Complex32 {
        Complex32::new(self.twiddle[0], self.twiddle[1])
    }

    pub fn index_a(&self) -> usize {
        self.indices[0] as usize
    }

    pub fn index_b(&self) -> usize {
        self.indices[1] as usize
    }
}

/// Uniform block seen by every entry point.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct IfftParams {
    pub size: u32,
    pub step: u32,
    pub ping_pong: u32,
    pub scale: f32,
}

impl Default for IfftParams {
    fn default() -> Self {
        Self {
            size: 0,
            step: 0,
            ping_pong: 0,
            scale: 1.0,
        }
    }
}

impl IfftParams {
    pub fn set(&mut self, slot: ScalarSlot, value: ScalarValue) {
        match slot {
            ScalarSlot::Size => self.size = value.as_u32(),
            ScalarSlot::Step => self.step = value.as_u32(),
            ScalarSlot::PingPong => self.ping_pong = value.as_u32(),
            ScalarSlot::Scale => self.scale = value.as_f32(),
        }
    }
}

/// Capability interface of a compute device able to run the IFFT program.
///
/// Implementations are expected to use interior mutability; callers serialize
/// use of a single transform instance themselves.
pub trait ComputeBackend {
    /// Resolve a named entry point of the loaded program.
    fn find_kernel(&self, name: &str) -> Option<KernelHandle>;

    /// Local work-group size the kernel was compiled with.
    fn workgroup_size(&self, kernel: KernelHandle) -> [u32; 3];

    fn create_buffer(&self, desc: &BufferDescriptor) -> anyhow::Result<BufferHandle>;

    fn release_buffer(&self, handle: &BufferHandle);

    fn write_buffer(&self, handle: &BufferHandle, bytes: &[u8]) -> anyhow::Result<()>;

    fn read_buffer(&self, handle: &BufferHandle) -> anyhow::Result<Vec<u8>>;

    fn bind_buffer(
        &self,
        kernel: KernelHandle,
        slot: BufferSlot,
        handle: &BufferHandle,
    ) -> anyhow::Result<()>;

    fn set_scalar(&self, slot: ScalarSlot, value: ScalarValue) -> anyhow::Result<()>;

    fn dispatch(&self, kernel: KernelHandle, groups: [u32; 3]) -> anyhow::Result<()>;

    /// Block until every previously issued dispatch has completed.
    fn barrier(&self) -> anyhow::Result<()>;

    fn device_info(&self) -> String {
        String::from("unknown compute backend")
    }
}

macro_rules! forward_backend {
    () => {
        fn find_kernel(&self, name: &str) -> Option<KernelHandle> {
            (**self).find_kernel(name)
        }
        fn workgroup_size(&self, kernel: KernelHandle) -> [u32; 3] {
            (**self).workgroup_size(kernel)
        }
        fn create_buffer(&self, desc: &BufferDescriptor) -> anyhow::Result<BufferHandle> {
            (**self).create_buffer(desc)
        }
        fn release_buffer(&self, handle: &BufferHandle) {
            (**self).release_buffer(handle)
        }
        fn write_buffer(&self, handle: &BufferHandle, bytes: &[u8]) -> anyhow::Result<()> {
            (**self).write_buffer(handle, bytes)
        }
        fn read_buffer(&self, handle: &BufferHandle) -> anyhow::Result<Vec<u8>> {
            (**self).read_buffer(handle)
        }
        fn bind_buffer(
            &self,
            kernel: KernelHandle,
            slot: BufferSlot,
            handle: &BufferHandle,
        ) -> anyhow::Result<()> {
            (**self).bind_buffer(kernel, slot, handle)
        }
        fn set_scalar(&self, slot: ScalarSlot, value: ScalarValue) -> anyhow::Result<()> {
            (**self).set_scalar(slot, value)
        }
        fn dispatch(&self, kernel: KernelHandle, groups: [u32; 3]) -> anyhow::Result<()> {
            (**self).dispatch(kernel, groups)
        }
        fn barrier(&self) -> anyhow::Result<()> {
            (**self).barrier()
        }
        fn device_info(&self) -> String {
            (**self).device_info()
        }
    };
}

impl<T: ComputeBackend + ?Sized> ComputeBackend for &T {
    forward_backend!();
}

impl<T: ComputeBackend + ?Sized> ComputeBackend for Box<T> {
    forward_backend!();
}

impl<T: ComputeBackend + ?Sized> ComputeBackend for Arc<T> {
    forward_backend!();
}

/// Copy host samples into a complex grid buffer.
pub fn upload_grid<B: ComputeBackend + ?Sized>(
    backend: &B,
    handle: &BufferHandle,
    data: &[Complex32],
) -> anyhow::Result<()> {
    ensure!(
        handle.format == BufferFormat::ComplexF32,
        "upload_grid: buffer {} is {:?}, expected complex grid",
        handle.buffer_id,
        handle.format
    );
    ensure!(
        data.len() == handle.len(),
        "upload_grid: {} samples for a {}x{} grid",
        data.len(),
        handle.width,
        handle.height
    );
    backend.write_buffer(handle, bytemuck::cast_slice(data))
}

/// Read a complex grid buffer back to the host.
pub fn download_grid<B: ComputeBackend + ?Sized>(
    backend: &B,
    handle: &BufferHandle,
) -> anyhow::Result<Vec<Complex32>> {
    ensure!(
        handle.format == BufferFormat::ComplexF32,
        "download_grid: buffer {} is {:?}, expected complex grid",
        handle.buffer_id,
        handle.format
    );
    let bytes = backend.read_buffer(handle)?;
    cast_owned(&bytes, handle.len(), "download_grid")
}

/// Read a twiddle/index table buffer back to the host.
pub fn download_twiddles<B: ComputeBackend + ?Sized>(
    backend: &B,
    handle: &BufferHandle,
) -> anyhow::Result<Vec<TwiddleEntry>> {
    ensure!(
        handle.format == BufferFormat::TwiddleEntry,
        "download_twiddles: buffer {} is {:?}, expected twiddle table",
        handle.buffer_id,
        handle.format
    );
    let bytes = backend.read_buffer(handle)?;
    cast_owned(&bytes, handle.len(), "download_twiddles")
}

fn cast_owned<T: Pod>(bytes: &[u8], len: usize, context: &str) -> anyhow::Result<Vec<T>> {
    let expected = len * std::mem::size_of::<T>();
    if bytes.len() != expected {
        return Err(anyhow!(
            "{context}: backend returned {} bytes, expected {expected}",
            bytes.len()
        ));
    }
    // Byte vectors carry no alignment guarantee for T.
    Ok(bytemuck::pod_collect_to_vec(bytes))
}
