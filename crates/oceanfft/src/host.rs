//! In-process compute backend.
//!
//! Runs the IFFT program on the CPU with the same dispatch model as a device:
//! work-groups of local invocations, buffers bound to named slots, scalars in
//! a shared uniform block. Every dispatch reads from a snapshot of its bound
//! buffers taken when the dispatch starts.

use anyhow::{anyhow, ensure, Result};
use num_complex::Complex32;
use oceanfft_api::{
    BufferDescriptor, BufferFormat, BufferHandle, BufferSlot, ComputeBackend, IfftParams,
    KernelHandle, ScalarSlot, ScalarValue, TwiddleEntry, HORIZONTAL_STEP_KERNEL, PERMUTE_KERNEL,
    PRECOMPUTE_KERNEL, VERTICAL_STEP_KERNEL,
};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::DEFAULT_LOCAL_GROUP_SIZE;
use crate::kernels;
use crate::twiddle;

/// Views of the three bound buffers seen by one invocation.
#[derive(Debug, Clone, Default)]
pub struct HostBindings {
    pub twiddles: Vec<TwiddleEntry>,
    pub grid: Vec<Complex32>,
    pub ping_pong: Vec<Complex32>,
}

pub type HostKernelFn =
    fn(params: &IfftParams, input: &HostBindings, output: &mut HostBindings, gid: [u32; 3]);

#[derive(Clone)]
pub struct HostKernel {
    pub name: String,
    pub workgroup_size: [u32; 3],
    /// Slots that must be bound before dispatch.
    pub slots: Vec<BufferSlot>,
    pub run: HostKernelFn,
}

/// A named set of host kernels, the CPU analogue of a compiled shader program.
#[derive(Clone, Default)]
pub struct HostProgram {
    kernels: Vec<HostKernel>,
}

impl HostProgram {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The four IFFT entry points, steps and permute using
    /// `local_group_size × local_group_size` groups.
    pub fn ifft(local_group_size: u32) -> Self {
        let g = local_group_size.max(1);
        Self::empty()
            .with_kernel(
                PRECOMPUTE_KERNEL,
                [1, g, 1],
                &[BufferSlot::TwiddleTable],
                precompute_kernel,
            )
            .with_kernel(
                HORIZONTAL_STEP_KERNEL,
                [g, g, 1],
                &[BufferSlot::TwiddleTable, BufferSlot::Grid, BufferSlot::PingPong],
                horizontal_step_kernel,
            )
            .with_kernel(
                VERTICAL_STEP_KERNEL,
                [g, g, 1],
                &[BufferSlot::TwiddleTable, BufferSlot::Grid, BufferSlot::PingPong],
                vertical_step_kernel,
            )
            .with_kernel(
                PERMUTE_KERNEL,
                [g, g, 1],
                &[BufferSlot::Grid, BufferSlot::PingPong],
                permute_kernel,
            )
    }

    pub fn with_kernel(
        mut self,
        name: &str,
        workgroup_size: [u32; 3],
        slots: &[BufferSlot],
        run: HostKernelFn,
    ) -> Self {
        self.kernels.retain(|k| k.name != name);
        self.kernels.push(HostKernel {
            name: name.to_string(),
            workgroup_size,
            slots: slots.to_vec(),
            run,
        });
        self
    }

    /// Drop an entry point, e.g. to model a malformed program.
    pub fn without(mut self, name: &str) -> Self {
        self.kernels.retain(|k| k.name != name);
        self
    }

    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.kernels.iter().map(|k| k.name.as_str())
    }
}

fn precompute_kernel(
    params: &IfftParams,
    _input: &HostBindings,
    output: &mut HostBindings,
    gid: [u32; 3],
) {
    let size = params.size;
    let stage = gid[0];
    let j = gid[1];
    if stage >= size.trailing_zeros() || j >= size / 2 {
        return;
    }
    for (position, entry) in twiddle::butterfly_wings(size, stage, j) {
        output.twiddles[(stage * size + position) as usize] = entry;
    }
}

fn horizontal_step_kernel(
    params: &IfftParams,
    input: &HostBindings,
    output: &mut HostBindings,
    gid: [u32; 3],
) {
    let size = params.size as usize;
    let (x, y) = (gid[0] as usize, gid[1] as usize);
    if x >= size || y >= size {
        return;
    }
    let step = params.step as usize;
    let index = y * size + x;
    if params.ping_pong == 0 {
        output.ping_pong[index] =
            kernels::horizontal_step(&input.grid, &input.twiddles, size, step, x, y);
    } else {
        output.grid[index] =
            kernels::horizontal_step(&input.ping_pong, &input.twiddles, size, step, x, y);
    }
}

fn vertical_step_kernel(
    params: &IfftParams,
    input: &HostBindings,
    output: &mut HostBindings,
    gid: [u32; 3],
) {
    let size = params.size as usize;
    let (x, y) = (gid[0] as usize, gid[1] as usize);
    if x >= size || y >= size {
        return;
    }
    let step = params.step as usize;
    let index = y * size + x;
    if params.ping_pong == 0 {
        output.ping_pong[index] =
            kernels::vertical_step(&input.grid, &input.twiddles, size, step, x, y);
    } else {
        output.grid[index] =
            kernels::vertical_step(&input.ping_pong, &input.twiddles, size, step, x, y);
    }
}

fn permute_kernel(params: &IfftParams, input: &HostBindings, output: &mut HostBindings, gid: [u32; 3]) {
    let size = params.size as usize;
    let (x, y) = (gid[0] as usize, gid[1] as usize);
    if x >= size || y >= size {
        return;
    }
    let index = y * size + x;
    let value = if params.ping_pong == 0 {
        input.grid[index]
    } else {
        input.ping_pong[index]
    };
    output.grid[index] = kernels::permute(value, x, y, params.scale);
}

#[derive(Debug, Clone)]
enum HostStorage {
    Complex(Vec<Complex32>),
    Twiddles(Vec<TwiddleEntry>),
}

#[derive(Debug, Clone)]
struct HostBuffer {
    label: String,
    storage: HostStorage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Dispatch(DispatchRecord),
    Barrier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    pub kernel: String,
    pub groups: [u32; 3],
    pub params: IfftParams,
    /// Buffer id bound to each slot at dispatch time.
    pub bindings: Vec<(BufferSlot, u64)>,
}

#[derive(Default)]
struct HostState {
    next_id: u64,
    buffers: HashMap<u64, HostBuffer>,
    bindings: HashMap<(KernelHandle, BufferSlot), u64>,
    params: IfftParams,
    events: Vec<HostEvent>,
    allocations: usize,
    fail_after: Option<usize>,
}

pub struct HostBackend {
    program: HostProgram,
    state: Mutex<HostState>,
}

impl HostBackend {
    pub fn new(program: HostProgram) -> Self {
        Self {
            program,
            state: Mutex::new(HostState {
                next_id: 1,
                ..HostState::default()
            }),
        }
    }

    /// Host backend loaded with the IFFT program.
    pub fn ifft(local_group_size: u32) -> Self {
        Self::new(HostProgram::ifft(local_group_size))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HostState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("host backend state poisoned"))
    }

    fn kernel(&self, handle: KernelHandle) -> Result<&HostKernel> {
        self.program
            .kernels
            .get(handle.0 as usize)
            .ok_or_else(|| anyhow!("unknown kernel handle {}", handle.0))
    }

    /// Buffers currently allocated and not yet released.
    pub fn live_buffers(&self) -> usize {
        self.lock().map(|s| s.buffers.len()).unwrap_or(0)
    }

    /// Buffers ever allocated by this backend.
    pub fn total_allocations(&self) -> usize {
        self.lock().map(|s| s.allocations).unwrap_or(0)
    }

    pub fn buffer_label(&self, handle: &BufferHandle) -> Option<String> {
        self.lock()
            .ok()
            .and_then(|s| s.buffers.get(&handle.buffer_id).map(|b| b.label.clone()))
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.lock().map(|s| s.events.clone()).unwrap_or_default()
    }

    pub fn dispatches(&self) -> Vec<DispatchRecord> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HostEvent::Dispatch(record) => Some(record),
                HostEvent::Barrier => None,
            })
            .collect()
    }

    pub fn clear_events(&self) {
        if let Ok(mut state) = self.lock() {
            state.events.clear();
        }
    }

    /// Let `count` more dispatches succeed, then fail every dispatch after them.
    pub fn fail_dispatch_after(&self, count: usize) {
        if let Ok(mut state) = self.lock() {
            state.fail_after = Some(count);
        }
    }

    fn gather(
        state: &HostState,
        kernel: &HostKernel,
        handle: KernelHandle,
    ) -> Result<(HostBindings, Vec<(BufferSlot, u64)>)> {
        let mut views = HostBindings::default();
        let mut bound = Vec::with_capacity(kernel.slots.len());
        for &slot in &kernel.slots {
            let id = *state.bindings.get(&(handle, slot)).ok_or_else(|| {
                anyhow!("{}: no buffer bound to slot {:?}", kernel.name, slot)
            })?;
            ensure!(
                bound.iter().all(|&(_, other)| other != id),
                "{}: buffer {} bound to more than one slot",
                kernel.name,
                id
            );
            let buffer = state
                .buffers
                .get(&id)
                .ok_or_else(|| anyhow!("{}: buffer {} was released", kernel.name, id))?;
            let size = state.params.size as usize;
            match (slot, &buffer.storage) {
                (BufferSlot::TwiddleTable, HostStorage::Twiddles(data)) => {
                    let stages = state.params.size.trailing_zeros() as usize;
                    ensure!(
                        data.len() == stages * size,
                        "{}: twiddle table holds {} entries, size {} needs {}",
                        kernel.name,
                        data.len(),
                        size,
                        stages * size
                    );
                    views.twiddles = data.clone();
                }
                (BufferSlot::Grid, HostStorage::Complex(data))
                | (BufferSlot::PingPong, HostStorage::Complex(data)) => {
                    ensure!(
                        data.len() == size * size,
                        "{}: {:?} holds {} cells, size {} needs {}",
                        kernel.name,
                        slot,
                        data.len(),
                        size,
                        size * size
                    );
                    if slot == BufferSlot::Grid {
                        views.grid = data.clone();
                    } else {
                        views.ping_pong = data.clone();
                    }
                }
                _ => {
                    return Err(anyhow!(
                        "{}: buffer '{}' has the wrong format for slot {:?}",
                        kernel.name,
                        buffer.label,
                        slot
                    ))
                }
            }
            bound.push((slot, id));
        }
        Ok((views, bound))
    }

    fn commit(state: &mut HostState, output: HostBindings, bound: &[(BufferSlot, u64)]) {
        let mut output = output;
        for &(slot, id) in bound {
            let Some(buffer) = state.buffers.get_mut(&id) else {
                continue;
            };
            match (slot, &mut buffer.storage) {
                (BufferSlot::TwiddleTable, HostStorage::Twiddles(data)) => {
                    *data = std::mem::take(&mut output.twiddles);
                }
                (BufferSlot::Grid, HostStorage::Complex(data)) => {
                    *data = std::mem::take(&mut output.grid);
                }
                (BufferSlot::PingPong, HostStorage::Complex(data)) => {
                    *data = std::mem::take(&mut output.ping_pong);
                }
                _ => {}
            }
        }
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::ifft(DEFAULT_LOCAL_GROUP_SIZE)
    }
}

impl ComputeBackend for HostBackend {
    fn find_kernel(&self, name: &str) -> Option<KernelHandle> {
        self.program
            .kernels
            .iter()
            .position(|k| k.name == name)
            .map(|idx| KernelHandle(idx as u32))
    }

    fn workgroup_size(&self, kernel: KernelHandle) -> [u32; 3] {
        self.kernel(kernel)
            .map(|k| k.workgroup_size)
            .unwrap_or([1, 1, 1])
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<BufferHandle> {
        ensure!(!desc.is_empty(), "{}: zero-sized buffer", desc.label);
        let storage = match desc.format {
            BufferFormat::ComplexF32 => {
                HostStorage::Complex(vec![Complex32::new(0.0, 0.0); desc.len()])
            }
            BufferFormat::TwiddleEntry => {
                HostStorage::Twiddles(vec![TwiddleEntry::default(); desc.len()])
            }
        };
        let mut state = self.lock()?;
        let id = state.next_id;
        state.next_id += 1;
        state.allocations += 1;
        state.buffers.insert(
            id,
            HostBuffer {
                label: desc.label.clone(),
                storage,
            },
        );
        Ok(BufferHandle {
            buffer_id: id,
            width: desc.width,
            height: desc.height,
            format: desc.format,
        })
    }

    fn release_buffer(&self, handle: &BufferHandle) {
        if let Ok(mut state) = self.lock() {
            state.buffers.remove(&handle.buffer_id);
            state.bindings.retain(|_, id| *id != handle.buffer_id);
        }
    }

    fn write_buffer(&self, handle: &BufferHandle, bytes: &[u8]) -> Result<()> {
        let mut state = self.lock()?;
        let buffer = state
            .buffers
            .get_mut(&handle.buffer_id)
            .ok_or_else(|| anyhow!("write_buffer: unknown buffer {}", handle.buffer_id))?;
        match &mut buffer.storage {
            HostStorage::Complex(data) => {
                ensure!(
                    bytes.len() == std::mem::size_of_val(data.as_slice()),
                    "write_buffer: {} bytes for '{}'",
                    bytes.len(),
                    buffer.label
                );
                *data = bytemuck::pod_collect_to_vec(bytes);
            }
            HostStorage::Twiddles(data) => {
                ensure!(
                    bytes.len() == std::mem::size_of_val(data.as_slice()),
                    "write_buffer: {} bytes for '{}'",
                    bytes.len(),
                    buffer.label
                );
                *data = bytemuck::pod_collect_to_vec(bytes);
            }
        }
        Ok(())
    }

    fn read_buffer(&self, handle: &BufferHandle) -> Result<Vec<u8>> {
        let state = self.lock()?;
        let buffer = state
            .buffers
            .get(&handle.buffer_id)
            .ok_or_else(|| anyhow!("read_buffer: unknown buffer {}", handle.buffer_id))?;
        Ok(match &buffer.storage {
            HostStorage::Complex(data) => bytemuck::cast_slice(data).to_vec(),
            HostStorage::Twiddles(data) => bytemuck::cast_slice(data).to_vec(),
        })
    }

    fn bind_buffer(&self, kernel: KernelHandle, slot: BufferSlot, handle: &BufferHandle) -> Result<()> {
        self.kernel(kernel)?;
        let mut state = self.lock()?;
        ensure!(
            state.buffers.contains_key(&handle.buffer_id),
            "bind_buffer: unknown buffer {}",
            handle.buffer_id
        );
        state.bindings.insert((kernel, slot), handle.buffer_id);
        Ok(())
    }

    fn set_scalar(&self, slot: ScalarSlot, value: ScalarValue) -> Result<()> {
        self.lock()?.params.set(slot, value);
        Ok(())
    }

    fn dispatch(&self, handle: KernelHandle, groups: [u32; 3]) -> Result<()> {
        let kernel = self.kernel(handle)?;
        let mut state = self.lock()?;
        if let Some(remaining) = state.fail_after {
            if remaining == 0 {
                return Err(anyhow!("{}: injected dispatch failure", kernel.name));
            }
            state.fail_after = Some(remaining - 1);
        }

        let (input, bound) = Self::gather(&state, kernel, handle)?;
        let mut output = input.clone();
        let params = state.params;
        let [wx, wy, wz] = kernel.workgroup_size;
        for gz in 0..groups[2] {
            for gy in 0..groups[1] {
                for gx in 0..groups[0] {
                    for lz in 0..wz {
                        for ly in 0..wy {
                            for lx in 0..wx {
                                let gid = [gx * wx + lx, gy * wy + ly, gz * wz + lz];
                                (kernel.run)(&params, &input, &mut output, gid);
                            }
                        }
                    }
                }
            }
        }
        Self::commit(&mut state, output, &bound);
        state.events.push(HostEvent::Dispatch(DispatchRecord {
            kernel: kernel.name.clone(),
            groups,
            params,
            bindings: bound,
        }));
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        self.lock()?.events.push(HostEvent::Barrier);
        Ok(())
    }

    fn device_info(&self) -> String {
        format!("in-process host backend ({} kernels)", self.program.kernels.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oceanfft_api::{download_grid, upload_grid};

    fn counting_kernel(
        params: &IfftParams,
        _input: &HostBindings,
        output: &mut HostBindings,
        gid: [u32; 3],
    ) {
        let size = params.size as usize;
        let (x, y) = (gid[0] as usize, gid[1] as usize);
        if x < size && y < size {
            output.grid[y * size + x] += Complex32::new(1.0, 0.0);
        }
    }

    fn program_with_counter(group: u32) -> HostProgram {
        HostProgram::empty().with_kernel("Count", [group, group, 1], &[BufferSlot::Grid], counting_kernel)
    }

    #[test]
    fn dispatch_visits_every_cell_once() {
        let backend = HostBackend::new(program_with_counter(8));
        let kernel = backend.find_kernel("Count").unwrap();
        let grid = backend
            .create_buffer(&BufferDescriptor::complex_grid("grid", 4))
            .unwrap();
        backend.bind_buffer(kernel, BufferSlot::Grid, &grid).unwrap();
        backend.set_scalar(ScalarSlot::Size, ScalarValue::U32(4)).unwrap();
        // one oversized group covers the 4×4 grid; out-of-range invocations are ignored
        backend.dispatch(kernel, [1, 1, 1]).unwrap();
        let data = download_grid(&backend, &grid).unwrap();
        assert!(data.iter().all(|c| *c == Complex32::new(1.0, 0.0)));
    }

    #[test]
    fn missing_binding_is_an_error() {
        let backend = HostBackend::new(program_with_counter(4));
        let kernel = backend.find_kernel("Count").unwrap();
        backend.set_scalar(ScalarSlot::Size, ScalarValue::U32(4)).unwrap();
        let err = backend.dispatch(kernel, [1, 1, 1]).unwrap_err();
        assert!(err.to_string().contains("no buffer bound"), "{err}");
    }

    #[test]
    fn aliased_slots_are_rejected() {
        let backend = HostBackend::ifft(4);
        let kernel = backend.find_kernel(PERMUTE_KERNEL).unwrap();
        let grid = backend
            .create_buffer(&BufferDescriptor::complex_grid("grid", 4))
            .unwrap();
        backend.bind_buffer(kernel, BufferSlot::Grid, &grid).unwrap();
        backend.bind_buffer(kernel, BufferSlot::PingPong, &grid).unwrap();
        backend.set_scalar(ScalarSlot::Size, ScalarValue::U32(4)).unwrap();
        assert!(backend.dispatch(kernel, [1, 1, 1]).is_err());
    }

    #[test]
    fn injected_failures_start_after_count() {
        let backend = HostBackend::new(program_with_counter(4));
        let kernel = backend.find_kernel("Count").unwrap();
        let grid = backend
            .create_buffer(&BufferDescriptor::complex_grid("grid", 4))
            .unwrap();
        backend.bind_buffer(kernel, BufferSlot::Grid, &grid).unwrap();
        backend.set_scalar(ScalarSlot::Size, ScalarValue::U32(4)).unwrap();
        backend.fail_dispatch_after(1);
        assert!(backend.dispatch(kernel, [1, 1, 1]).is_ok());
        assert!(backend.dispatch(kernel, [1, 1, 1]).is_err());
        assert!(backend.dispatch(kernel, [1, 1, 1]).is_err());
        assert_eq!(backend.dispatches().len(), 1);
    }

    #[test]
    fn buffers_round_trip_and_release() {
        let backend = HostBackend::default();
        let grid = backend
            .create_buffer(&BufferDescriptor::complex_grid("grid", 2))
            .unwrap();
        let data = vec![
            Complex32::new(1.0, -1.0),
            Complex32::new(2.0, 0.5),
            Complex32::new(0.0, 3.0),
            Complex32::new(-4.0, 0.0),
        ];
        upload_grid(&backend, &grid, &data).unwrap();
        assert_eq!(download_grid(&backend, &grid).unwrap(), data);
        assert!(upload_grid(&backend, &grid, &data[..3]).is_err());

        assert_eq!(backend.live_buffers(), 1);
        assert_eq!(backend.buffer_label(&grid).as_deref(), Some("grid"));
        backend.release_buffer(&grid);
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(backend.buffer_label(&grid), None);
        assert_eq!(backend.total_allocations(), 1);
        assert!(download_grid(&backend, &grid).is_err());
    }

    #[test]
    fn program_lists_ifft_entry_points() {
        let program = HostProgram::ifft(8);
        let names: Vec<&str> = program.kernel_names().collect();
        assert_eq!(
            names,
            vec![
                PRECOMPUTE_KERNEL,
                HORIZONTAL_STEP_KERNEL,
                VERTICAL_STEP_KERNEL,
                PERMUTE_KERNEL
            ]
        );
        let partial = HostProgram::ifft(8).without(PERMUTE_KERNEL);
        assert_eq!(partial.kernel_names().count(), 3);
    }
}
