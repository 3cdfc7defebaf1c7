use anyhow::{anyhow, ensure, Result};
use futures::channel::oneshot;
use log::{debug, error, info};
use oceanfft_api::{
    BufferDescriptor, BufferHandle, BufferSlot, ComputeBackend, IfftParams, KernelHandle,
    ScalarSlot, ScalarValue,
};
use pollster::block_on;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use wgpu::util::DeviceExt;

use crate::backend::wgpu::config::{clamp_local_group_size, PARAMS_BINDING};
use crate::backend::wgpu::dispatch::common::{encode_dispatch, submit};
use crate::backend::wgpu::pipelines::{IfftPipelines, KernelPipeline};
use crate::config::DEFAULT_LOCAL_GROUP_SIZE;

#[derive(Clone, Debug)]
pub struct WgpuBackendOptions {
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
    /// Requested edge length of the square local group; clamped to device limits.
    pub local_group_size: u32,
}

impl Default for WgpuBackendOptions {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            local_group_size: DEFAULT_LOCAL_GROUP_SIZE,
        }
    }
}

struct BufferEntry {
    buffer: Arc<wgpu::Buffer>,
    size_bytes: u64,
    label: String,
}

#[derive(Default)]
struct WgpuState {
    next_id: u64,
    buffers: HashMap<u64, BufferEntry>,
    bindings: HashMap<(KernelHandle, BufferSlot), u64>,
    params: IfftParams,
}

/// IFFT program compiled for a wgpu device.
///
/// Dispatches are submitted without waiting; [`ComputeBackend::barrier`]
/// blocks until the queue is idle.
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_info: wgpu::AdapterInfo,
    pipelines: IfftPipelines,
    state: Mutex<WgpuState>,
}

impl WgpuBackend {
    pub fn new(opts: WgpuBackendOptions) -> Result<Self> {
        block_on(Self::new_async(opts))
    }

    pub async fn new_async(opts: WgpuBackendOptions) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: opts.power_preference,
                force_fallback_adapter: opts.force_fallback_adapter,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| anyhow!("wgpu: no compatible adapter found"))?;
        let adapter_info = adapter.get_info();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("OceanFFT WGPU Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await?;
        Self::from_device(
            Arc::new(device),
            Arc::new(queue),
            adapter_info,
            opts.local_group_size,
        )
    }

    /// Compile the IFFT program on an existing device.
    pub fn from_device(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        adapter_info: wgpu::AdapterInfo,
        local_group_size: u32,
    ) -> Result<Self> {
        install_device_error_handlers(&device);
        let local_group_size = clamp_local_group_size(local_group_size, &device.limits());

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipelines = IfftPipelines::new(&device, local_group_size);
        if let Some(err) = block_on(device.pop_error_scope()) {
            return Err(anyhow!("wgpu: failed to build IFFT pipelines: {err}"));
        }
        info!(
            "WGPU adapter '{}' ready: backend={:?} local_group={}",
            adapter_info.name, adapter_info.backend, local_group_size
        );
        Ok(Self {
            device,
            queue,
            adapter_info,
            pipelines,
            state: Mutex::new(WgpuState {
                next_id: 1,
                ..WgpuState::default()
            }),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn local_group_size(&self) -> u32 {
        self.pipelines.local_group_size
    }

    fn lock(&self) -> Result<MutexGuard<'_, WgpuState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("wgpu backend state poisoned"))
    }

    fn kernel(&self, handle: KernelHandle) -> Result<&KernelPipeline> {
        self.pipelines
            .get(handle.0 as usize)
            .ok_or_else(|| anyhow!("unknown kernel handle {}", handle.0))
    }

    fn buffer(&self, id: u64) -> Result<(Arc<wgpu::Buffer>, u64)> {
        let state = self.lock()?;
        let entry = state
            .buffers
            .get(&id)
            .ok_or_else(|| anyhow!("unknown buffer {id}"))?;
        Ok((entry.buffer.clone(), entry.size_bytes))
    }

    async fn map_readback_bytes(&self, staging: wgpu::Buffer, size_bytes: u64) -> Result<Vec<u8>> {
        let slice = staging.slice(..);
        let (tx, rx) = oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device.poll(wgpu::Maintain::Wait);
        let map_result = rx
            .await
            .map_err(|_| anyhow!("read_buffer: map_async callback dropped"))?;
        map_result.map_err(|e: wgpu::BufferAsyncError| anyhow!(e))?;
        let data = slice.get_mapped_range();
        let mut out = vec![0u8; size_bytes as usize];
        out.copy_from_slice(&data);
        drop(data);
        staging.unmap();
        Ok(out)
    }
}

impl ComputeBackend for WgpuBackend {
    fn find_kernel(&self, name: &str) -> Option<KernelHandle> {
        self.pipelines
            .position(name)
            .map(|idx| KernelHandle(idx as u32))
    }

    fn workgroup_size(&self, kernel: KernelHandle) -> [u32; 3] {
        self.kernel(kernel)
            .map(|k| k.workgroup_size)
            .unwrap_or([1, 1, 1])
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<BufferHandle> {
        let size_bytes = desc.size_bytes();
        ensure!(size_bytes > 0, "{}: zero-sized buffer", desc.label);
        let max = self.device.limits().max_storage_buffer_binding_size as u64;
        ensure!(
            size_bytes <= max,
            "{}: {} bytes exceeds the device storage binding limit of {}",
            desc.label,
            size_bytes,
            max
        );
        // wgpu zero-initializes new buffers.
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size: size_bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut state = self.lock()?;
        let id = state.next_id;
        state.next_id += 1;
        state.buffers.insert(
            id,
            BufferEntry {
                buffer: Arc::new(buffer),
                size_bytes,
                label: desc.label.clone(),
            },
        );
        debug!("wgpu create_buffer id={} label={} bytes={}", id, desc.label, size_bytes);
        Ok(BufferHandle {
            buffer_id: id,
            width: desc.width,
            height: desc.height,
            format: desc.format,
        })
    }

    fn release_buffer(&self, handle: &BufferHandle) {
        if let Ok(mut state) = self.lock() {
            if let Some(entry) = state.buffers.remove(&handle.buffer_id) {
                debug!("wgpu release_buffer id={} label={}", handle.buffer_id, entry.label);
            }
            state.bindings.retain(|_, id| *id != handle.buffer_id);
        }
    }

    fn write_buffer(&self, handle: &BufferHandle, bytes: &[u8]) -> Result<()> {
        let (buffer, size_bytes) = self.buffer(handle.buffer_id)?;
        ensure!(
            bytes.len() as u64 == size_bytes,
            "write_buffer: {} bytes for a {} byte buffer",
            bytes.len(),
            size_bytes
        );
        self.queue.write_buffer(&buffer, 0, bytes);
        Ok(())
    }

    fn read_buffer(&self, handle: &BufferHandle) -> Result<Vec<u8>> {
        let (buffer, size_bytes) = self.buffer(handle.buffer_id)?;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("oceanfft-readback"),
            size: size_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut enc = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("oceanfft-readback-encoder"),
            });
        enc.copy_buffer_to_buffer(&buffer, 0, &staging, 0, size_bytes);
        submit(&self.device, &self.queue, enc);
        block_on(self.map_readback_bytes(staging, size_bytes))
    }

    fn bind_buffer(&self, kernel: KernelHandle, slot: BufferSlot, handle: &BufferHandle) -> Result<()> {
        let pipeline = self.kernel(kernel)?;
        ensure!(
            pipeline.slots.contains(&slot),
            "{} has no {:?} binding",
            pipeline.name,
            slot
        );
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
        let (bound, params) = {
            let state = self.lock()?;
            let mut bound: Vec<(u32, u64, Arc<wgpu::Buffer>)> = Vec::with_capacity(kernel.slots.len());
            for &slot in kernel.slots {
                let id = *state
                    .bindings
                    .get(&(handle, slot))
                    .ok_or_else(|| anyhow!("{}: no buffer bound to slot {:?}", kernel.name, slot))?;
                ensure!(
                    bound.iter().all(|(_, other, _)| *other != id),
                    "{}: buffer {} bound to more than one slot",
                    kernel.name,
                    id
                );
                let entry = state
                    .buffers
                    .get(&id)
                    .ok_or_else(|| anyhow!("{}: buffer {} was released", kernel.name, id))?;
                bound.push((slot.binding(), id, entry.buffer.clone()));
            }
            (bound, state.params)
        };

        // Each dispatch gets its own uniform block so queued passes keep their parameters.
        let uniform = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("oceanfft-params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let mut entries: Vec<wgpu::BindGroupEntry> = bound
            .iter()
            .map(|(binding, _, buffer)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: PARAMS_BINDING,
            resource: uniform.as_entire_binding(),
        });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.name),
            layout: &kernel.bundle.layout,
            entries: &entries,
        });
        let enc = encode_dispatch(
            &self.device,
            kernel.name,
            &kernel.bundle.pipeline,
            &bind_group,
            groups,
        );
        self.queue.submit(Some(enc.finish()));
        if let Some(err) = block_on(self.device.pop_error_scope()) {
            return Err(anyhow!("{}: {err}", kernel.name));
        }
        log::trace!(
            "wgpu dispatch {} groups={:?} step={} ping_pong={}",
            kernel.name,
            groups,
            params.step,
            params.ping_pong
        );
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn device_info(&self) -> String {
        format!(
            "{} ({:?}, {:?})",
            self.adapter_info.name, self.adapter_info.backend, self.adapter_info.device_type
        )
    }
}

fn install_device_error_handlers(device: &wgpu::Device) {
    device.on_uncaptured_error(Box::new(|error| {
        error!("WGPU uncaptured error: {:?}", error);
    }));
}
