use oceanfft_api::{
    BufferSlot, HORIZONTAL_STEP_KERNEL, PERMUTE_KERNEL, PRECOMPUTE_KERNEL, VERTICAL_STEP_KERNEL,
};
use std::borrow::Cow;

use crate::backend::wgpu::bindings::build_ifft_bgl;
use crate::backend::wgpu::shaders::ifft::ifft_shader;

pub struct PipelineBundle {
    pub pipeline: wgpu::ComputePipeline,
    pub layout: wgpu::BindGroupLayout,
}

/// One compiled entry point of the IFFT module.
pub struct KernelPipeline {
    pub name: &'static str,
    pub workgroup_size: [u32; 3],
    pub slots: &'static [BufferSlot],
    pub bundle: PipelineBundle,
}

const PRECOMPUTE_SLOTS: &[BufferSlot] = &[BufferSlot::TwiddleTable];
const STEP_SLOTS: &[BufferSlot] = &[BufferSlot::TwiddleTable, BufferSlot::Grid, BufferSlot::PingPong];
const PERMUTE_SLOTS: &[BufferSlot] = &[BufferSlot::Grid, BufferSlot::PingPong];

pub struct IfftPipelines {
    pub local_group_size: u32,
    pub kernels: Vec<KernelPipeline>,
}

impl IfftPipelines {
    pub fn new(device: &wgpu::Device, local_group_size: u32) -> Self {
        let g = local_group_size;
        let source = ifft_shader(g);
        let module = create_shader_module(device, "oceanfft-ifft-shader", &source);
        let kernels = [
            (PRECOMPUTE_KERNEL, [1, g, 1], PRECOMPUTE_SLOTS),
            (HORIZONTAL_STEP_KERNEL, [g, g, 1], STEP_SLOTS),
            (VERTICAL_STEP_KERNEL, [g, g, 1], STEP_SLOTS),
            (PERMUTE_KERNEL, [g, g, 1], PERMUTE_SLOTS),
        ]
        .into_iter()
        .map(|(name, workgroup_size, slots)| KernelPipeline {
            name,
            workgroup_size,
            slots,
            bundle: create_pipeline(device, &module, name, slots),
        })
        .collect();
        Self {
            local_group_size,
            kernels,
        }
    }

    pub fn get(&self, index: usize) -> Option<&KernelPipeline> {
        self.kernels.get(index)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.kernels.iter().position(|k| k.name == name)
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    module: &wgpu::ShaderModule,
    entry_point: &str,
    slots: &[BufferSlot],
) -> PipelineBundle {
    let layout = build_ifft_bgl(device, &format!("oceanfft-{entry_point}-bgl"), slots);
    let pipeline_layout = create_pipeline_layout(
        device,
        &format!("oceanfft-{entry_point}-pipeline-layout"),
        &layout,
    );
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&format!("oceanfft-{entry_point}-pipeline")),
        module,
        layout: Some(&pipeline_layout),
        entry_point,
    });
    PipelineBundle { pipeline, layout }
}

pub fn create_pipeline_layout(
    device: &wgpu::Device,
    label: &str,
    bgl: &wgpu::BindGroupLayout,
) -> wgpu::PipelineLayout {
    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[bgl],
        push_constant_ranges: &[],
    })
}

pub fn create_shader_module(device: &wgpu::Device, label: &str, wgsl: &str) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(wgsl)),
    })
}
