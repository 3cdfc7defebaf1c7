use oceanfft_api::BufferSlot;
use wgpu::{BindGroupLayoutEntry, BindingType, BufferBindingType, ShaderStages};

use crate::backend::wgpu::config::PARAMS_BINDING;

pub fn storage_read_write_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub fn uniform_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Layout entries for an entry point using `slots` plus the params uniform.
///
/// All three storage buffers are declared `read_write` in the shader module,
/// so the layout has to match even where an entry point only reads.
pub fn ifft_layout_entries(slots: &[BufferSlot]) -> Vec<BindGroupLayoutEntry> {
    let mut entries: Vec<BindGroupLayoutEntry> = slots
        .iter()
        .map(|slot| storage_read_write_entry(slot.binding()))
        .collect();
    entries.push(uniform_entry(PARAMS_BINDING));
    entries
}

pub fn build_ifft_bgl(device: &wgpu::Device, label: &str, slots: &[BufferSlot]) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &ifft_layout_entries(slots),
    })
}
