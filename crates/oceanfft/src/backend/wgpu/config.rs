use log::warn;

/// Placeholder in the WGSL source replaced by the local group edge length.
pub const WORKGROUP_SENTINEL: &str = "@WG@";

/// Binding index of the `Params` uniform block in every entry point.
pub const PARAMS_BINDING: u32 = 3;

/// Largest power of two `<= requested` whose square group fits the device limits.
///
/// Steps and permute run `g × g` groups and precompute runs `1 × g`, so the
/// edge length has to satisfy both axes and the total invocation limit.
pub fn clamp_local_group_size(requested: u32, limits: &wgpu::Limits) -> u32 {
    let max_x = normalize_dim(limits.max_compute_workgroup_size_x, 256);
    let max_y = normalize_dim(limits.max_compute_workgroup_size_y, 256);
    let max_invocations = normalize_dim(limits.max_compute_invocations_per_workgroup, 256);

    let mut value = floor_power_of_two(requested.max(1));
    while value > 1 && (value > max_x || value > max_y || value * value > max_invocations) {
        value /= 2;
    }
    if value != requested {
        warn!(
            "local group size {} not supported by device (max {}x{}, {} invocations); using {}",
            requested, max_x, max_y, max_invocations, value
        );
    }
    value
}

fn normalize_dim(value: u32, fallback: u32) -> u32 {
    if value == 0 {
        fallback
    } else {
        value
    }
}

fn floor_power_of_two(value: u32) -> u32 {
    if value == 0 {
        0
    } else {
        1 << (31 - value.leading_zeros())
    }
}
