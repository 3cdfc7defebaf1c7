use crate::backend::wgpu::config::WORKGROUP_SENTINEL;

/// The four IFFT entry points in one module. `@WG@` is the local group edge length.
pub const IFFT_SHADER: &str = r#"
const TAU: f32 = 6.283185307179586;

struct TwiddleEntry {
    twiddle: vec2<f32>,
    indices: vec2<u32>,
};

struct Params {
    size: u32,
    step: u32,
    ping_pong: u32,
    scale: f32,
};

@group(0) @binding(0) var<storage, read_write> PrecomputeBuffer: array<TwiddleEntry>;
@group(0) @binding(1) var<storage, read_write> Buffer0: array<vec2<f32>>;
@group(0) @binding(2) var<storage, read_write> Buffer1: array<vec2<f32>>;
@group(0) @binding(3) var<uniform> params: Params;

fn complex_mul(a: vec2<f32>, b: vec2<f32>) -> vec2<f32> {
    return vec2<f32>(a.x * b.x - a.y * b.y, a.x * b.y + a.y * b.x);
}

@compute @workgroup_size(1, @WG@, 1)
fn PrecomputeTwiddleFactorsAndIndices(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = params.size;
    let stages = countTrailingZeros(size);
    let stage = id.x;
    let j = id.y;
    if (stage >= stages || j >= size / 2u) {
        return;
    }
    let span = 1u << stage;
    let block = span << 1u;
    let k = j % span;
    let top = (j / span) * block + k;
    let bottom = top + span;

    let angle = TAU * f32(k) / f32(block);
    let w = vec2<f32>(cos(angle), sin(angle));

    var indices = vec2<u32>(top, bottom);
    if (stage == 0u) {
        indices = reverseBits(indices) >> vec2<u32>(32u - stages);
    }
    PrecomputeBuffer[stage * size + top] = TwiddleEntry(w, indices);
    PrecomputeBuffer[stage * size + bottom] = TwiddleEntry(-w, indices);
}

@compute @workgroup_size(@WG@, @WG@, 1)
fn HorizontalStep(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = params.size;
    if (id.x >= size || id.y >= size) {
        return;
    }
    let entry = PrecomputeBuffer[params.step * size + id.x];
    let row = id.y * size;
    let index = row + id.x;
    if (params.ping_pong == 0u) {
        Buffer1[index] = Buffer0[row + entry.indices.x]
            + complex_mul(entry.twiddle, Buffer0[row + entry.indices.y]);
    } else {
        Buffer0[index] = Buffer1[row + entry.indices.x]
            + complex_mul(entry.twiddle, Buffer1[row + entry.indices.y]);
    }
}

@compute @workgroup_size(@WG@, @WG@, 1)
fn VerticalStep(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = params.size;
    if (id.x >= size || id.y >= size) {
        return;
    }
    let entry = PrecomputeBuffer[params.step * size + id.y];
    let index = id.y * size + id.x;
    let a = entry.indices.x * size + id.x;
    let b = entry.indices.y * size + id.x;
    if (params.ping_pong == 0u) {
        Buffer1[index] = Buffer0[a] + complex_mul(entry.twiddle, Buffer0[b]);
    } else {
        Buffer0[index] = Buffer1[a] + complex_mul(entry.twiddle, Buffer1[b]);
    }
}

@compute @workgroup_size(@WG@, @WG@, 1)
fn Permute(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = params.size;
    if (id.x >= size || id.y >= size) {
        return;
    }
    let index = id.y * size + id.x;
    var value = Buffer0[index];
    if (params.ping_pong != 0u) {
        value = Buffer1[index];
    }
    let sign = 1.0 - 2.0 * f32((id.x + id.y) % 2u);
    Buffer0[index] = value * (sign * params.scale);
}
"#;

/// [`IFFT_SHADER`] with the local group size filled in.
pub fn ifft_shader(local_group_size: u32) -> String {
    IFFT_SHADER.replace(WORKGROUP_SENTINEL, &local_group_size.to_string())
}
