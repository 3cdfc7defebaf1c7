//! Per-cell math of the butterfly and permutation kernels.
//!
//! These are the host counterparts of the WGSL entry points; grids are
//! row-major, `index = y * size + x`.

use num_complex::Complex32;
use oceanfft_api::TwiddleEntry;

/// `a + w * b`
#[inline]
pub fn butterfly(a: Complex32, w: Complex32, b: Complex32) -> Complex32 {
    a + w * b
}

/// Output of stage `step` along a row for cell `(x, y)`.
pub fn horizontal_step(
    source: &[Complex32],
    twiddles: &[TwiddleEntry],
    size: usize,
    step: usize,
    x: usize,
    y: usize,
) -> Complex32 {
    let entry = &twiddles[step * size + x];
    let row = y * size;
    butterfly(
        source[row + entry.index_a()],
        entry.twiddle(),
        source[row + entry.index_b()],
    )
}

/// Output of stage `step` along a column for cell `(x, y)`.
pub fn vertical_step(
    source: &[Complex32],
    twiddles: &[TwiddleEntry],
    size: usize,
    step: usize,
    x: usize,
    y: usize,
) -> Complex32 {
    let entry = &twiddles[step * size + y];
    butterfly(
        source[entry.index_a() * size + x],
        entry.twiddle(),
        source[entry.index_b() * size + x],
    )
}

/// `(-1)^(x + y)`
#[inline]
pub fn checkerboard_sign(x: usize, y: usize) -> f32 {
    if (x + y) % 2 == 0 {
        1.0
    } else {
        -1.0
    }
}

pub fn permute(value: Complex32, x: usize, y: usize, scale: f32) -> Complex32 {
    value * (checkerboard_sign(x, y) * scale)
}
