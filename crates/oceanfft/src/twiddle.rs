//! Twiddle factor and butterfly input index table.
//!
//! Row `s` of the table describes butterfly stage `s`: for every output
//! position it holds the twiddle factor and the two source positions that
//! feed it. Stage 0 reads its sources in bit-reversed order, which is what
//! lets the later stages run as plain block-offset pairs.

use num_complex::Complex32;
use oceanfft_api::TwiddleEntry;

use crate::error::{IfftError, Result};

/// Number of butterfly stages per axis, or `InvalidSize` for anything that is
/// not a power of two greater than one.
pub fn validate_size(size: u32) -> Result<u32> {
    if size <= 1 || !size.is_power_of_two() {
        return Err(IfftError::InvalidSize { size });
    }
    Ok(size.trailing_zeros())
}

/// Reverse the low `bits` bits of `value`.
pub fn reverse_bits(value: u32, bits: u32) -> u32 {
    if bits == 0 {
        return value;
    }
    value.reverse_bits() >> (32 - bits)
}

/// Both wings of butterfly `j` at `stage`, as `(position, entry)` pairs.
///
/// `j` ranges over `[0, size / 2)`. The top wing stores `+W`, the bottom wing
/// `-W`, with `W = exp(+2πi·k / blockSize)`; both read the same two sources.
pub fn butterfly_wings(size: u32, stage: u32, j: u32) -> [(u32, TwiddleEntry); 2] {
    let stages = size.trailing_zeros();
    let span = 1u32 << stage;
    let block = span << 1;
    let k = j % span;
    let top = (j / span) * block + k;
    let bottom = top + span;

    let angle = std::f64::consts::TAU * k as f64 / block as f64;
    let w = Complex32::new(angle.cos() as f32, angle.sin() as f32);

    let (index_a, index_b) = if stage == 0 {
        (reverse_bits(top, stages), reverse_bits(bottom, stages))
    } else {
        (top, bottom)
    };
    [
        (top, TwiddleEntry::new(w, index_a, index_b)),
        (bottom, TwiddleEntry::new(-w, index_a, index_b)),
    ]
}

/// Host copy of the `[log2(N)][N]` table.
#[derive(Debug, Clone, PartialEq)]
pub struct TwiddleTable {
    size: u32,
    stages: u32,
    entries: Vec<TwiddleEntry>,
}

impl TwiddleTable {
    pub fn compute(size: u32) -> Result<Self> {
        let stages = validate_size(size)?;
        let mut entries = vec![TwiddleEntry::default(); (stages * size) as usize];
        for stage in 0..stages {
            for j in 0..size / 2 {
                for (position, entry) in butterfly_wings(size, stage, j) {
                    entries[(stage * size + position) as usize] = entry;
                }
            }
        }
        Ok(Self {
            size,
            stages,
            entries,
        })
    }

    /// Wrap entries read back from a device, row-major by stage.
    pub fn from_entries(size: u32, entries: Vec<TwiddleEntry>) -> Result<Self> {
        let stages = validate_size(size)?;
        if entries.len() != (stages * size) as usize {
            return Err(IfftError::Device {
                context: "twiddle table readback".to_string(),
                source: anyhow::anyhow!(
                    "{} entries for a {}x{} table",
                    entries.len(),
                    stages,
                    size
                ),
            });
        }
        Ok(Self {
            size,
            stages,
            entries,
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn stages(&self) -> u32 {
        self.stages
    }

    pub fn entry(&self, stage: u32, position: u32) -> &TwiddleEntry {
        &self.entries[(stage * self.size + position) as usize]
    }

    pub fn row(&self, stage: u32) -> &[TwiddleEntry] {
        let start = (stage * self.size) as usize;
        &self.entries[start..start + self.size as usize]
    }

    pub fn entries(&self) -> &[TwiddleEntry] {
        &self.entries
    }
}
