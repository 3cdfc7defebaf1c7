//! Transform configuration
//!
//! The local work-group size only changes how each pass is partitioned into
//! groups; it never changes the result.

use serde::{Deserialize, Serialize};

pub const DEFAULT_LOCAL_GROUP_SIZE: u32 = 8;
/// 16×16 invocations is the portable per-group limit of WebGPU-class devices.
pub const MAX_LOCAL_GROUP_SIZE: u32 = 16;

pub const ENV_LOCAL_GROUP_SIZE: &str = "OCEANFFT_LOCAL_GROUP_SIZE";
pub const ENV_NORMALIZATION: &str = "OCEANFFT_NORMALIZATION";

/// Scaling folded into the permutation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Normalization {
    /// Unscaled inverse DFT; a forward/inverse round trip gains a factor of N².
    #[default]
    None,
    /// Multiply by 1/N² so the transform inverts an unscaled forward FFT.
    InverseSquare,
}

impl Normalization {
    pub fn scale(self, size: u32) -> f32 {
        match self {
            Normalization::None => 1.0,
            Normalization::InverseSquare => {
                let n = size as f64;
                (1.0 / (n * n)) as f32
            }
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Some(Normalization::None),
            "inverse-square" | "inverse_square" | "1/n2" => Some(Normalization::InverseSquare),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct IfftConfig {
    /// Edge length of the square local work-group used by the step and permute kernels.
    pub local_group_size: u32,
    pub normalization: Normalization,
}

impl Default for IfftConfig {
    fn default() -> Self {
        Self {
            local_group_size: DEFAULT_LOCAL_GROUP_SIZE,
            normalization: Normalization::None,
        }
    }
}

impl IfftConfig {
    /// Defaults overridden by `OCEANFFT_LOCAL_GROUP_SIZE` and `OCEANFFT_NORMALIZATION`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_LOCAL_GROUP_SIZE) {
            match raw.trim().parse::<u32>() {
                Ok(parsed) if parsed > 0 => config.local_group_size = parsed,
                _ => log::warn!(
                    "{}='{}' is not a positive integer; using {}",
                    ENV_LOCAL_GROUP_SIZE,
                    raw,
                    config.local_group_size
                ),
            }
        }
        if let Some(raw) = lookup(ENV_NORMALIZATION) {
            match Normalization::parse(&raw) {
                Some(normalization) => config.normalization = normalization,
                None => log::warn!(
                    "{}='{}' not recognized (expected none|inverse-square); using {:?}",
                    ENV_NORMALIZATION,
                    raw,
                    config.normalization
                ),
            }
        }
        config
    }

    pub fn with_local_group_size(mut self, local_group_size: u32) -> Self {
        self.local_group_size = local_group_size;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.local_group_size == 0 {
            return Err("local group size must be > 0".to_string());
        }
        if !self.local_group_size.is_power_of_two() {
            return Err(format!(
                "local group size {} must be a power of two",
                self.local_group_size
            ));
        }
        if self.local_group_size > MAX_LOCAL_GROUP_SIZE {
            return Err(format!(
                "local group size {} exceeds {}",
                self.local_group_size, MAX_LOCAL_GROUP_SIZE
            ));
        }
        Ok(())
    }
}
