//! Device backends implementing [`oceanfft_api::ComputeBackend`].
//!
//! The in-process backend lives in [`crate::host`] and is always available.

#[cfg(feature = "wgpu")]
pub mod wgpu;
