pub mod bindings;
pub mod config;
pub mod dispatch;
pub mod pipelines;
pub mod provider;
pub mod shaders;

pub use provider::{WgpuBackend, WgpuBackendOptions};
