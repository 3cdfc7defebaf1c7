use oceanfft_api::BufferFormat;
use thiserror::Error;

/// Errors surfaced by the transform component.
///
/// None of these are retried: a half-finished butterfly network leaves the
/// grid numerically meaningless, so the first failure ends the invocation.
#[derive(Error, Debug)]
pub enum IfftError {
    #[error("invalid transform size {size}: expected a power of two greater than 1")]
    InvalidSize { size: u32 },

    #[error("kernel '{name}' not found in compute program")]
    KernelNotFound { name: &'static str },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("grid is {width}x{height} {format:?}, expected a {expected}x{expected} complex grid")]
    GridMismatch {
        expected: u32,
        width: u32,
        height: u32,
        format: BufferFormat,
    },

    #[error("device error during {context}: {source}")]
    Device {
        context: String,
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, IfftError>;

pub(crate) trait DeviceResultExt<T> {
    fn device_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> DeviceResultExt<T> for anyhow::Result<T> {
    fn device_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| IfftError::Device {
            context: context(),
            source,
        })
    }
}
