//! Shader system error types.

use refract_gpu::GpuError;
use thiserror::Error;

/// Errors that stop the shader system.
///
/// Broken shader source is not one of them: see [`CompileError`].
#[derive(Error, Debug)]
pub enum ShaderError {
    /// Filesystem or source data error.
    #[error(transparent)]
    Core(#[from] refract_core::Error),

    /// Device failure while creating shader modules or rebuilding the pipeline.
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// A program's source file exists in neither source set.
    #[error("Shader source not found: {0}")]
    MissingSource(String),

    /// The blocking startup compile left at least one program broken.
    #[error("Initial shader compile failed:\n{0}")]
    InitialCompile(String),

    /// The compile worker pool could not be created.
    #[error("Failed to create shader worker pool: {0}")]
    ThreadPool(String),

    /// A compilation wave is already in flight.
    #[error("A shader compilation wave is already in flight")]
    Busy,
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, ShaderError>;

/// Failure of a single program compile.
#[derive(Error, Debug)]
pub enum CompileError {
    /// Source did not compile, or an include could not be resolved.
    #[error("{0}")]
    Source(String),

    /// The compiled code could not be turned into a shader module.
    #[error("Device error: {0}")]
    Device(GpuError),
}
