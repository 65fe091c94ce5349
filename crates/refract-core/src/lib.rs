//! Core types and error handling for the Refract engine.
//!
//! This crate provides the foundational types shared by the shader,
//! GPU and ray-tracing crates:
//! - Shader source set and file identifiers
//! - Ray-tracing stage kinds
//! - The engine-wide error type

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{FileId, SourceSet, StageKind};

/// Engine-wide constants
pub mod constants {
    /// Include name that is replaced by the active shader group's generated file.
    pub const MAP_FUNCTION_INCLUDE: &str = "map_function";
    /// Extension appended to a shader group name to form its generated file name.
    pub const GROUP_CONTEXT_EXTENSION: &str = "glsl";
    /// Entry point of every compiled shader stage.
    pub const SHADER_ENTRY_POINT: &str = "main";
    /// Number of ray generation programs in the pipeline.
    pub const RAYGEN_COUNT: u32 = 2;
    /// Number of miss programs in the pipeline (primary, shadow).
    pub const MISS_COUNT: u32 = 2;
    /// Hit entries emitted per shader group (primary, shadow, ambient occlusion).
    pub const HIT_ENTRIES_PER_GROUP: u32 = 3;
}
