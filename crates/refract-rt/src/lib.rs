//! Hardware ray tracing pipeline for the Refract engine.
//!
//! This crate turns the live program set of `refract-shaders` into a
//! `VK_KHR_ray_tracing_pipeline` pipeline and its shader binding table, and
//! rebuilds both whenever a shader commit asks for it.
//!
//! # Example
//!
//! ```ignore
//! use refract_rt::{RayTracePipeline, Raygen};
//!
//! // Once per frame, before recording ray tracing work.
//! let rebuilt = shader_system.step(&mut pipeline.rebuilder(&mut allocator))?;
//! unsafe {
//!     if rebuilt {
//!         pipeline.record_upload_barrier(cmd);
//!     }
//!     pipeline.record_trace(cmd, Raygen::Narrow, width, height);
//! }
//! ```

pub mod pipeline;
pub mod sbt;

pub use pipeline::{shader_groups, PipelineRebuild, RayTracePipeline, Raygen, MAX_RECURSION_DEPTH};
pub use sbt::{align, SbtLayout, ShaderBindingTable};
