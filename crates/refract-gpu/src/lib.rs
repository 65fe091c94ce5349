//! Vulkan helpers for the Refract engine.
//!
//! This crate provides:
//! - GPU error types
//! - Buffer allocation via gpu-allocator
//! - Single-time command submission and staged uploads
//! - Ray tracing pipeline property queries

pub mod capabilities;
pub mod command;
pub mod error;
pub mod memory;

pub use capabilities::RayTracingProperties;
pub use command::{execute_single_time_commands, upload_staged, CommandPool};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer};
