//! Live shader compilation for the Refract engine.
//!
//! Shader sources are loaded from an engine and a scene directory into a
//! [`SourceRegistry`] the editor can change at any time. Each frame,
//! [`ShaderSystem::step`] commits a finished compilation wave and starts a
//! new one for pending edits:
//!
//! - the planner picks every program whose source or recorded includes are dirty
//! - the coordinator compiles them on a worker pool, one wave at a time
//! - the commit protocol swaps modules in and rebuilds the pipeline only when
//!   every recently changed program compiled
//!
//! With the `shaderc` feature, [`ShadercBackend`] compiles GLSL to Vulkan
//! shader modules.

pub mod commit;
pub mod compiler;
pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod planner;
pub mod program;
pub mod resolve;
#[cfg(feature = "shaderc")]
pub mod shaderc_backend;
pub mod source;
pub mod system;

#[cfg(test)]
mod test_support;

pub use commit::{commit_wave, CommitOutcome, PipelineTarget};
pub use compiler::{compile_program, CompileOutput, CompileRequest, IncludedSource, ShaderBackend};
pub use config::{CompileSettings, Optimization, ShaderFileNames, ShaderSystemConfig};
pub use coordinator::{CompileCoordinator, CoordinatorState, JobResult, WaveResult};
pub use directory::ShaderDirectory;
pub use error::{CompileError, Result, ShaderError};
pub use planner::{plan, plan_all, plan_wave, PlannedWave, RecompileJob};
pub use program::{GroupStage, Program, ProgramId, SceneShaders, ShaderGroup};
pub use resolve::{resolve, IncludeSet, ResolvedFile};
#[cfg(feature = "shaderc")]
pub use shaderc_backend::ShadercBackend;
pub use source::{SourceFile, SourceRegistry, SourceSnapshot, TextOrigin};
pub use system::ShaderSystem;
