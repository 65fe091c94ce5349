//! Shader system configuration.

use std::path::PathBuf;

use crate::program::GroupStage;

/// Placeholder substituted with the shader group name in per-group file names.
pub const GROUP_PLACEHOLDER: &str = "{group}";

/// Configuration for [`ShaderSystem`](crate::ShaderSystem).
#[derive(Debug, Clone)]
pub struct ShaderSystemConfig {
    /// Root of the engine shader set.
    pub engine_dir: PathBuf,
    /// Root of the scene shader set.
    pub scene_dir: PathBuf,
    /// Number of compile worker threads.
    pub worker_threads: usize,
    /// Source files backing each program.
    pub file_names: ShaderFileNames,
    /// Write edited sources back to their directory when a wave picks them up.
    pub persist_edits: bool,
}

impl Default for ShaderSystemConfig {
    fn default() -> Self {
        Self {
            engine_dir: PathBuf::from("shaders/engine"),
            scene_dir: PathBuf::from("shaders/scene"),
            worker_threads: std::thread::available_parallelism()
                .map_or(4, std::num::NonZeroUsize::get)
                .saturating_sub(1)
                .max(1),
            file_names: ShaderFileNames::default(),
            persist_edits: true,
        }
    }
}

impl ShaderSystemConfig {
    /// Create a config for the given engine and scene shader roots.
    #[must_use]
    pub fn new(engine_dir: impl Into<PathBuf>, scene_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine_dir: engine_dir.into(),
            scene_dir: scene_dir.into(),
            ..Default::default()
        }
    }

    /// Set the number of compile worker threads.
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    /// Set the program file names.
    #[must_use]
    pub fn with_file_names(mut self, file_names: ShaderFileNames) -> Self {
        self.file_names = file_names;
        self
    }

    /// Enable or disable writing edits back to disk.
    #[must_use]
    pub fn with_persist_edits(mut self, persist: bool) -> Self {
        self.persist_edits = persist;
        self
    }
}

/// File names of the source backing each program.
///
/// Per-group names may contain [`GROUP_PLACEHOLDER`]. Without it the same
/// file is compiled once per group, with the group's generated code pulled in
/// through the `map_function` include.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderFileNames {
    pub raygen_narrow: String,
    pub raygen_wide: String,
    pub primary_miss: String,
    pub shadow_miss: String,
    pub shadow_intersection: String,
    pub group_intersection: String,
    pub group_closest_hit: String,
    pub group_shadow_any_hit: String,
    pub group_ao_any_hit: String,
}

impl Default for ShaderFileNames {
    fn default() -> Self {
        Self {
            raygen_narrow: "raygen_narrow.rgen".to_string(),
            raygen_wide: "raygen_wide.rgen".to_string(),
            primary_miss: "primary.rmiss".to_string(),
            shadow_miss: "shadow.rmiss".to_string(),
            shadow_intersection: "shadow.rint".to_string(),
            group_intersection: "primary.rint".to_string(),
            group_closest_hit: "primary.rchit".to_string(),
            group_shadow_any_hit: "shadow.rahit".to_string(),
            group_ao_any_hit: "ao.rahit".to_string(),
        }
    }
}

impl ShaderFileNames {
    /// Source file name of a group stage for the named group.
    #[must_use]
    pub fn group_file(&self, stage: GroupStage, group: &str) -> String {
        let template = match stage {
            GroupStage::Intersection => &self.group_intersection,
            GroupStage::ClosestHit => &self.group_closest_hit,
            GroupStage::ShadowAnyHit => &self.group_shadow_any_hit,
            GroupStage::AoAnyHit => &self.group_ao_any_hit,
        };
        template.replace(GROUP_PLACEHOLDER, group)
    }
}

/// Optimization level used by the compile backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Optimization {
    /// No optimization; fastest turnaround while editing.
    #[default]
    Zero,
    Size,
    Performance,
}

/// Compiler settings for the shaderc backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileSettings {
    pub optimization: Optimization,
    pub warnings_as_errors: bool,
    /// Emit debug info into the SPIR-V.
    pub debug_info: bool,
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self {
            optimization: Optimization::Zero,
            warnings_as_errors: true,
            debug_info: false,
        }
    }
}

impl CompileSettings {
    /// Set the optimization level.
    #[must_use]
    pub fn with_optimization(mut self, optimization: Optimization) -> Self {
        self.optimization = optimization;
        self
    }

    /// Treat compiler warnings as errors.
    #[must_use]
    pub fn with_warnings_as_errors(mut self, enabled: bool) -> Self {
        self.warnings_as_errors = enabled;
        self
    }

    /// Emit debug info.
    #[must_use]
    pub fn with_debug_info(mut self, enabled: bool) -> Self {
        self.debug_info = enabled;
        self
    }
}
