//! Recompilation planning.

use std::sync::Arc;

use refract_core::{FileId, StageKind};

use crate::program::{ProgramId, SceneShaders};
use crate::source::{SourceRegistry, SourceSnapshot};

/// One program to rebuild, with the sources it compiles against.
#[derive(Debug, Clone)]
pub struct RecompileJob {
    pub program: ProgramId,
    pub kind: StageKind,
    pub source: FileId,
    pub group_context: Option<String>,
    pub sources: Arc<SourceSnapshot>,
}

impl RecompileJob {
    fn new(
        shaders: &SceneShaders,
        program: ProgramId,
        sources: &Arc<SourceSnapshot>,
    ) -> Option<Self> {
        let target = shaders.program(program)?;
        Some(Self {
            program,
            kind: target.kind(),
            source: target.source(),
            group_context: shaders.group_context(program).map(str::to_string),
            sources: Arc::clone(sources),
        })
    }
}

/// Jobs for every program touched by the snapshot's dirty files.
///
/// A program is rebuilt if its own source or any file it included last time
/// is dirty.
#[must_use]
pub fn plan(shaders: &SceneShaders, sources: &Arc<SourceSnapshot>) -> Vec<RecompileJob> {
    let dirty = sources.dirty();
    if dirty.is_empty() {
        return Vec::new();
    }
    shaders
        .program_ids()
        .filter(|&id| shaders.program(id).is_some_and(|p| p.depends_on_any(dirty)))
        .filter_map(|id| RecompileJob::new(shaders, id, sources))
        .collect()
}

/// Jobs for every program, regardless of dirty state.
#[must_use]
pub fn plan_all(shaders: &SceneShaders, sources: &Arc<SourceSnapshot>) -> Vec<RecompileJob> {
    shaders
        .program_ids()
        .filter_map(|id| RecompileJob::new(shaders, id, sources))
        .collect()
}

/// A planned wave.
#[derive(Debug)]
pub struct PlannedWave {
    pub jobs: Vec<RecompileJob>,
    pub sources: Arc<SourceSnapshot>,
    /// Dirty flags cleared by this wave.
    pub swept: Vec<FileId>,
}

/// Snapshot the registry, plan against it, then clear the swept flags.
pub fn plan_wave(registry: &SourceRegistry, shaders: &SceneShaders) -> PlannedWave {
    let sources = Arc::new(registry.snapshot());
    let jobs = plan(shaders, &sources);
    let swept = registry.clear_swept(&sources);
    tracing::trace!(
        "Planned {} jobs from {} dirty files",
        jobs.len(),
        sources.dirty().len()
    );
    PlannedWave {
        jobs,
        sources,
        swept,
    }
}
