//! Pipeline commit protocol.
//!
//! The only code that changes which shader modules the renderer uses. It runs
//! on the thread that owns the GPU command stream.
//!
//! Fresh modules from a wave are first staged on their program. A wave in
//! which any program failed installs nothing, so the renderer keeps the
//! previous, fully consistent pipeline. A wave in which every program compiled
//! installs its own modules and rebuilds. Modules held back by an earlier
//! failed wave are installed once none of the programs pending since then is
//! broken.

use refract_gpu::GpuError;

use crate::compiler::ShaderBackend;
use crate::coordinator::WaveResult;
use crate::error::{CompileError, Result, ShaderError};
use crate::program::{ProgramId, SceneShaders};

/// Receiver of rebuilt program sets, usually the ray tracing pipeline.
pub trait PipelineTarget {
    /// Rebuild from the installed modules of `shaders`, which are complete.
    fn rebuild(&mut self, shaders: &SceneShaders) -> std::result::Result<(), GpuError>;
}

/// What a commit did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Programs whose compile failed in this wave.
    pub failed: Vec<ProgramId>,
    /// True if staged modules were installed and the pipeline rebuilt.
    pub rebuilt: bool,
}

/// Record a wave's results on their programs.
///
/// Fresh modules are staged, replacing (and destroying) any module staged by
/// an earlier wave. A failed program drops its staged module and keeps its
/// installed one. Returns the failed programs, or the first device error once
/// every result has been recorded.
pub(crate) fn apply_results(
    backend: &dyn ShaderBackend,
    shaders: &mut SceneShaders,
    wave: WaveResult,
) -> Result<Vec<ProgramId>> {
    let mut failed = Vec::new();
    let mut device_error = None;

    for job in wave.results {
        let Some(program) = shaders.program_mut(job.program) else {
            if let Ok(module) = job.output.result {
                // SAFETY: the module was never handed to a pipeline.
                unsafe { backend.destroy(module) };
            }
            continue;
        };

        program.includes = job.output.includes;
        let discarded = match job.output.result {
            Ok(module) => {
                program.last_error = None;
                program.staged.replace(module)
            }
            Err(CompileError::Source(message)) => {
                tracing::warn!("Shader {} failed to compile:\n{message}", job.program);
                program.last_error = Some(message);
                failed.push(job.program);
                program.staged.take()
            }
            Err(CompileError::Device(e)) => {
                tracing::error!("Device error compiling shader {}: {e}", job.program);
                program.last_error = Some(e.to_string());
                failed.push(job.program);
                if device_error.is_none() {
                    device_error = Some(e);
                }
                program.staged.take()
            }
        };
        if let Some(module) = discarded {
            // SAFETY: staged modules are not referenced by any pipeline.
            unsafe { backend.destroy(module) };
        }
        shaders.pending.insert(job.program);
    }

    match device_error {
        Some(e) => Err(ShaderError::Gpu(e)),
        None => Ok(failed),
    }
}

/// Install staged modules, destroying the ones they replace.
pub(crate) fn install(backend: &dyn ShaderBackend, shaders: &mut SceneShaders) {
    for module in shaders.install_staged() {
        // SAFETY: callers rebuild (or first build) the pipeline right after, and
        // the old pipeline has already been created from these modules.
        unsafe { backend.destroy(module) };
    }
}

fn install_programs(backend: &dyn ShaderBackend, shaders: &mut SceneShaders, ids: &[ProgramId]) {
    for module in shaders.install_staged_for(ids) {
        // SAFETY: the pipeline is rebuilt right after.
        unsafe { backend.destroy(module) };
    }
}

/// Commit a finished wave.
///
/// Device errors are fatal and returned as `Err`. Broken shader source is
/// not: it is reported in [`CommitOutcome::failed`] and on each program.
pub fn commit_wave(
    backend: &dyn ShaderBackend,
    shaders: &mut SceneShaders,
    wave: WaveResult,
    target: &mut dyn PipelineTarget,
) -> Result<CommitOutcome> {
    let wave_id = wave.wave;
    let changed: Vec<ProgramId> = wave.results.iter().map(|job| job.program).collect();
    let failed = apply_results(backend, shaders, wave)?;

    if !failed.is_empty() {
        let broken: Vec<String> = failed.iter().map(ToString::to_string).collect();
        tracing::warn!(
            "Shader wave {wave_id}: keeping previous pipeline, broken: {}",
            broken.join(", ")
        );
        return Ok(CommitOutcome {
            failed,
            rebuilt: false,
        });
    }

    if shaders.has_pending_errors() {
        tracing::debug!("Shader wave {wave_id}: earlier staged modules held back");
        install_programs(backend, shaders, &changed);
    } else {
        install(backend, shaders);
    }
    target.rebuild(shaders)?;
    tracing::info!("Shader wave {wave_id}: pipeline rebuilt");

    Ok(CommitOutcome {
        failed,
        rebuilt: true,
    })
}
