//! Per-frame shader system facade.

use std::sync::Arc;

use refract_core::{FileId, SourceSet};

use crate::commit::{apply_results, commit_wave, install, PipelineTarget};
use crate::compiler::ShaderBackend;
use crate::config::ShaderSystemConfig;
use crate::coordinator::{CompileCoordinator, CoordinatorState, WaveResult};
use crate::directory::ShaderDirectory;
use crate::error::{Result, ShaderError};
use crate::planner::{plan_all, plan_wave, PlannedWave};
use crate::program::{ProgramId, SceneShaders};
use crate::source::{SourceRegistry, TextOrigin};

/// Live shader compilation for one loaded scene.
///
/// The editor edits sources through [`registry`](Self::registry) from any
/// thread. The render thread calls [`step`](Self::step) once per frame before
/// recording ray tracing work.
pub struct ShaderSystem {
    config: ShaderSystemConfig,
    engine_dir: ShaderDirectory,
    scene_dir: ShaderDirectory,
    registry: Arc<SourceRegistry>,
    shaders: SceneShaders,
    coordinator: CompileCoordinator,
}

impl ShaderSystem {
    /// Load both shader directories and compile every program.
    ///
    /// Blocks until the startup compile finishes. Any failure is fatal here,
    /// since there is no earlier program to fall back on.
    pub fn load(
        config: ShaderSystemConfig,
        backend: Arc<dyn ShaderBackend>,
        groups: &[impl AsRef<str>],
    ) -> Result<Self> {
        let engine_dir = ShaderDirectory::open(config.engine_dir.clone(), SourceSet::Engine)?;
        let scene_dir = ShaderDirectory::open(config.scene_dir.clone(), SourceSet::Scene)?;
        let registry = Arc::new(SourceRegistry::new(
            engine_dir.list_files()?,
            scene_dir.list_files()?,
        ));
        tracing::info!(
            "Loaded {} engine shader sources from {} and {} scene sources from {}",
            registry.len(SourceSet::Engine),
            engine_dir.root().display(),
            registry.len(SourceSet::Scene),
            scene_dir.root().display()
        );

        let mut shaders = SceneShaders::new(&registry, &config.file_names, groups)?;
        let coordinator = CompileCoordinator::new(backend, config.worker_threads)?;

        let sources = Arc::new(registry.snapshot());
        coordinator
            .try_admit()
            .ok_or(ShaderError::Busy)?
            .dispatch(plan_all(&shaders, &sources));

        if let Some(wave) = coordinator.wait() {
            let backend = coordinator.backend().as_ref();
            let failed = match apply_results(backend, &mut shaders, wave) {
                Ok(failed) => failed,
                Err(e) => {
                    destroy_modules(backend, &mut shaders);
                    return Err(e);
                }
            };
            if !failed.is_empty() {
                let report = failed
                    .iter()
                    .filter_map(|&id| shaders.program(id)?.last_error())
                    .collect::<Vec<_>>()
                    .join("\n");
                destroy_modules(backend, &mut shaders);
                return Err(ShaderError::InitialCompile(report));
            }
            install(backend, &mut shaders);
        }

        tracing::info!(
            "Compiled {} shader programs for {} groups",
            shaders.program_ids().count(),
            shaders.group_count()
        );

        Ok(Self {
            config,
            engine_dir,
            scene_dir,
            registry,
            shaders,
            coordinator,
        })
    }

    /// Source registry shared with the editor.
    #[must_use]
    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Current program set.
    #[must_use]
    pub fn shaders(&self) -> &SceneShaders {
        &self.shaders
    }

    /// Broken programs and their compile errors, for display.
    #[must_use]
    pub fn errors(&self) -> Vec<(ProgramId, &str)> {
        self.shaders.errors()
    }

    /// Coordinator state.
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        self.coordinator.state()
    }

    #[must_use]
    pub fn config(&self) -> &ShaderSystemConfig {
        &self.config
    }

    /// Commit a finished wave, if any, then start a new one for pending edits.
    ///
    /// Never waits for compilation. Returns true if the pipeline was rebuilt,
    /// in which case the renderer must insert the binding table upload barrier
    /// before tracing.
    pub fn step(&mut self, target: &mut dyn PipelineTarget) -> Result<bool> {
        let rebuilt = match self.coordinator.poll() {
            Some(wave) => self.commit(wave, target)?,
            None => false,
        };
        self.start_wave();
        Ok(rebuilt)
    }

    /// Wait for the in-flight wave, if any, and commit it.
    pub fn flush(&mut self, target: &mut dyn PipelineTarget) -> Result<bool> {
        match self.coordinator.wait() {
            Some(wave) => self.commit(wave, target),
            None => Ok(false),
        }
    }

    /// Destroy every shader module, waiting for an in-flight wave first.
    ///
    /// # Safety
    /// No pipeline may be under construction from these modules.
    pub unsafe fn destroy(mut self) {
        let backend = Arc::clone(self.coordinator.backend());
        if let Some(wave) = self.coordinator.wait() {
            for result in wave.results {
                if let Ok(module) = result.output.result {
                    // SAFETY: in-flight modules were never installed.
                    unsafe { backend.destroy(module) };
                }
            }
        }
        destroy_modules(backend.as_ref(), &mut self.shaders);
    }

    fn commit(&mut self, wave: WaveResult, target: &mut dyn PipelineTarget) -> Result<bool> {
        let outcome = commit_wave(
            self.coordinator.backend().as_ref(),
            &mut self.shaders,
            wave,
            target,
        )?;
        Ok(outcome.rebuilt)
    }

    fn start_wave(&self) -> usize {
        if !self.registry.has_dirty() {
            return 0;
        }
        let Some(admission) = self.coordinator.try_admit() else {
            return 0;
        };
        self.reload_stale();
        let planned = plan_wave(&self.registry, &self.shaders);
        self.persist(&planned);
        admission.dispatch(planned.jobs)
    }

    fn directory(&self, id: FileId) -> &ShaderDirectory {
        match id.set {
            SourceSet::Engine => &self.engine_dir,
            SourceSet::Scene => &self.scene_dir,
        }
    }

    /// Pull in files that changed on disk before they are snapshotted.
    fn reload_stale(&self) {
        for (id, name) in self.registry.stale_files() {
            let dir = self.directory(id);
            match dir.read_file(&name) {
                Ok(text) => {
                    if let Err(e) = self.registry.reload(id, text) {
                        tracing::warn!("Failed to reload shader {name}: {e}");
                    }
                }
                Err(e) => tracing::warn!(
                    "Failed to read {} shader {name}, compiling the previous text: {e}",
                    dir.set().name()
                ),
            }
        }
    }

    /// Write editor changes swept into a wave back to disk.
    fn persist(&self, planned: &PlannedWave) {
        if !self.config.persist_edits {
            return;
        }
        for &id in &planned.swept {
            let Some(file) = planned.sources.file(id) else {
                continue;
            };
            if file.origin != TextOrigin::Editor {
                continue;
            }
            let dir = self.directory(id);
            if let Err(e) = dir.write_file(&file.name, &file.text) {
                tracing::warn!("Failed to save {} shader {}: {e}", dir.set().name(), file.name);
            }
        }
    }
}

fn destroy_modules(backend: &dyn ShaderBackend, shaders: &mut SceneShaders) {
    for module in shaders.take_modules() {
        // SAFETY: callers guarantee no pipeline is being built from these modules.
        unsafe { backend.destroy(module) };
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use ash::vk;
    use refract_core::FileId;
    use tempfile::TempDir;

    use super::*;
    use crate::config::ShaderFileNames;
    use crate::planner::plan;
    use crate::program::GroupStage;
    use crate::resolve::IncludeSet;
    use crate::test_support::{init_tracing, MockBackend, RecordingTarget};

    const ENGINE: &[(&str, &str)] = &[
        ("raygen_narrow.rgen", "#include \"common.glsl\""),
        ("raygen_wide.rgen", "void main() {}"),
        ("primary.rmiss", "void main() {}"),
        ("shadow.rmiss", "void main() {}"),
        ("shadow.rint", "void main() {}"),
        ("shadow.rahit", "#include \"map_function\""),
        ("ao.rahit", "void main() {}"),
        ("common.glsl", "// common"),
        ("helpers.glsl", "// helpers"),
        ("noise.glsl", "// noise"),
    ];

    const SCENE: &[(&str, &str)] = &[
        ("sphere.rint", "#include \"common.glsl\""),
        ("sphere.rchit", "#include \"helpers.glsl\""),
        ("sphere.glsl", "// sphere sdf"),
        ("cube.rint", "void main() {}"),
        ("cube.rchit", "#include \"common.glsl\""),
        ("cube.glsl", "// cube sdf"),
    ];

    const GROUPS: [&str; 2] = ["sphere", "cube"];

    fn program(group: u32, stage: GroupStage) -> ProgramId {
        ProgramId::Group { group, stage }
    }

    fn write_set(root: &Path, files: &[(&str, &str)]) {
        fs::create_dir_all(root).unwrap();
        for (name, text) in files {
            fs::write(root.join(name), text).unwrap();
        }
    }

    fn fixture() -> (TempDir, ShaderSystemConfig) {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        write_set(&dir.path().join("engine"), ENGINE);
        write_set(&dir.path().join("scene"), SCENE);
        let config = ShaderSystemConfig::new(dir.path().join("engine"), dir.path().join("scene"))
            .with_worker_threads(2)
            .with_file_names(ShaderFileNames {
                group_intersection: "{group}.rint".to_string(),
                group_closest_hit: "{group}.rchit".to_string(),
                ..Default::default()
            });
        (dir, config)
    }

    fn load(config: ShaderSystemConfig) -> (ShaderSystem, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::new());
        let system = ShaderSystem::load(config, backend.clone(), &GROUPS).unwrap();
        (system, backend)
    }

    fn file(system: &ShaderSystem, name: &str) -> FileId {
        system.registry().locate(name).unwrap()
    }

    fn edit(system: &ShaderSystem, name: &str, text: &str) {
        system.registry().set_text(file(system, name), text).unwrap();
    }

    fn module(system: &ShaderSystem, id: ProgramId) -> vk::ShaderModule {
        system.shaders().program(id).unwrap().module().unwrap()
    }

    #[test]
    fn load_compiles_every_program() {
        let (_dir, config) = fixture();
        let (system, backend) = load(config);

        assert!(system.shaders().is_complete());
        assert!(system.errors().is_empty());
        assert_eq!(backend.compile_count(), 5 + 2 * 4);
        assert_eq!(system.state(), CoordinatorState::Idle);

        let sphere_shadow = system
            .shaders()
            .program(program(0, GroupStage::ShadowAnyHit))
            .unwrap();
        let cube_shadow = system
            .shaders()
            .program(program(1, GroupStage::ShadowAnyHit))
            .unwrap();
        assert_eq!(
            sphere_shadow.includes(),
            &IncludeSet::from_iter([file(&system, "sphere.glsl")])
        );
        assert_eq!(
            cube_shadow.includes(),
            &IncludeSet::from_iter([file(&system, "cube.glsl")])
        );
    }

    #[test]
    fn startup_compile_failure_is_fatal() {
        let (dir, config) = fixture();
        fs::write(dir.path().join("scene/sphere.rchit"), "#error").unwrap();
        let backend = Arc::new(MockBackend::new());

        let result = ShaderSystem::load(config, backend.clone(), &GROUPS);
        let Err(ShaderError::InitialCompile(report)) = result else {
            panic!("expected an initial compile error");
        };
        assert!(report.contains("sphere.rchit"));
        assert_eq!(backend.destroyed().len(), 5 + 2 * 4 - 1);
    }

    #[test]
    fn missing_directory_is_fatal() {
        let (dir, config) = fixture();
        fs::remove_dir_all(dir.path().join("scene")).unwrap();

        let result = ShaderSystem::load(config, Arc::new(MockBackend::new()), &GROUPS);
        assert!(matches!(result, Err(ShaderError::Core(_))));
    }

    #[test]
    fn missing_group_source_is_fatal() {
        let (dir, config) = fixture();
        fs::remove_file(dir.path().join("scene/cube.rint")).unwrap();

        let result = ShaderSystem::load(config, Arc::new(MockBackend::new()), &GROUPS);
        assert!(matches!(result, Err(ShaderError::MissingSource(name)) if name == "cube.rint"));
    }

    #[test]
    fn shared_include_rebuilds_programs_in_every_group() {
        let (_dir, config) = fixture();
        let (mut system, _backend) = load(config);
        let mut target = RecordingTarget::default();
        let before = system.shaders().stage_modules().unwrap();

        edit(&system, "common.glsl", "// common v2");
        let sources = Arc::new(system.registry().snapshot());
        let planned: Vec<ProgramId> = plan(system.shaders(), &sources)
            .iter()
            .map(|job| job.program)
            .collect();
        assert_eq!(
            planned,
            vec![
                ProgramId::RaygenNarrow,
                program(0, GroupStage::Intersection),
                program(1, GroupStage::ClosestHit),
            ]
        );

        assert!(!system.step(&mut target).unwrap());
        assert!(system.flush(&mut target).unwrap());
        assert_eq!(target.rebuilds, 1);

        let after = system.shaders().stage_modules().unwrap();
        let changed: Vec<usize> = (0..before.len()).filter(|&i| before[i] != after[i]).collect();
        // Stage order: 5 fixed programs, then 4 per group.
        assert_eq!(changed, vec![0, 5, 10]);
        assert_eq!(target.last_modules, after);
    }

    #[test]
    fn one_wave_in_flight_and_no_lost_edits() {
        let (_dir, config) = fixture();
        let (mut system, backend) = load(config);
        let mut target = RecordingTarget::default();
        let sphere_rint = program(0, GroupStage::Intersection);
        let original_rint = module(&system, sphere_rint);

        let gate = backend.hold();
        edit(&system, "sphere.rchit", "#include \"helpers.glsl\"\n// v2");
        assert!(!system.step(&mut target).unwrap());
        assert_eq!(system.state(), CoordinatorState::Compiling);

        // Raised mid-wave: must wait for the next wave.
        edit(&system, "common.glsl", "// common v2");
        assert!(!system.step(&mut target).unwrap());
        assert_eq!(system.state(), CoordinatorState::Compiling);
        assert!(system.registry().is_dirty(file(&system, "common.glsl")));
        drop(gate);

        assert!(system.flush(&mut target).unwrap());
        assert_eq!(module(&system, sphere_rint), original_rint);
        assert!(system.registry().is_dirty(file(&system, "common.glsl")));

        assert!(!system.step(&mut target).unwrap());
        assert!(system.flush(&mut target).unwrap());
        assert_ne!(module(&system, sphere_rint), original_rint);
        assert!(!system.registry().has_dirty());
        assert_eq!(target.rebuilds, 2);
    }

    #[test]
    fn failed_sibling_keeps_previous_pipeline() {
        let (_dir, config) = fixture();
        let (mut system, _backend) = load(config);
        let mut target = RecordingTarget::default();
        let rint = program(0, GroupStage::Intersection);
        let rchit = program(0, GroupStage::ClosestHit);
        let original_rint = module(&system, rint);

        edit(&system, "sphere.rint", "// rewritten");
        edit(&system, "sphere.rchit", "#error");
        system.step(&mut target).unwrap();
        assert!(!system.flush(&mut target).unwrap());

        assert_eq!(module(&system, rint), original_rint);
        assert_eq!(target.rebuilds, 0);
        let errors = system.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, rchit);
        assert!(errors[0].1.contains("sphere.rchit"));
        let staged = system.shaders().program(rint).unwrap().staged().unwrap();

        edit(&system, "sphere.rchit", "void main() {}");
        system.step(&mut target).unwrap();
        assert!(system.flush(&mut target).unwrap());
        assert_eq!(module(&system, rint), staged);
        assert!(system.errors().is_empty());
        assert_eq!(target.rebuilds, 1);
    }

    #[test]
    fn include_set_follows_current_source() {
        let (_dir, config) = fixture();
        let (mut system, _backend) = load(config);
        let mut target = RecordingTarget::default();
        let rchit = program(0, GroupStage::ClosestHit);
        let helpers = file(&system, "helpers.glsl");

        edit(
            &system,
            "sphere.rchit",
            "#include \"common.glsl\"\n#include \"noise.glsl\"",
        );
        system.step(&mut target).unwrap();
        system.flush(&mut target).unwrap();
        assert_eq!(
            system.shaders().program(rchit).unwrap().includes(),
            &IncludeSet::from_iter([file(&system, "common.glsl"), file(&system, "noise.glsl")])
        );

        // Nothing depends on helpers.glsl any more.
        system.registry().mark_dirty(helpers).unwrap();
        system.step(&mut target).unwrap();
        assert_eq!(system.state(), CoordinatorState::Idle);
        assert!(!system.registry().is_dirty(helpers));
    }

    #[test]
    fn unresolved_include_is_a_compile_error() {
        let (_dir, config) = fixture();
        let (mut system, _backend) = load(config);
        let mut target = RecordingTarget::default();

        edit(&system, "cube.rchit", "#include \"nope.glsl\"");
        system.step(&mut target).unwrap();
        assert!(!system.flush(&mut target).unwrap());

        let error = system
            .shaders()
            .program(program(1, GroupStage::ClosestHit))
            .unwrap()
            .last_error()
            .unwrap();
        assert!(error.contains("nope.glsl"));
    }

    #[test]
    fn device_failure_is_fatal() {
        let (_dir, config) = fixture();
        let (mut system, _backend) = load(config);
        let mut target = RecordingTarget::default();

        edit(&system, "cube.rint", "#device_lost");
        system.step(&mut target).unwrap();
        assert!(matches!(system.flush(&mut target), Err(ShaderError::Gpu(_))));
    }

    #[test]
    fn swept_edits_are_saved() {
        let (dir, config) = fixture();
        let (mut system, _backend) = load(config);
        let mut target = RecordingTarget::default();

        edit(&system, "cube.glsl", "// cube sdf v2");
        system.step(&mut target).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("scene/cube.glsl")).unwrap(),
            "// cube sdf v2"
        );
        assert!(system.flush(&mut target).unwrap());
    }

    #[test]
    fn failed_save_does_not_stop_the_wave() {
        let (dir, config) = fixture();
        let (mut system, backend) = load(config);
        let mut target = RecordingTarget::default();
        let compiled = backend.compile_count();
        fs::remove_dir_all(dir.path().join("scene")).unwrap();

        edit(&system, "cube.rchit", "// cube hit v2");
        assert!(!system.step(&mut target).unwrap());
        assert_eq!(system.state(), CoordinatorState::Compiling);
        assert!(system.flush(&mut target).unwrap());
        assert_eq!(backend.compile_count(), compiled + 1);
        assert_eq!(target.rebuilds, 1);
    }

    #[test]
    fn external_change_is_reloaded_and_not_overwritten() {
        let (dir, config) = fixture();
        let (mut system, _backend) = load(config);
        let mut target = RecordingTarget::default();
        let path = dir.path().join("scene/cube.glsl");
        let cube_shadow = program(1, GroupStage::ShadowAnyHit);
        let before = module(&system, cube_shadow);

        fs::write(&path, "// edited externally").unwrap();
        system.registry().mark_dirty(file(&system, "cube.glsl")).unwrap();
        system.step(&mut target).unwrap();
        assert!(system.flush(&mut target).unwrap());

        assert_eq!(fs::read_to_string(&path).unwrap(), "// edited externally");
        assert_eq!(
            &*system.registry().get_text(file(&system, "cube.glsl")).unwrap(),
            "// edited externally"
        );
        assert_ne!(module(&system, cube_shadow), before);
    }

    #[test]
    fn unrelated_edit_reaches_the_pipeline_while_a_program_is_broken() {
        let (_dir, config) = fixture();
        let (mut system, _backend) = load(config);
        let mut target = RecordingTarget::default();
        let cube_rint = program(1, GroupStage::Intersection);
        let before = module(&system, cube_rint);

        edit(&system, "sphere.rchit", "#error");
        system.step(&mut target).unwrap();
        assert!(!system.flush(&mut target).unwrap());

        edit(&system, "cube.rint", "void main() { }");
        system.step(&mut target).unwrap();
        assert!(system.flush(&mut target).unwrap());
        assert_eq!(target.rebuilds, 1);
        assert_ne!(module(&system, cube_rint), before);
        assert_eq!(system.errors().len(), 1);
    }

    #[test]
    fn edits_stay_in_memory_when_saving_is_off() {
        let (dir, config) = fixture();
        let (mut system, _backend) = load(config.with_persist_edits(false));
        let mut target = RecordingTarget::default();

        edit(&system, "cube.glsl", "// cube sdf v2");
        system.step(&mut target).unwrap();
        system.flush(&mut target).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("scene/cube.glsl")).unwrap(),
            "// cube sdf"
        );
    }

    #[test]
    fn destroy_releases_every_module() {
        let (_dir, config) = fixture();
        let (mut system, backend) = load(config);
        let mut target = RecordingTarget::default();

        edit(&system, "common.glsl", "// common v2");
        system.step(&mut target).unwrap();
        unsafe { system.destroy() };

        // 13 installed modules plus 3 from the in-flight wave.
        assert_eq!(backend.destroyed().len(), 13 + 3);
    }
}
