//! Programs, shader groups and the scene's full program set.

use std::fmt;

use ash::vk;
use hashbrown::HashSet;
use refract_core::{FileId, StageKind};

use crate::config::ShaderFileNames;
use crate::error::{Result, ShaderError};
use crate::resolve::IncludeSet;
use crate::source::SourceRegistry;

/// Hit-stage slot within a shader group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupStage {
    Intersection,
    ClosestHit,
    ShadowAnyHit,
    AoAnyHit,
}

impl GroupStage {
    /// All slots, in pipeline stage order.
    pub const ALL: [Self; 4] = [
        Self::Intersection,
        Self::ClosestHit,
        Self::ShadowAnyHit,
        Self::AoAnyHit,
    ];

    /// Stage kind compiled for this slot.
    #[must_use]
    pub const fn kind(self) -> StageKind {
        match self {
            Self::Intersection => StageKind::Intersection,
            Self::ClosestHit => StageKind::ClosestHit,
            Self::ShadowAnyHit | Self::AoAnyHit => StageKind::AnyHit,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Intersection => "intersection",
            Self::ClosestHit => "closest_hit",
            Self::ShadowAnyHit => "shadow_any_hit",
            Self::AoAnyHit => "ao_any_hit",
        }
    }
}

/// Identifies one program in [`SceneShaders`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgramId {
    RaygenNarrow,
    RaygenWide,
    PrimaryMiss,
    ShadowMiss,
    ShadowIntersection,
    Group { group: u32, stage: GroupStage },
}

impl ProgramId {
    /// Programs shared by every group, in pipeline stage order.
    pub const FIXED: [Self; 5] = [
        Self::RaygenNarrow,
        Self::RaygenWide,
        Self::PrimaryMiss,
        Self::ShadowMiss,
        Self::ShadowIntersection,
    ];

    /// Stage kind of this program.
    #[must_use]
    pub const fn kind(self) -> StageKind {
        match self {
            Self::RaygenNarrow | Self::RaygenWide => StageKind::Raygen,
            Self::PrimaryMiss | Self::ShadowMiss => StageKind::Miss,
            Self::ShadowIntersection => StageKind::Intersection,
            Self::Group { stage, .. } => stage.kind(),
        }
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RaygenNarrow => f.write_str("raygen_narrow"),
            Self::RaygenWide => f.write_str("raygen_wide"),
            Self::PrimaryMiss => f.write_str("primary_miss"),
            Self::ShadowMiss => f.write_str("shadow_miss"),
            Self::ShadowIntersection => f.write_str("shadow_intersection"),
            Self::Group { group, stage } => write!(f, "group{group}.{}", stage.name()),
        }
    }
}

/// One compiled shader stage.
///
/// A broken program keeps its last good module installed; `last_error` holds
/// the compiler output for display.
#[derive(Debug)]
pub struct Program {
    kind: StageKind,
    source: FileId,
    pub(crate) includes: IncludeSet,
    pub(crate) module: Option<vk::ShaderModule>,
    /// Compiled module waiting for a consistent commit.
    pub(crate) staged: Option<vk::ShaderModule>,
    pub(crate) last_error: Option<String>,
}

impl Program {
    /// Create a program that has not been compiled yet.
    #[must_use]
    pub fn new(kind: StageKind, source: FileId) -> Self {
        Self {
            kind,
            source,
            includes: IncludeSet::default(),
            module: None,
            staged: None,
            last_error: None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> StageKind {
        self.kind
    }

    /// Source file this program is compiled from.
    #[must_use]
    pub const fn source(&self) -> FileId {
        self.source
    }

    /// Files pulled in by the last compile.
    #[must_use]
    pub const fn includes(&self) -> &IncludeSet {
        &self.includes
    }

    /// Module currently used by the pipeline.
    #[must_use]
    pub const fn module(&self) -> Option<vk::ShaderModule> {
        self.module
    }

    /// Compiled module not yet installed.
    #[must_use]
    pub const fn staged(&self) -> Option<vk::ShaderModule> {
        self.staged
    }

    /// Error from the last compile, if it failed.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns true if the last compile failed.
    #[must_use]
    pub const fn is_broken(&self) -> bool {
        self.last_error.is_some()
    }

    /// Returns true if the program must be rebuilt for this dirty set.
    #[must_use]
    pub fn depends_on_any(&self, dirty: &HashSet<FileId>) -> bool {
        dirty.contains(&self.source) || self.includes.intersects(dirty)
    }
}

/// Hit-stage programs of one ray-traced object archetype.
#[derive(Debug)]
pub struct ShaderGroup {
    name: String,
    pub intersection: Program,
    pub closest_hit: Program,
    pub shadow_any_hit: Program,
    pub ao_any_hit: Program,
}

impl ShaderGroup {
    /// Group name, e.g. "sphere".
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Program in a given slot.
    #[must_use]
    pub const fn program(&self, stage: GroupStage) -> &Program {
        match stage {
            GroupStage::Intersection => &self.intersection,
            GroupStage::ClosestHit => &self.closest_hit,
            GroupStage::ShadowAnyHit => &self.shadow_any_hit,
            GroupStage::AoAnyHit => &self.ao_any_hit,
        }
    }

    /// Mutable program in a given slot.
    pub fn program_mut(&mut self, stage: GroupStage) -> &mut Program {
        match stage {
            GroupStage::Intersection => &mut self.intersection,
            GroupStage::ClosestHit => &mut self.closest_hit,
            GroupStage::ShadowAnyHit => &mut self.shadow_any_hit,
            GroupStage::AoAnyHit => &mut self.ao_any_hit,
        }
    }
}

/// Every program of the loaded scene.
///
/// The group count is fixed once the scene is loaded.
#[derive(Debug)]
pub struct SceneShaders {
    raygen_narrow: Program,
    raygen_wide: Program,
    primary_miss: Program,
    shadow_miss: Program,
    shadow_intersection: Program,
    groups: Vec<ShaderGroup>,
    /// Programs recompiled since the last full install. A program stays here
    /// while a sibling from one of its waves is still broken.
    pub(crate) pending: HashSet<ProgramId>,
}

impl SceneShaders {
    /// Bind every program to its source file.
    ///
    /// Files are looked up in the scene set first, then the engine set.
    pub fn new(
        registry: &SourceRegistry,
        names: &ShaderFileNames,
        groups: &[impl AsRef<str>],
    ) -> Result<Self> {
        let program = |kind: StageKind, name: &str| {
            registry
                .locate(name)
                .map(|source| Program::new(kind, source))
                .ok_or_else(|| ShaderError::MissingSource(name.to_string()))
        };
        let group_program = |stage: GroupStage, group: &str| {
            program(stage.kind(), &names.group_file(stage, group))
        };

        let groups = groups
            .iter()
            .map(|group| -> Result<ShaderGroup> {
                let group = group.as_ref();
                Ok(ShaderGroup {
                    name: group.to_string(),
                    intersection: group_program(GroupStage::Intersection, group)?,
                    closest_hit: group_program(GroupStage::ClosestHit, group)?,
                    shadow_any_hit: group_program(GroupStage::ShadowAnyHit, group)?,
                    ao_any_hit: group_program(GroupStage::AoAnyHit, group)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raygen_narrow: program(StageKind::Raygen, &names.raygen_narrow)?,
            raygen_wide: program(StageKind::Raygen, &names.raygen_wide)?,
            primary_miss: program(StageKind::Miss, &names.primary_miss)?,
            shadow_miss: program(StageKind::Miss, &names.shadow_miss)?,
            shadow_intersection: program(StageKind::Intersection, &names.shadow_intersection)?,
            groups,
            pending: HashSet::new(),
        })
    }

    /// Shader groups in load order.
    #[must_use]
    pub fn groups(&self) -> &[ShaderGroup] {
        &self.groups
    }

    /// Number of shader groups.
    #[must_use]
    pub fn group_count(&self) -> u32 {
        u32::try_from(self.groups.len()).unwrap_or(u32::MAX)
    }

    /// All program ids in pipeline stage order.
    pub fn program_ids(&self) -> impl Iterator<Item = ProgramId> + '_ {
        let groups = (0..self.group_count()).flat_map(|group| {
            GroupStage::ALL
                .into_iter()
                .map(move |stage| ProgramId::Group { group, stage })
        });
        ProgramId::FIXED.into_iter().chain(groups)
    }

    /// Look up a program.
    #[must_use]
    pub fn program(&self, id: ProgramId) -> Option<&Program> {
        match id {
            ProgramId::RaygenNarrow => Some(&self.raygen_narrow),
            ProgramId::RaygenWide => Some(&self.raygen_wide),
            ProgramId::PrimaryMiss => Some(&self.primary_miss),
            ProgramId::ShadowMiss => Some(&self.shadow_miss),
            ProgramId::ShadowIntersection => Some(&self.shadow_intersection),
            ProgramId::Group { group, stage } => self
                .groups
                .get(group as usize)
                .map(|g| g.program(stage)),
        }
    }

    /// Look up a program mutably.
    pub fn program_mut(&mut self, id: ProgramId) -> Option<&mut Program> {
        match id {
            ProgramId::RaygenNarrow => Some(&mut self.raygen_narrow),
            ProgramId::RaygenWide => Some(&mut self.raygen_wide),
            ProgramId::PrimaryMiss => Some(&mut self.primary_miss),
            ProgramId::ShadowMiss => Some(&mut self.shadow_miss),
            ProgramId::ShadowIntersection => Some(&mut self.shadow_intersection),
            ProgramId::Group { group, stage } => self
                .groups
                .get_mut(group as usize)
                .map(|g| g.program_mut(stage)),
        }
    }

    /// Group context name passed to the compiler for a program.
    #[must_use]
    pub fn group_context(&self, id: ProgramId) -> Option<&str> {
        match id {
            ProgramId::Group { group, .. } => {
                self.groups.get(group as usize).map(ShaderGroup::name)
            }
            _ => None,
        }
    }

    /// Programs whose last compile failed, with their errors.
    #[must_use]
    pub fn errors(&self) -> Vec<(ProgramId, &str)> {
        self.program_ids()
            .filter_map(|id| Some((id, self.program(id)?.last_error()?)))
            .collect()
    }

    /// Returns true if a program changed since the last rebuild is broken.
    #[must_use]
    pub fn has_pending_errors(&self) -> bool {
        self.pending
            .iter()
            .any(|&id| self.program(id).is_some_and(Program::is_broken))
    }

    /// Returns true if every program has an installed module.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.program_ids()
            .all(|id| self.program(id).is_some_and(|p| p.module.is_some()))
    }

    /// Installed modules in pipeline stage order, or `None` if any is missing.
    #[must_use]
    pub fn stage_modules(&self) -> Option<Vec<vk::ShaderModule>> {
        self.program_ids()
            .map(|id| self.program(id).and_then(Program::module))
            .collect()
    }

    /// Install every staged module, returning the modules it replaced.
    pub(crate) fn install_staged(&mut self) -> Vec<vk::ShaderModule> {
        let ids: Vec<ProgramId> = self.program_ids().collect();
        let replaced = self.install_staged_for(&ids);
        self.pending.clear();
        replaced
    }

    /// Install the staged modules of `ids` only, returning the modules they
    /// replaced. Other staged modules stay staged.
    pub(crate) fn install_staged_for(&mut self, ids: &[ProgramId]) -> Vec<vk::ShaderModule> {
        let mut replaced = Vec::new();
        for &id in ids {
            if let Some(program) = self.program_mut(id) {
                if let Some(fresh) = program.staged.take() {
                    replaced.extend(program.module.replace(fresh));
                }
            }
            self.pending.remove(&id);
        }
        replaced
    }

    /// Take every installed and staged module, leaving the programs empty.
    pub(crate) fn take_modules(&mut self) -> Vec<vk::ShaderModule> {
        let ids: Vec<ProgramId> = self.program_ids().collect();
        let mut modules = Vec::new();
        for id in ids {
            if let Some(program) = self.program_mut(id) {
                modules.extend(program.module.take());
                modules.extend(program.staged.take());
            }
        }
        modules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use refract_core::SourceSet;

    fn registry() -> SourceRegistry {
        let engine = [
            "raygen_narrow.rgen",
            "raygen_wide.rgen",
            "primary.rmiss",
            "shadow.rmiss",
            "shadow.rint",
            "primary.rint",
            "primary.rchit",
            "shadow.rahit",
            "ao.rahit",
        ];
        SourceRegistry::new(
            engine.iter().map(|n| ((*n).to_string(), String::new())).collect(),
            vec![("primary.rchit".to_string(), String::new())],
        )
    }

    #[test]
    fn binds_sources_scene_first() {
        let registry = registry();
        let shaders =
            SceneShaders::new(&registry, &ShaderFileNames::default(), &["sphere", "cube"])
                .unwrap();

        assert_eq!(shaders.group_count(), 2);
        assert_eq!(shaders.groups()[1].name(), "cube");
        let closest_hit = ProgramId::Group {
            group: 0,
            stage: GroupStage::ClosestHit,
        };
        assert_eq!(
            shaders.program(closest_hit).unwrap().source(),
            FileId::scene(0)
        );
        assert_eq!(
            shaders.program(ProgramId::RaygenWide).unwrap().source().set,
            SourceSet::Engine
        );
        assert_eq!(shaders.group_context(closest_hit), Some("sphere"));
        assert_eq!(shaders.group_context(ProgramId::PrimaryMiss), None);
    }

    #[test]
    fn missing_source_is_fatal() {
        let registry = registry();
        let names = ShaderFileNames {
            group_intersection: "{group}.rint".to_string(),
            ..Default::default()
        };
        let result = SceneShaders::new(&registry, &names, &["sphere"]);
        assert!(matches!(result, Err(ShaderError::MissingSource(name)) if name == "sphere.rint"));
    }

    #[test]
    fn program_ids_follow_stage_order() {
        let registry = registry();
        let shaders =
            SceneShaders::new(&registry, &ShaderFileNames::default(), &["a", "b"]).unwrap();
        let ids: Vec<ProgramId> = shaders.program_ids().collect();

        assert_eq!(ids.len(), 5 + 2 * 4);
        assert_eq!(&ids[..5], &ProgramId::FIXED);
        assert_eq!(
            ids[5 + 4 + 3],
            ProgramId::Group {
                group: 1,
                stage: GroupStage::AoAnyHit
            }
        );
        assert!(shaders.program(ProgramId::Group {
            group: 2,
            stage: GroupStage::Intersection
        })
        .is_none());
    }

    #[test]
    fn install_staged_replaces_modules() {
        let registry = registry();
        let mut shaders =
            SceneShaders::new(&registry, &ShaderFileNames::default(), &["a"]).unwrap();
        assert!(!shaders.is_complete());
        assert!(shaders.stage_modules().is_none());

        let ids: Vec<ProgramId> = shaders.program_ids().collect();
        for (raw, &id) in (1u64..).zip(&ids) {
            shaders.program_mut(id).unwrap().staged = Some(vk::ShaderModule::from_raw(raw));
        }
        assert!(shaders.install_staged().is_empty());
        assert!(shaders.is_complete());

        let narrow = shaders.program_mut(ProgramId::RaygenNarrow).unwrap();
        narrow.staged = Some(vk::ShaderModule::from_raw(100));
        let replaced = shaders.install_staged();
        assert_eq!(replaced, vec![vk::ShaderModule::from_raw(1)]);

        let modules = shaders.stage_modules().unwrap();
        assert_eq!(modules.len(), ids.len());
        assert_eq!(modules[0], vk::ShaderModule::from_raw(100));
        assert_eq!(modules[1], vk::ShaderModule::from_raw(2));

        assert_eq!(shaders.take_modules().len(), ids.len());
        assert!(!shaders.is_complete());
    }

    #[test]
    fn depends_on_source_or_include() {
        let mut program = Program::new(StageKind::ClosestHit, FileId::scene(0));
        program.includes.insert(FileId::engine(3));

        assert!(program.depends_on_any(&HashSet::from_iter([FileId::scene(0)])));
        assert!(program.depends_on_any(&HashSet::from_iter([FileId::engine(3)])));
        assert!(!program.depends_on_any(&HashSet::from_iter([FileId::engine(0)])));
    }
}
