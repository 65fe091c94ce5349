//! Include resolution.

use hashbrown::HashSet;
use refract_core::constants::{GROUP_CONTEXT_EXTENSION, MAP_FUNCTION_INCLUDE};
use refract_core::{FileId, SourceSet};

use crate::source::SourceFile;

/// A successfully resolved include.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedFile<'a> {
    pub id: FileId,
    pub file: &'a SourceFile,
}

/// Generated file name of a shader group, the target of `map_function`.
#[must_use]
pub fn group_context_file(group: &str) -> String {
    format!("{group}.{GROUP_CONTEXT_EXTENSION}")
}

/// Resolve an include request against the two source sets.
///
/// With a group context, the `map_function` sentinel is replaced by that
/// group's generated file. The scene set is searched before the engine set.
#[must_use]
pub fn resolve<'a>(
    name: &str,
    group_context: Option<&str>,
    scene: &'a [SourceFile],
    engine: &'a [SourceFile],
) -> Option<ResolvedFile<'a>> {
    let substituted;
    let name = match group_context {
        Some(group) if name == MAP_FUNCTION_INCLUDE => {
            substituted = group_context_file(group);
            substituted.as_str()
        }
        _ => name,
    };

    [(SourceSet::Scene, scene), (SourceSet::Engine, engine)]
        .into_iter()
        .find_map(|(set, files)| {
            (0u32..)
                .zip(files)
                .find(|(_, file)| file.name == name)
                .map(|(index, file)| ResolvedFile {
                    id: FileId::new(set, index),
                    file,
                })
        })
}

/// Files pulled in by one compile, partitioned by source set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeSet {
    engine: HashSet<u32>,
    scene: HashSet<u32>,
}

impl IncludeSet {
    /// Record an included file.
    pub fn insert(&mut self, id: FileId) -> bool {
        self.indices_mut(id.set).insert(id.index)
    }

    /// Returns true if the file was included.
    #[must_use]
    pub fn contains(&self, id: FileId) -> bool {
        self.indices(id.set).contains(&id.index)
    }

    /// Indices of included files from one set.
    #[must_use]
    pub const fn indices(&self, set: SourceSet) -> &HashSet<u32> {
        match set {
            SourceSet::Engine => &self.engine,
            SourceSet::Scene => &self.scene,
        }
    }

    fn indices_mut(&mut self, set: SourceSet) -> &mut HashSet<u32> {
        match set {
            SourceSet::Engine => &mut self.engine,
            SourceSet::Scene => &mut self.scene,
        }
    }

    /// Iterate over all included files.
    pub fn iter(&self) -> impl Iterator<Item = FileId> + '_ {
        let engine = self.engine.iter().map(|&index| FileId::engine(index));
        let scene = self.scene.iter().map(|&index| FileId::scene(index));
        engine.chain(scene)
    }

    /// Number of included files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.engine.len() + self.scene.len()
    }

    /// Returns true if nothing was included.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if any included file is in `files`.
    #[must_use]
    pub fn intersects(&self, files: &HashSet<FileId>) -> bool {
        files.iter().any(|&id| self.contains(id))
    }
}

impl FromIterator<FileId> for IncludeSet {
    fn from_iter<T: IntoIterator<Item = FileId>>(iter: T) -> Self {
        let mut set = Self::default();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<SourceFile> {
        names.iter().map(|name| SourceFile::new(*name, "")).collect()
    }

    #[test]
    fn scene_shadows_engine() {
        let scene = files(&["sphere.rint", "common.glsl"]);
        let engine = files(&["common.glsl", "noise.glsl"]);

        let hit = resolve("common.glsl", None, &scene, &engine).unwrap();
        assert_eq!(hit.id, FileId::scene(1));

        let hit = resolve("noise.glsl", None, &scene, &engine).unwrap();
        assert_eq!(hit.id, FileId::engine(1));

        assert!(resolve("missing.glsl", None, &scene, &engine).is_none());
    }

    #[test]
    fn map_function_uses_group_context() {
        let scene = files(&["sphere.glsl", "cube.glsl"]);
        let engine = files(&["map_function"]);

        let hit = resolve(MAP_FUNCTION_INCLUDE, Some("cube"), &scene, &engine).unwrap();
        assert_eq!(hit.id, FileId::scene(1));
        assert_eq!(hit.file.name, "cube.glsl");

        // Without a group context the sentinel is an ordinary name.
        let hit = resolve(MAP_FUNCTION_INCLUDE, None, &scene, &engine).unwrap();
        assert_eq!(hit.id, FileId::engine(0));

        // Other names are never substituted.
        assert!(resolve("cube", Some("cube"), &scene, &engine).is_none());
    }

    #[test]
    fn include_set_is_partitioned() {
        let mut set = IncludeSet::default();
        assert!(set.insert(FileId::engine(0)));
        assert!(set.insert(FileId::scene(0)));
        assert!(!set.insert(FileId::engine(0)));

        assert_eq!(set.len(), 2);
        assert!(set.contains(FileId::scene(0)));
        assert!(!set.contains(FileId::scene(1)));
        assert_eq!(set.indices(SourceSet::Engine).len(), 1);

        let dirty = HashSet::from_iter([FileId::engine(5), FileId::scene(0)]);
        assert!(set.intersects(&dirty));
        assert!(!set.intersects(&HashSet::from_iter([FileId::engine(5)])));
    }
}
