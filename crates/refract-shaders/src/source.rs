//! Source registry and dirty tracking.
//!
//! The registry is shared between the editor (which edits text and marks
//! files dirty) and the render thread (which snapshots it to plan a wave).
//! Compilation never reads the live registry, only a [`SourceSnapshot`].

use std::sync::Arc;

use hashbrown::HashSet;
use parking_lot::RwLock;
use refract_core::{Error, FileId, Result, SourceSet};

/// Where a file's current text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextOrigin {
    /// Matches the file on disk.
    #[default]
    Disk,
    /// Edited in memory and not yet written back.
    Editor,
    /// The file changed on disk and the text must be reloaded.
    Stale,
}

/// One shader source file.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// File name, unique within its set.
    pub name: String,
    /// Current text.
    pub text: Arc<str>,
    /// Set when the text changed and no wave has consumed it yet.
    pub dirty: bool,
    /// Where the current text came from.
    pub origin: TextOrigin,
    /// Bumped on every edit, used to tell whether a snapshot is still current.
    revision: u64,
}

impl SourceFile {
    /// Create a clean source file.
    #[must_use]
    pub fn new(name: impl Into<String>, text: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            dirty: false,
            origin: TextOrigin::Disk,
            revision: 0,
        }
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.revision += 1;
    }
}

#[derive(Default)]
struct RegistryInner {
    engine: Vec<SourceFile>,
    scene: Vec<SourceFile>,
}

impl RegistryInner {
    fn files(&self, set: SourceSet) -> &[SourceFile] {
        match set {
            SourceSet::Engine => &self.engine,
            SourceSet::Scene => &self.scene,
        }
    }

    fn file_mut(&mut self, id: FileId) -> Result<&mut SourceFile> {
        let files = match id.set {
            SourceSet::Engine => &mut self.engine,
            SourceSet::Scene => &mut self.scene,
        };
        files
            .get_mut(id.index as usize)
            .ok_or_else(|| Error::NotFound(format!("shader source {id}")))
    }
}

/// Text of every shader source in both sets, with dirty flags.
pub struct SourceRegistry {
    inner: RwLock<RegistryInner>,
}

impl SourceRegistry {
    /// Create a registry from `(name, text)` pairs of each set.
    ///
    /// File ids are assigned in the order given.
    #[must_use]
    pub fn new(engine: Vec<(String, String)>, scene: Vec<(String, String)>) -> Self {
        let load = |files: Vec<(String, String)>| {
            files
                .into_iter()
                .map(|(name, text)| SourceFile::new(name, text))
                .collect()
        };
        Self {
            inner: RwLock::new(RegistryInner {
                engine: load(engine),
                scene: load(scene),
            }),
        }
    }

    /// Number of files in a set.
    #[must_use]
    pub fn len(&self, set: SourceSet) -> usize {
        self.inner.read().files(set).len()
    }

    /// Find a file by name in one set.
    #[must_use]
    pub fn find(&self, set: SourceSet, name: &str) -> Option<FileId> {
        find_in(self.inner.read().files(set), set, name)
    }

    /// Find a file by name, scene set first.
    #[must_use]
    pub fn locate(&self, name: &str) -> Option<FileId> {
        let inner = self.inner.read();
        SourceSet::LOOKUP_ORDER
            .into_iter()
            .find_map(|set| find_in(inner.files(set), set, name))
    }

    /// Name of a file.
    #[must_use]
    pub fn name(&self, id: FileId) -> Option<String> {
        self.with_file(id, |file| file.name.clone())
    }

    /// Current text of a file, for display.
    #[must_use]
    pub fn get_text(&self, id: FileId) -> Option<Arc<str>> {
        self.with_file(id, |file| Arc::clone(&file.text))
    }

    /// Returns true if the file has edits no wave has picked up yet.
    #[must_use]
    pub fn is_dirty(&self, id: FileId) -> bool {
        self.with_file(id, |file| file.dirty).unwrap_or(false)
    }

    /// Returns true if any file in either set is dirty.
    #[must_use]
    pub fn has_dirty(&self) -> bool {
        let inner = self.inner.read();
        inner.engine.iter().chain(&inner.scene).any(|file| file.dirty)
    }

    /// Replace a file's text from the editor and mark it dirty.
    pub fn set_text(&self, id: FileId, text: impl Into<Arc<str>>) -> Result<()> {
        let mut inner = self.inner.write();
        let file = inner.file_mut(id)?;
        file.text = text.into();
        file.origin = TextOrigin::Editor;
        file.touch();
        Ok(())
    }

    /// Mark a file dirty because it changed on disk.
    ///
    /// The text is left as is until [`reload`](Self::reload) supplies the new
    /// contents.
    pub fn mark_dirty(&self, id: FileId) -> Result<()> {
        let mut inner = self.inner.write();
        let file = inner.file_mut(id)?;
        file.origin = TextOrigin::Stale;
        file.touch();
        Ok(())
    }

    /// Dirty files waiting for their text to be reloaded from disk.
    #[must_use]
    pub fn stale_files(&self) -> Vec<(FileId, String)> {
        let inner = self.inner.read();
        SourceSet::LOOKUP_ORDER
            .into_iter()
            .flat_map(|set| {
                (0u32..)
                    .zip(inner.files(set))
                    .filter(|(_, file)| file.dirty && file.origin == TextOrigin::Stale)
                    .map(move |(index, file)| (FileId::new(set, index), file.name.clone()))
            })
            .collect()
    }

    /// Replace a stale file's text with what was read from disk.
    ///
    /// Returns false, leaving the file untouched, if the editor set new text
    /// since the file went stale.
    pub fn reload(&self, id: FileId, text: impl Into<Arc<str>>) -> Result<bool> {
        let mut inner = self.inner.write();
        let file = inner.file_mut(id)?;
        if file.origin != TextOrigin::Stale {
            return Ok(false);
        }
        file.text = text.into();
        file.origin = TextOrigin::Disk;
        file.touch();
        Ok(true)
    }

    /// Ids of all dirty files. Flags are left set.
    #[must_use]
    pub fn snapshot_dirty(&self) -> HashSet<FileId> {
        dirty_ids(&self.inner.read())
    }

    /// Copy both sets atomically, dirty flags included. Flags are left set.
    #[must_use]
    pub fn snapshot(&self) -> SourceSnapshot {
        let inner = self.inner.read();
        SourceSnapshot {
            engine: inner.engine.clone(),
            scene: inner.scene.clone(),
            dirty: dirty_ids(&inner),
        }
    }

    /// Clear the dirty flags a snapshot swept up.
    ///
    /// A file edited again after the snapshot keeps its flag. Returns the ids
    /// that were cleared.
    pub fn clear_swept(&self, snapshot: &SourceSnapshot) -> Vec<FileId> {
        let mut inner = self.inner.write();
        let mut cleared: Vec<FileId> = snapshot
            .dirty
            .iter()
            .copied()
            .filter(|&id| {
                let Some(swept) = snapshot.file(id) else {
                    return false;
                };
                match inner.file_mut(id) {
                    Ok(file) if file.revision == swept.revision => {
                        file.dirty = false;
                        true
                    }
                    _ => false,
                }
            })
            .collect();
        cleared.sort_unstable();
        cleared
    }

    fn with_file<R>(&self, id: FileId, f: impl FnOnce(&SourceFile) -> R) -> Option<R> {
        self.inner
            .read()
            .files(id.set)
            .get(id.index as usize)
            .map(f)
    }
}

fn find_in(files: &[SourceFile], set: SourceSet, name: &str) -> Option<FileId> {
    (0u32..)
        .zip(files)
        .find(|(_, file)| file.name == name)
        .map(|(index, _)| FileId::new(set, index))
}

fn dirty_ids(inner: &RegistryInner) -> HashSet<FileId> {
    SourceSet::LOOKUP_ORDER
        .into_iter()
        .flat_map(|set| {
            (0u32..)
                .zip(inner.files(set))
                .filter(|(_, file)| file.dirty)
                .map(move |(index, _)| FileId::new(set, index))
        })
        .collect()
}

/// Private copy of both source sets taken at the start of a wave.
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    engine: Vec<SourceFile>,
    scene: Vec<SourceFile>,
    dirty: HashSet<FileId>,
}

impl SourceSnapshot {
    /// Files of one set, indexed by [`FileId::index`].
    #[must_use]
    pub fn files(&self, set: SourceSet) -> &[SourceFile] {
        match set {
            SourceSet::Engine => &self.engine,
            SourceSet::Scene => &self.scene,
        }
    }

    /// Look up a file.
    #[must_use]
    pub fn file(&self, id: FileId) -> Option<&SourceFile> {
        self.files(id.set).get(id.index as usize)
    }

    /// Files that were dirty when the snapshot was taken.
    #[must_use]
    pub const fn dirty(&self) -> &HashSet<FileId> {
        &self.dirty
    }

    /// Returns true if the file was dirty when the snapshot was taken.
    #[must_use]
    pub fn is_dirty(&self, id: FileId) -> bool {
        self.dirty.contains(&id)
    }
}
