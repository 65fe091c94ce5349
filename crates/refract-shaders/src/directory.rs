//! Shader source directories on disk.

use std::fs;
use std::path::{Path, PathBuf};

use refract_core::{Error, Result, SourceSet};

/// One shader source root: the engine set or the scene set.
#[derive(Debug, Clone)]
pub struct ShaderDirectory {
    root: PathBuf,
    set: SourceSet,
}

impl ShaderDirectory {
    /// Open a shader directory, failing if it does not exist.
    pub fn open(root: impl Into<PathBuf>, set: SourceSet) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::NotFound(format!(
                "{} shader directory {}",
                set.name(),
                root.display()
            )));
        }
        Ok(Self { root, set })
    }

    /// Directory root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Source set this directory holds.
    #[must_use]
    pub const fn set(&self) -> SourceSet {
        self.set
    }

    /// Read every regular file in the directory, sorted by name.
    ///
    /// Subdirectories are skipped. Any unreadable or non-UTF-8 file fails the
    /// whole listing.
    pub fn list_files(&self) -> Result<Vec<(String, String)>> {
        let entries = fs::read_dir(&self.root).map_err(|source| Error::Path {
            path: self.root.clone(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry
                .file_name()
                .into_string()
                .map_err(|name| Error::InvalidData(format!("non UTF-8 file name {name:?}")))?;
            let text =
                fs::read_to_string(&path).map_err(|source| Error::Path { path, source })?;
            files.push((name, text));
        }

        files.sort_by(|a, b| a.0.cmp(&b.0));
        tracing::debug!(
            "Listed {} {} shader files in {}",
            files.len(),
            self.set.name(),
            self.root.display()
        );
        Ok(files)
    }

    /// Read one file's current text.
    pub fn read_file(&self, name: &str) -> Result<String> {
        let path = self.root.join(name);
        fs::read_to_string(&path).map_err(|source| Error::Path { path, source })
    }

    /// Overwrite one file with new text.
    pub fn write_file(&self, name: &str, text: &str) -> Result<()> {
        let path = self.root.join(name);
        fs::write(&path, text).map_err(|source| Error::Path { path, source })
    }
}
