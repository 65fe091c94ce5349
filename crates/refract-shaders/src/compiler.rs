//! Dependency-aware program compilation.

use std::cell::RefCell;

use ash::vk;
use refract_core::{FileId, SourceSet, StageKind};

use crate::error::CompileError;
use crate::resolve::{resolve, IncludeSet};
use crate::source::SourceSnapshot;

/// Source handed to a [`ShaderBackend`].
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    /// File name, used in diagnostics.
    pub name: &'a str,
    pub text: &'a str,
    pub kind: StageKind,
}

/// Text of a resolved include.
#[derive(Debug, Clone)]
pub struct IncludedSource {
    /// Name of the file actually included.
    pub name: String,
    pub content: String,
}

/// Include callback passed to a backend: requested name to source, or a message.
pub type IncludeFn<'a> = dyn Fn(&str) -> Result<IncludedSource, String> + 'a;

/// Turns shader text into a shader module.
///
/// Backends are called from compile worker threads.
pub trait ShaderBackend: Send + Sync {
    /// Compile one stage, resolving every include through `include`.
    fn compile(
        &self,
        request: &CompileRequest<'_>,
        include: &IncludeFn<'_>,
    ) -> Result<vk::ShaderModule, CompileError>;

    /// Destroy a module returned by [`compile`](Self::compile).
    ///
    /// # Safety
    /// The module must not be used by any pipeline being created.
    unsafe fn destroy(&self, module: vk::ShaderModule);
}

/// Result of compiling one program.
#[derive(Debug)]
pub struct CompileOutput {
    pub result: Result<vk::ShaderModule, CompileError>,
    /// Files resolved during this compile, whether or not it succeeded.
    pub includes: IncludeSet,
}

/// Compile `source` from a snapshot, recording every file it includes.
///
/// The include set is built from empty on every call. An include that
/// resolves in neither set fails the compile.
#[must_use]
pub fn compile_program(
    backend: &dyn ShaderBackend,
    sources: &SourceSnapshot,
    source: FileId,
    kind: StageKind,
    group_context: Option<&str>,
) -> CompileOutput {
    let Some(file) = sources.file(source) else {
        return CompileOutput {
            result: Err(CompileError::Source(format!("shader source {source} not found"))),
            includes: IncludeSet::default(),
        };
    };

    let includes = RefCell::new(IncludeSet::default());
    let result = {
        let include = |requested: &str| -> Result<IncludedSource, String> {
            let resolved = resolve(
                requested,
                group_context,
                sources.files(SourceSet::Scene),
                sources.files(SourceSet::Engine),
            )
            .ok_or_else(|| format!("{}: unresolved include \"{requested}\"", file.name))?;
            includes.borrow_mut().insert(resolved.id);
            Ok(IncludedSource {
                name: resolved.file.name.clone(),
                content: resolved.file.text.to_string(),
            })
        };
        let request = CompileRequest {
            name: &file.name,
            text: &file.text,
            kind,
        };
        backend.compile(&request, &include)
    };

    CompileOutput {
        result,
        includes: includes.into_inner(),
    }
}
