//! Shader source identity types.

use std::fmt;

/// One of the two shader source sets.
///
/// Engine sources are shared code authored with the engine; scene sources
/// belong to the loaded scene. Scene code may include engine files, never the
/// reverse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceSet {
    Engine,
    Scene,
}

impl SourceSet {
    /// Both sets, in include lookup order.
    pub const LOOKUP_ORDER: [Self; 2] = [Self::Scene, Self::Engine];

    /// Human-readable set name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Engine => "engine",
            Self::Scene => "scene",
        }
    }
}

/// Identifier of a shader source file: its set and index within that set.
///
/// Indices are assigned when a directory is enumerated at startup and stay
/// stable for the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId {
    pub set: SourceSet,
    pub index: u32,
}

impl FileId {
    /// Create a new file id.
    #[inline]
    #[must_use]
    pub const fn new(set: SourceSet, index: u32) -> Self {
        Self { set, index }
    }

    /// Engine set file id.
    #[inline]
    #[must_use]
    pub const fn engine(index: u32) -> Self {
        Self::new(SourceSet::Engine, index)
    }

    /// Scene set file id.
    #[inline]
    #[must_use]
    pub const fn scene(index: u32) -> Self {
        Self::new(SourceSet::Scene, index)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.set.name(), self.index)
    }
}

/// Ray-tracing shader stage kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Raygen,
    Miss,
    Intersection,
    ClosestHit,
    AnyHit,
}

impl StageKind {
    /// Returns true for stages that live in a hit group.
    #[inline]
    #[must_use]
    pub const fn is_hit_stage(self) -> bool {
        matches!(self, Self::Intersection | Self::ClosestHit | Self::AnyHit)
    }
}
