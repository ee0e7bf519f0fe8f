//! Artifact kinds and their cache subdirectories.

use std::fmt;

/// Kind of one produced artifact; each kind has its own cache directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Base,
    Slice,
    Materialize,
    LiteralSource,
    Binding,
    Facet,
    Chart,
}

impl ArtifactKind {
    /// Directory name under `cache/`.
    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactKind::Base => "artifacts",
            ArtifactKind::Slice => "slices",
            ArtifactKind::Materialize => "materialize",
            ArtifactKind::LiteralSource => "literal_sources",
            ArtifactKind::Binding => "bindings",
            ArtifactKind::Facet => "facets",
            ArtifactKind::Chart => "charts",
        }
    }

    /// All kinds, for the sweeper's directory walk.
    pub fn all() -> [ArtifactKind; 7] {
        [
            ArtifactKind::Base,
            ArtifactKind::Slice,
            ArtifactKind::Materialize,
            ArtifactKind::LiteralSource,
            ArtifactKind::Binding,
            ArtifactKind::Facet,
            ArtifactKind::Chart,
        ]
    }

    /// Parse a URL path segment into a kind.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::all().into_iter().find(|k| k.dir_name() == name)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}
