//! Skill catalog: discovery of skill bundles on disk and their materialization
//! into the directory the agent runtime reads skills from.
//!
//! A bundle is any immediate subdirectory of the source directory carrying a
//! valid `SKILL.md`. The catalog is built once at startup and shared read-only
//! afterwards.

pub mod descriptor;
pub mod materializer;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use descriptor::{DescriptorError, SkillDescriptor, DESCRIPTOR_FILE};
pub use materializer::{
    scan_source, CatalogError, CatalogMaterializer, MaterializeReport, Materialized, SkipReason,
    SkippedBundle, SourceScan,
};

/// How a catalog entry refers back to its source bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStrategy {
    Symlink,
    Copy,
}

impl LinkStrategy {
    pub fn platform_default() -> Self {
        if cfg!(unix) {
            Self::Symlink
        } else {
            Self::Copy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Symlink => "symlink",
            Self::Copy => "copy",
        }
    }
}

impl std::str::FromStr for LinkStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "symlink" | "link" => Ok(Self::Symlink),
            "copy" => Ok(Self::Copy),
            other => Err(format!("unsupported link strategy `{other}` (expected symlink|copy)")),
        }
    }
}

/// A skill bundle discovered in the source directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkillBundle {
    pub name: String,
    pub path: PathBuf,
    pub descriptor: SkillDescriptor,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub source: PathBuf,
    pub location: PathBuf,
    pub descriptor: SkillDescriptor,
}

/// Immutable snapshot of the materialized catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SkillCatalog {
    root: PathBuf,
    entries: BTreeMap<String, CatalogEntry>,
}

impl SkillCatalog {
    pub fn new(root: impl Into<PathBuf>, entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        Self {
            root: root.into(),
            entries: entries.into_iter().map(|entry| (entry.name.clone(), entry)).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }
}
