//! Collaborator boundaries around a build
//!
//! Protection runs before profiling as a [`PreTransformHook`] on the entry
//! point. Compression runs after a successful outcome as a [`PostBuildHook`]
//! receiving an [`ArtifactHandoff`].

use crate::backend::BackendId;
use crate::error::{BuildError, BuildResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Source or bytecode transform applied before profiling
pub trait PreTransformHook: Send + Sync {
    fn name(&self) -> &str;

    /// Return the path of the transformed entry point
    ///
    /// `work_dir` is a scratch directory owned by the caller.
    fn transform(&self, entry_point: &Path, work_dir: &Path) -> Result<PathBuf, String>;
}

/// Post-processing of a produced artifact
pub trait PostBuildHook: Send + Sync {
    fn name(&self) -> &str;

    fn after_build(&self, handoff: &ArtifactHandoff) -> Result<(), String>;
}

/// Shape of a produced artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// Single executable file
    Executable,
    /// Directory containing the executable and its runtime
    Directory,
}

/// What the compression subsystem receives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandoff {
    /// The executable itself
    pub path: PathBuf,
    pub backend: BackendId,
    /// Total bytes of the deliverable (the whole bundle in directory mode)
    pub size_bytes: u64,
    pub format: ArtifactFormat,
}

impl ArtifactHandoff {
    /// Describe an artifact on disk
    pub fn inspect(path: &Path, backend: BackendId) -> BuildResult<Self> {
        let meta = fs::metadata(path).map_err(|e| BuildError::io(path, e))?;
        if meta.is_dir() {
            return Ok(Self {
                path: path.to_path_buf(),
                backend,
                size_bytes: dir_size(path),
                format: ArtifactFormat::Directory,
            });
        }

        // An executable inside `<name>/` or `<stem>.dist/` next to its
        // runtime is a directory-mode bundle.
        let bundle = path
            .parent()
            .filter(|parent| has_runtime_siblings(parent, path));
        match bundle {
            Some(parent) => Ok(Self {
                path: path.to_path_buf(),
                backend,
                size_bytes: dir_size(parent),
                format: ArtifactFormat::Directory,
            }),
            None => Ok(Self {
                path: path.to_path_buf(),
                backend,
                size_bytes: meta.len(),
                format: ArtifactFormat::Executable,
            }),
        }
    }
}

fn has_runtime_siblings(parent: &Path, exe: &Path) -> bool {
    let Some(dir_name) = parent.file_name().map(|n| n.to_string_lossy().to_string()) else {
        return false;
    };
    let stem = exe
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let named_bundle = dir_name == stem || dir_name.ends_with(".dist");
    named_bundle
        && fs::read_dir(parent)
            .map(|entries| entries.filter_map(|e| e.ok()).any(|e| e.path() != exe))
            .unwrap_or(false)
}

fn dir_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
