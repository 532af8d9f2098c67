//! Fingerprint and build-key hashing
//!
//! Every input that affects the produced executable is read once into an
//! [`InputDigest`]: the entry point, the sibling modules it imports, the
//! executable name and the options with the files they reference. The fingerprint adds the backend identity, its version and
//! the target triple; the build key adds the selection inputs instead and is
//! used to deduplicate concurrent builds before a backend is chosen.

use crate::backend::{BackendId, Platform};
use crate::error::{BuildError, BuildResult};
use crate::profile::ImportScanner;
use crate::request::BuildRequest;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Hash of the backend-independent build inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDigest {
    hash: String,
}

impl InputDigest {
    /// Read and hash the entry point, its local modules, icon, data files and
    /// options, plus the resolved executable name
    ///
    /// The output directory is not an input.
    pub fn compute(request: &BuildRequest) -> BuildResult<Self> {
        let mut hasher = Sha256::new();

        let entry = fs::read(&request.entry_point)
            .map_err(|e| BuildError::io(&request.entry_point, e))?;
        hasher.update(b"entry\0");
        hasher.update(Sha256::digest(&entry));

        for source in ImportScanner::local_sources(&request.entry_point) {
            hasher.update(b"module\0");
            hash_tree(&mut hasher, &source);
        }

        hasher.update(b"name\0");
        hasher.update(request.output_name().as_bytes());

        hasher.update(b"options\0");
        hasher.update(serde_json::to_vec(&request.options)?);

        if let Some(icon) = &request.options.icon {
            let bytes = fs::read(icon).map_err(|e| {
                BuildError::InvalidOption(format!("icon '{}' is unreadable: {}", icon.display(), e))
            })?;
            hasher.update(b"icon\0");
            hasher.update(Sha256::digest(&bytes));
        }

        for mapping in &request.options.extra_data {
            hasher.update(b"data\0");
            hash_tree(&mut hasher, &mapping.source);
        }

        Ok(Self {
            hash: format!("{:x}", hasher.finalize()),
        })
    }

    /// Cache key for one backend
    pub fn fingerprint(&self, backend: BackendId, version: &str, target: &Platform) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.hash.as_bytes());
        hasher.update(b"\0backend\0");
        hasher.update(backend.name().as_bytes());
        hasher.update(b"\0version\0");
        hasher.update(version.as_bytes());
        hasher.update(b"\0target\0");
        hasher.update(target.triple().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Backend-independent key for in-flight deduplication
    pub fn build_key(&self, request: &BuildRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.hash.as_bytes());
        hasher.update(b"\0preference\0");
        match request.backend.explicit() {
            Some(id) => hasher.update(id.name().as_bytes()),
            None => hasher.update(b"auto"),
        }
        hasher.update(b"\0excluded\0");
        for id in &request.excluded_backends {
            hasher.update(id.name().as_bytes());
            hasher.update(b",");
        }
        hasher.update(b"\0priority\0");
        hasher.update(request.priority.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Hash a file, or every file under a directory in sorted order
///
/// Bytecode caches and hidden directories are skipped.
///
/// Missing paths hash their name only; the backend reports them.
fn hash_tree(hasher: &mut Sha256, root: &Path) {
    hasher.update(root.to_string_lossy().as_bytes());
    if root.is_file() {
        if let Ok(bytes) = fs::read(root) {
            hasher.update(Sha256::digest(&bytes));
        }
        return;
    }
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            e.depth() == 0 || !(name.starts_with('.') || name == "__pycache__")
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        if let Ok(rel) = entry.path().strip_prefix(root) {
            hasher.update(rel.to_string_lossy().as_bytes());
        }
        if let Ok(bytes) = fs::read(entry.path()) {
            hasher.update(Sha256::digest(&bytes));
        }
    }
}

/// Short stable hash of a string, used for output partitioning
pub fn short_hash(input: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(input.as_bytes()));
    digest[..8].to_string()
}
