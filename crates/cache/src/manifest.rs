//! Completeness manifest stored alongside every cache entry

use crate::StageKind;
use crate::key::{CacheKey, hash_file};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// File name of the manifest inside an entry directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Manifest format version
pub const MANIFEST_VERSION: u32 = 1;

/// One file declared by a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Path relative to the entry directory, `/`-separated
    pub path: String,
    /// Path relative to the hydration root this file is copied to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,
    /// File size in bytes
    pub size: u64,
    /// SHA256 hash of file contents
    pub sha256: String,
}

/// The declared contents of a committed cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryManifest {
    /// Manifest format version
    pub version: u32,
    /// Stage namespace
    pub kind: StageKind,
    /// Entry key
    pub key: CacheKey,
    /// When the entry was committed
    pub created_at: DateTime<Utc>,
    /// Version of deckflow that wrote the entry
    pub deckflow_version: String,
    /// Every file of the entry
    pub files: Vec<ManifestFile>,
}

impl EntryManifest {
    /// Read and parse the manifest of an entry directory
    ///
    /// Returns `Ok(None)` when no manifest file exists.
    pub fn read(entry_dir: &Path) -> Result<Option<Self>> {
        let path = entry_dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read(&path).map_err(|e| Error::io(e, &path, "read"))?;
        let manifest = serde_json::from_slice(&content).map_err(|e| {
            Error::serialization(format!("Failed to parse {}: {e}", path.display()))
        })?;
        Ok(Some(manifest))
    }

    /// Write the manifest into an entry directory
    pub fn write(&self, entry_dir: &Path) -> Result<()> {
        let path = entry_dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::serialization(format!("Failed to serialize manifest: {e}")))?;
        fs::write(&path, json).map_err(|e| Error::io(e, &path, "write"))
    }

    /// Look up a declared file by its entry-relative path
    #[must_use]
    pub fn file(&self, path: &str) -> Option<&ManifestFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Structural problems that make this manifest unusable for its stage kind
    ///
    /// Checks that the statically required files and directories are declared.
    #[must_use]
    pub fn schema_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.version != MANIFEST_VERSION {
            problems.push(format!("unsupported manifest version {}", self.version));
        }
        for required in self.kind.required_files() {
            if self.file(required).is_none() {
                problems.push(format!("manifest does not declare {required}"));
            }
        }
        for dir in self.kind.required_dirs() {
            let prefix = format!("{dir}/");
            if !self.files.iter().any(|f| f.path.starts_with(&prefix)) {
                problems.push(format!("manifest declares no files under {dir}/"));
            }
        }
        problems
    }

    /// Declared files that are absent or have the wrong size on disk
    ///
    /// Only metadata is read; see [`EntryManifest::checksum_problems`] for a
    /// content check.
    #[must_use]
    pub fn presence_problems(&self, entry_dir: &Path) -> Vec<String> {
        self.files
            .iter()
            .filter_map(|f| match fs::metadata(entry_dir.join(&f.path)) {
                Ok(meta) if meta.is_file() && meta.len() == f.size => None,
                Ok(meta) if meta.is_file() => Some(format!(
                    "size mismatch for {} (expected {}, found {})",
                    f.path,
                    f.size,
                    meta.len()
                )),
                _ => Some(format!("missing {}", f.path)),
            })
            .collect()
    }

    /// Declared files whose content hash no longer matches
    #[must_use]
    pub fn checksum_problems(&self, entry_dir: &Path) -> Vec<String> {
        self.files
            .iter()
            .filter_map(|f| match hash_file(&entry_dir.join(&f.path)) {
                Ok(hash) if hash == f.sha256 => None,
                Ok(_) => Some(format!("checksum mismatch for {}", f.path)),
                Err(_) => Some(format!("missing {}", f.path)),
            })
            .collect()
    }
}

/// Convert an entry-relative path to the manifest's `/`-separated form
#[must_use]
pub fn normalize_rel_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
