//! Stage cache store with manifest-checked lookups and atomic commits
//!
//! ## Directory Structure
//!
//! ```text
//! <cache_root>/
//!   .staging/                 (in-flight writes, never read)
//!   template/<key>/
//!     manifest.json           (written last, defines completeness)
//!     source.pptx
//!     slide_images/...
//!   induction/<key>/...
//!   reference-pair/<key>/...
//!   target-document/<key>/...
//!   generation/<key>/...
//! ```
//!
//! An entry becomes visible through a single directory `rename` out of
//! `.staging/`, so a crashed writer leaves nothing under the namespace
//! directories.

use crate::key::{CacheKey, hash_file};
use crate::manifest::{EntryManifest, MANIFEST_FILE, MANIFEST_VERSION, ManifestFile};
use crate::{Error, Result, StageKind};
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;

const STAGING_DIR: &str = ".staging";

/// Whether an entry is usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// No manifest was ever committed for this key
    Missing,
    /// Manifest present and every declared file exists with its recorded size
    Complete,
    /// Manifest present but inconsistent with the files on disk
    Corrupt(Vec<String>),
}

/// A committed, validated cache entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Stage namespace
    pub kind: StageKind,
    /// The cache key
    pub key: CacheKey,
    /// Path to the cache entry directory
    pub path: PathBuf,
    /// The entry's manifest
    pub manifest: EntryManifest,
}

impl CacheEntry {
    /// Absolute path of a declared file
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the manifest does not declare `path`
    pub fn file_path(&self, path: &str) -> Result<PathBuf> {
        if self.manifest.file(path).is_none() {
            return Err(Error::corruption(
                self.kind.dir_name(),
                self.key.as_str(),
                vec![format!("manifest does not declare {path}")],
            ));
        }
        Ok(self.path.join(path))
    }

    /// Deserialize a declared JSON file
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the file is undeclared, or an I/O or
    /// serialization error if it cannot be read.
    pub fn read_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let file = self.file_path(path)?;
        let bytes = fs::read(&file).map_err(|e| Error::io(e, &file, "read"))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::serialization(format!("Failed to parse {}: {e}", file.display())))
    }
}

/// A file to place into an entry via [`StageCacheStore::put`]
#[derive(Debug, Clone)]
pub struct EntryFile {
    /// File to copy
    pub source: PathBuf,
    /// Destination relative to the entry directory
    pub path: String,
    /// Destination relative to the hydration root, if hydrated
    pub workspace_path: Option<String>,
}

/// On-disk cache of stage results, namespaced by [`StageKind`]
#[derive(Debug, Clone)]
pub struct StageCacheStore {
    root: PathBuf,
}

impl StageCacheStore {
    /// Create a store rooted at the given directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a store at the resolved default cache root
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::root::default_cache_root()?))
    }

    /// Root directory of the store
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory an entry lives in once committed
    #[must_use]
    pub fn entry_path(&self, kind: StageKind, key: &CacheKey) -> PathBuf {
        self.root.join(kind.dir_name()).join(key.as_str())
    }

    /// Classify an entry without reading file contents
    #[must_use]
    pub fn status(&self, kind: StageKind, key: &CacheKey) -> EntryStatus {
        let path = self.entry_path(kind, key);
        let manifest = match EntryManifest::read(&path) {
            Ok(Some(m)) => m,
            Ok(None) => return EntryStatus::Missing,
            Err(e) => return EntryStatus::Corrupt(vec![format!("unreadable manifest: {e}")]),
        };
        let mut problems = manifest.schema_problems();
        if manifest.kind != kind || manifest.key != *key {
            problems.push(format!(
                "manifest describes {}/{}",
                manifest.kind, manifest.key
            ));
        }
        problems.extend(manifest.presence_problems(&path));
        if problems.is_empty() {
            EntryStatus::Complete
        } else {
            EntryStatus::Corrupt(problems)
        }
    }

    /// True only if the entry's manifest is present and fully satisfied
    #[must_use]
    pub fn has(&self, kind: StageKind, key: &CacheKey) -> bool {
        self.status(kind, key) == EntryStatus::Complete
    }

    /// Load and validate an entry, including file checksums
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no manifest exists and
    /// [`Error::CacheCorruption`] if the manifest and files disagree.
    pub fn get(&self, kind: StageKind, key: &CacheKey) -> Result<CacheEntry> {
        let path = self.entry_path(kind, key);
        let manifest = match EntryManifest::read(&path) {
            Ok(Some(m)) => m,
            Ok(None) => return Err(Error::not_found(kind.dir_name(), key.as_str())),
            Err(e) => {
                return Err(Error::corruption(
                    kind.dir_name(),
                    key.as_str(),
                    vec![format!("unreadable manifest: {e}")],
                ));
            }
        };
        let mut problems = manifest.schema_problems();
        problems.extend(manifest.checksum_problems(&path));
        if !problems.is_empty() {
            return Err(Error::corruption(kind.dir_name(), key.as_str(), problems));
        }
        Ok(CacheEntry {
            kind,
            key: key.clone(),
            path,
            manifest,
        })
    }

    /// Like [`StageCacheStore::status`], but also re-hashes every declared file
    #[must_use]
    pub fn verify(&self, kind: StageKind, key: &CacheKey) -> EntryStatus {
        match self.get(kind, key) {
            Ok(_) => EntryStatus::Complete,
            Err(Error::NotFound { .. }) => EntryStatus::Missing,
            Err(Error::CacheCorruption { problems, .. }) => EntryStatus::Corrupt(problems),
            Err(e) => EntryStatus::Corrupt(vec![e.to_string()]),
        }
    }

    /// Begin writing an entry in a private staging directory
    pub fn stage(&self, kind: StageKind, key: &CacheKey) -> Result<StagingEntry<'_>> {
        let staging_root = self.root.join(STAGING_DIR);
        fs::create_dir_all(&staging_root)
            .map_err(|e| Error::io(e, &staging_root, "create_dir_all"))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", kind.dir_name()))
            .tempdir_in(&staging_root)
            .map_err(|e| Error::io(e, &staging_root, "create staging dir"))?;
        Ok(StagingEntry {
            store: self,
            kind,
            key: key.clone(),
            dir,
            files: Vec::new(),
        })
    }

    /// Copy a set of files into a new entry and commit it
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryExists`] if a complete entry is present and
    /// `renew` is false, or [`Error::Persistence`] if the commit fails.
    pub fn put(
        &self,
        kind: StageKind,
        key: &CacheKey,
        files: &[EntryFile],
        renew: bool,
    ) -> Result<CacheEntry> {
        let mut staging = self.stage(kind, key)?;
        for file in files {
            staging.add_file(&file.source, &file.path, file.workspace_path.as_deref())?;
        }
        staging.commit(renew)
    }

    /// Rename a fully staged entry into place
    ///
    /// A rename that loses a race against another writer of the same key
    /// reports [`Error::EntryExists`] rather than a persistence failure.
    fn install(&self, kind: StageKind, key: &CacheKey, staged: &Path) -> Result<()> {
        let final_path = self.entry_path(kind, key);
        let Err(e) = fs::rename(staged, &final_path) else {
            return Ok(());
        };
        let _ = fs::remove_dir_all(staged);
        if self.status(kind, key) == EntryStatus::Complete {
            tracing::debug!(
                kind = %kind,
                key = %key,
                "Entry committed by another writer"
            );
            return Err(Error::EntryExists {
                kind: kind.dir_name().to_string(),
                key: key.to_string(),
            });
        }
        Err(Error::persistence(
            kind.dir_name(),
            key.as_str(),
            format!("rename into {} failed: {e}", final_path.display()),
        ))
    }

    fn move_aside(&self, path: &Path) -> Result<TempDir> {
        let staging_root = self.root.join(STAGING_DIR);
        let trash = tempfile::Builder::new()
            .prefix("replaced-")
            .tempdir_in(&staging_root)
            .map_err(|e| Error::io(e, &staging_root, "create staging dir"))?;
        let dst = trash.path().join("entry");
        fs::rename(path, &dst).map_err(|e| Error::io(e, path, "rename"))?;
        Ok(trash)
    }
}

/// An entry being assembled; invisible to readers until [`StagingEntry::commit`]
///
/// Dropping an uncommitted entry removes its staging directory.
#[derive(Debug)]
pub struct StagingEntry<'a> {
    store: &'a StageCacheStore,
    kind: StageKind,
    key: CacheKey,
    dir: TempDir,
    files: Vec<ManifestFile>,
}

impl StagingEntry<'_> {
    /// Staging directory the entry is assembled in
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Copy a file into the entry
    pub fn add_file(
        &mut self,
        source: &Path,
        path: &str,
        workspace_path: Option<&str>,
    ) -> Result<()> {
        let dst = self.destination(path)?;
        fs::copy(source, &dst).map_err(|e| Error::io(e, source, "copy"))?;
        self.record(path, workspace_path, &dst)
    }

    /// Serialize a JSON document into the entry
    pub fn write_json(
        &mut self,
        path: &str,
        value: &serde_json::Value,
        workspace_path: Option<&str>,
    ) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| Error::serialization(format!("Failed to serialize {path}: {e}")))?;
        let dst = self.destination(path)?;
        fs::write(&dst, json).map_err(|e| Error::io(e, &dst, "write"))?;
        self.record(path, workspace_path, &dst)
    }

    fn destination(&self, path: &str) -> Result<PathBuf> {
        validate_rel_path(path)?;
        if path == MANIFEST_FILE {
            return Err(Error::configuration(format!(
                "{MANIFEST_FILE} is reserved for the entry manifest"
            )));
        }
        let dst = self.dir.path().join(path);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }
        Ok(dst)
    }

    fn record(&mut self, path: &str, workspace_path: Option<&str>, written: &Path) -> Result<()> {
        if let Some(ws) = workspace_path {
            validate_rel_path(ws)?;
        }
        let size = fs::metadata(written)
            .map_err(|e| Error::io(e, written, "metadata"))?
            .len();
        let sha256 = hash_file(written)?;
        self.files.retain(|f| f.path != path);
        self.files.push(ManifestFile {
            path: path.to_string(),
            workspace_path: workspace_path.map(str::to_string),
            size,
            sha256,
        });
        Ok(())
    }

    /// Write the manifest and atomically move the entry into place
    ///
    /// An existing complete entry is only replaced when `renew` is set.
    /// Incomplete or corrupt entries at the destination are always replaced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryExists`] when a complete entry is present without
    /// `renew`, and [`Error::Persistence`] when the staged files do not satisfy
    /// the stage schema or the final rename fails. In every error case the
    /// destination is left without a new manifest.
    pub fn commit(mut self, renew: bool) -> Result<CacheEntry> {
        let kind = self.kind;
        let key = self.key.clone();
        self.files.sort_by(|a, b| a.path.cmp(&b.path));
        let manifest = EntryManifest {
            version: MANIFEST_VERSION,
            kind,
            key: key.clone(),
            created_at: Utc::now(),
            deckflow_version: env!("CARGO_PKG_VERSION").to_string(),
            files: std::mem::take(&mut self.files),
        };

        let problems = manifest.schema_problems();
        if !problems.is_empty() {
            return Err(Error::persistence(
                kind.dir_name(),
                key.as_str(),
                format!("incomplete stage result: {}", problems.join(", ")),
            ));
        }
        manifest.write(self.dir.path())?;

        let final_path = self.store.entry_path(kind, &key);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }

        // Held until the new entry is in place, then deleted on drop
        let _replaced = if final_path.exists() {
            match self.store.status(kind, &key) {
                EntryStatus::Complete if !renew => {
                    return Err(Error::EntryExists {
                        kind: kind.dir_name().to_string(),
                        key: key.to_string(),
                    });
                }
                status => {
                    tracing::debug!(
                        kind = %kind,
                        key = %key,
                        ?status,
                        "Replacing existing cache entry"
                    );
                    Some(self.store.move_aside(&final_path)?)
                }
            }
        } else {
            None
        };

        let staged = self.dir.keep();
        self.store.install(kind, &key, &staged)?;

        tracing::info!(
            kind = %kind,
            key = %key,
            files = manifest.files.len(),
            "Committed cache entry"
        );
        Ok(CacheEntry {
            kind,
            key,
            path: final_path,
            manifest,
        })
    }
}

fn validate_rel_path(path: &str) -> Result<()> {
    let p = Path::new(path);
    let ok = !path.is_empty()
        && p.components().all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(Error::configuration(format!(
            "Entry paths must be relative and stay inside the entry: {path}"
        )))
    }
}
