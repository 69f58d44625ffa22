//! Moving stage artifacts between a run workspace and the cache
//!
//! `externalize` captures freshly produced files into a committed entry;
//! `hydrate` copies an entry back into a workspace without touching files that
//! already exist there. JSON documents that embed artifact paths (image lists,
//! caption maps) are stored with entry-relative paths and resolved back to the
//! hydrated workspace on read.

use crate::key::{CacheKey, hash_file};
use crate::manifest::{ManifestFile, normalize_rel_path};
use crate::store::{CacheEntry, StageCacheStore};
use crate::{Error, Result, StageKind};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A file produced by a stage executor
#[derive(Debug, Clone)]
pub struct ProducedFile {
    /// Absolute path of the produced file
    pub source: PathBuf,
    /// Destination relative to the entry directory
    pub entry_path: String,
    /// Destination relative to the hydration root, if hydrated
    pub workspace_path: Option<String>,
}

/// A structured result serialized into the entry as JSON
#[derive(Debug, Clone)]
pub struct ProducedDocument {
    /// Destination relative to the entry directory
    pub entry_path: String,
    /// Document content
    pub value: Value,
    /// Destination relative to the hydration root, if copied verbatim
    pub workspace_path: Option<String>,
    /// Replace embedded artifact paths with entry-relative ones
    pub rewrite_paths: bool,
}

/// Everything a stage produced that belongs in its cache entry
#[derive(Debug, Clone, Default)]
pub struct StageOutputs {
    /// Binary or opaque artifacts
    pub files: Vec<ProducedFile>,
    /// JSON side-channel documents
    pub documents: Vec<ProducedDocument>,
}

impl StageOutputs {
    /// Empty output set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file that hydrates back to `workspace_path`
    #[must_use]
    pub fn file(
        mut self,
        source: impl Into<PathBuf>,
        entry_path: impl Into<String>,
        workspace_path: impl Into<String>,
    ) -> Self {
        self.files.push(ProducedFile {
            source: source.into(),
            entry_path: entry_path.into(),
            workspace_path: Some(workspace_path.into()),
        });
        self
    }

    /// Add a file only if it exists on disk
    #[must_use]
    pub fn optional_file(
        self,
        source: impl Into<PathBuf>,
        entry_path: impl Into<String>,
        workspace_path: impl Into<String>,
    ) -> Self {
        let source = source.into();
        if source.is_file() {
            self.file(source, entry_path, workspace_path)
        } else {
            self
        }
    }

    /// Add every file under `source_dir` accepted by `filter`
    ///
    /// Files land under `entry_prefix/` in the entry and hydrate to
    /// `workspace_prefix/`, keeping their path relative to `source_dir`.
    pub fn dir(
        mut self,
        source_dir: &Path,
        entry_prefix: &str,
        workspace_prefix: &str,
        filter: impl Fn(&Path) -> bool,
    ) -> Result<Self> {
        if !source_dir.is_dir() {
            return Ok(self);
        }
        let mut found: Vec<PathBuf> = Vec::new();
        for entry in walkdir::WalkDir::new(source_dir).follow_links(true) {
            let entry = entry.map_err(|e| {
                Error::configuration(format!("walk {} failed: {e}", source_dir.display()))
            })?;
            if entry.file_type().is_file() && filter(entry.path()) {
                found.push(entry.into_path());
            }
        }
        found.sort();
        for path in found {
            let rel = path.strip_prefix(source_dir).map_err(|_| {
                Error::configuration(format!(
                    "path {} is not under {}",
                    path.display(),
                    source_dir.display()
                ))
            })?;
            let rel = normalize_rel_path(rel);
            self.files.push(ProducedFile {
                entry_path: join_rel(entry_prefix, &rel),
                workspace_path: Some(join_rel(workspace_prefix, &rel)),
                source: path,
            });
        }
        Ok(self)
    }

    /// Add a JSON document copied verbatim to `workspace_path` on hydration
    #[must_use]
    pub fn document(
        mut self,
        entry_path: impl Into<String>,
        value: Value,
        workspace_path: Option<String>,
    ) -> Self {
        self.documents.push(ProducedDocument {
            entry_path: entry_path.into(),
            value,
            workspace_path,
            rewrite_paths: false,
        });
        self
    }

    /// Add a JSON document whose embedded artifact paths are made entry-relative
    ///
    /// Such documents are not hydrated verbatim; read them back with
    /// [`resolve_document`] or [`materialize_document`].
    #[must_use]
    pub fn path_document(mut self, entry_path: impl Into<String>, value: Value) -> Self {
        self.documents.push(ProducedDocument {
            entry_path: entry_path.into(),
            value,
            workspace_path: None,
            rewrite_paths: true,
        });
        self
    }
}

fn join_rel(prefix: &str, rel: &str) -> String {
    if prefix.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{rel}", prefix.trim_end_matches('/'))
    }
}

/// Outcome of a hydration pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrationReport {
    /// Files copied into the workspace
    pub copied: usize,
    /// Files left alone because they already held the entry's content
    pub skipped: usize,
}

/// Capture produced files into a new (or renewed) cache entry
///
/// `hydration_root` is the directory `workspace_path`s are relative to; it is
/// used to recognise workspace-relative paths inside rewritten documents.
///
/// # Errors
///
/// Propagates I/O errors while copying, and [`Error::EntryExists`] /
/// [`Error::Persistence`] from the commit.
pub fn externalize(
    store: &StageCacheStore,
    hydration_root: &Path,
    kind: StageKind,
    key: &CacheKey,
    outputs: &StageOutputs,
    renew: bool,
) -> Result<CacheEntry> {
    let mut staging = store.stage(kind, key)?;

    let mut rewrites: HashMap<String, String> = HashMap::new();
    for file in &outputs.files {
        if !file.source.is_file() {
            return Err(Error::persistence(
                kind.dir_name(),
                key.as_str(),
                format!("produced file {} does not exist", file.source.display()),
            ));
        }
        staging.add_file(&file.source, &file.entry_path, file.workspace_path.as_deref())?;

        rewrites.insert(
            file.source.to_string_lossy().into_owned(),
            file.entry_path.clone(),
        );
        if let Ok(rel) = file.source.strip_prefix(hydration_root) {
            rewrites.insert(normalize_rel_path(rel), file.entry_path.clone());
        }
        if let Some(ws) = &file.workspace_path {
            rewrites.insert(ws.clone(), file.entry_path.clone());
            rewrites.insert(
                hydration_root.join(ws).to_string_lossy().into_owned(),
                file.entry_path.clone(),
            );
        }
    }

    for doc in &outputs.documents {
        let value = if doc.rewrite_paths {
            let (value, unresolved) = rewrite_paths(&doc.value, &rewrites);
            if unresolved > 0 {
                tracing::warn!(
                    kind = %kind,
                    document = %doc.entry_path,
                    unresolved,
                    "Document references paths that were not captured"
                );
            }
            value
        } else {
            doc.value.clone()
        };
        staging.write_json(&doc.entry_path, &value, doc.workspace_path.as_deref())?;
    }

    staging.commit(renew)
}

/// Copy an entry's hydratable files into `hydration_root`
///
/// Existing files are never overwritten, so replaying a hydration after a
/// partial run is safe. Each copy lands under a temporary name first, so an
/// interrupted copy never leaves a truncated file under the final name.
///
/// Existing files must already hold the entry's content. If any of them
/// differs, nothing is copied and the differing paths are reported.
///
/// # Errors
///
/// Returns [`Error::HydrationConflict`] if existing files differ from the
/// entry, or an I/O error if a copy fails
pub fn hydrate(hydration_root: &Path, entry: &CacheEntry) -> Result<HydrationReport> {
    let conflicts: Vec<String> = entry
        .manifest
        .files
        .iter()
        .filter_map(|f| {
            let ws = f.workspace_path.as_ref()?;
            let dst = hydration_root.join(ws);
            (dst.exists() && !holds_content(&dst, f, &entry.path)).then(|| ws.clone())
        })
        .collect();
    if !conflicts.is_empty() {
        return Err(Error::hydration_conflict(
            entry.kind.dir_name(),
            entry.key.as_str(),
            conflicts,
        ));
    }

    let mut report = HydrationReport::default();
    for file in &entry.manifest.files {
        let Some(ws) = &file.workspace_path else {
            continue;
        };
        let dst = hydration_root.join(ws);
        if dst.exists() {
            report.skipped += 1;
            continue;
        }
        let src = entry.path.join(&file.path);
        let parent = dst.parent().unwrap_or(hydration_root);
        fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        let tmp = NamedTempFile::new_in(parent).map_err(|e| Error::io(e, parent, "create"))?;
        fs::copy(&src, tmp.path()).map_err(|e| Error::io(e, &src, "copy"))?;
        if persist_new(tmp, &dst)? {
            report.copied += 1;
        } else {
            report.skipped += 1;
        }
    }
    tracing::debug!(
        kind = %entry.kind,
        key = %entry.key,
        copied = report.copied,
        skipped = report.skipped,
        root = %hydration_root.display(),
        "Hydrated cache entry"
    );
    Ok(report)
}

fn holds_content(path: &Path, declared: &ManifestFile, entry_dir: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    if hash_file(path).is_ok_and(|hash| hash == declared.sha256) {
        return true;
    }
    // JSON written by executors may differ from the stored copy only in formatting
    Path::new(&declared.path)
        .extension()
        .is_some_and(|ext| ext == "json")
        && read_json(path).is_some_and(|existing| {
            read_json(&entry_dir.join(&declared.path)).is_some_and(|stored| stored == existing)
        })
}

fn read_json(path: &Path) -> Option<Value> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Move a temp file into place unless the destination appeared meanwhile
fn persist_new(tmp: NamedTempFile, dst: &Path) -> Result<bool> {
    match tmp.persist_noclobber(dst) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(Error::io(e.error, dst, "persist")),
    }
}

/// Read a stored JSON document, resolving entry-relative paths into the workspace
///
/// Every string key or value that names a hydratable file of the entry is
/// replaced by the absolute path that file hydrates to under `hydration_root`.
///
/// # Errors
///
/// Returns a corruption error if the document is not declared, or I/O and
/// serialization errors while reading it.
pub fn resolve_document(entry: &CacheEntry, path: &str, hydration_root: &Path) -> Result<Value> {
    let stored: Value = entry.read_json(path)?;
    let mapping: HashMap<String, String> = entry
        .manifest
        .files
        .iter()
        .filter_map(|f| {
            f.workspace_path.as_ref().map(|ws| {
                (
                    f.path.clone(),
                    hydration_root.join(ws).to_string_lossy().into_owned(),
                )
            })
        })
        .collect();
    Ok(rewrite_paths(&stored, &mapping).0)
}

/// Resolve a stored document and write it into the workspace if absent
///
/// An existing file is kept only if it parses to the resolved document.
///
/// # Errors
///
/// Same as [`resolve_document`], plus [`Error::HydrationConflict`] if an
/// existing file holds another document and I/O errors while writing.
pub fn materialize_document(
    entry: &CacheEntry,
    path: &str,
    hydration_root: &Path,
    workspace_path: &str,
) -> Result<Value> {
    let value = resolve_document(entry, path, hydration_root)?;
    let dst = hydration_root.join(workspace_path);
    if dst.exists() {
        if read_json(&dst).as_ref() != Some(&value) {
            return Err(Error::hydration_conflict(
                entry.kind.dir_name(),
                entry.key.as_str(),
                vec![workspace_path.to_string()],
            ));
        }
    } else {
        let parent = dst.parent().unwrap_or(hydration_root);
        fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        let mut tmp =
            NamedTempFile::new_in(parent).map_err(|e| Error::io(e, parent, "create"))?;
        let json = serde_json::to_vec_pretty(&value)
            .map_err(|e| Error::serialization(format!("Failed to serialize {path}: {e}")))?;
        tmp.write_all(&json)
            .map_err(|e| Error::io(e, tmp.path(), "write"))?;
        persist_new(tmp, &dst)?;
    }
    Ok(value)
}

/// Replace mapped strings in object keys and string values
///
/// Returns the rewritten value and the number of path-like object keys that
/// had no mapping.
fn rewrite_paths(value: &Value, mapping: &HashMap<String, String>) -> (Value, usize) {
    let mut unresolved = 0;
    let rewritten = rewrite_inner(value, mapping, &mut unresolved);
    (rewritten, unresolved)
}

fn rewrite_inner(value: &Value, mapping: &HashMap<String, String>, unresolved: &mut usize) -> Value {
    match value {
        Value::String(s) => Value::String(mapping.get(s).cloned().unwrap_or_else(|| s.clone())),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| rewrite_inner(v, mapping, unresolved))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let key = if let Some(mapped) = mapping.get(k) {
                        mapped.clone()
                    } else {
                        if Path::new(k).is_absolute() {
                            *unresolved += 1;
                        }
                        k.clone()
                    };
                    (key, rewrite_inner(v, mapping, unresolved))
                })
                .collect(),
        ),
        other => other.clone(),
    }
}
