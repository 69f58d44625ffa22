//! Deterministic cache key derivation
//!
//! Input keys hash artifact *content*, never the file name, so a renamed copy of
//! the same template still hits and an edited file under the old name misses.
//! Composite keys hash an ordered, length-prefixed encoding of their parts.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

/// An opaque, validated cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Validate and wrap a key string
    ///
    /// Keys become directory names, so separators and dot-prefixed names are
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the key is not a safe path component
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::configuration("Cache key must not be empty"));
        }
        if key.starts_with('.') || key.contains("..") {
            return Err(Error::configuration(format!(
                "Cache key must not start with '.' or contain '..': {key}"
            )));
        }
        if key.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
            return Err(Error::configuration(format!(
                "Cache key contains a path separator or control character: {key:?}"
            )));
        }
        Ok(Self(key))
    }

    /// Borrow the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Hex SHA-256 of a file's contents, streamed in fixed-size chunks
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::io(e, path, "read"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Derive the key of an input artifact from its content
///
/// The result is `prefix` followed by the hex SHA-256 of the file bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `path` does not name an existing file,
/// or a configuration error if `prefix` would make the key unsafe.
pub fn derive_input_key(path: &Path, prefix: &str) -> Result<CacheKey> {
    if !path.is_file() {
        return Err(Error::invalid_input(path));
    }
    let digest = hash_file(path)?;
    tracing::trace!(path = %path.display(), prefix, "Hashed input artifact");
    CacheKey::new(format!("{prefix}{digest}"))
}

/// Derive a key from an ordered list of upstream keys and parameters
///
/// Each part is encoded as its byte length followed by its bytes, so part
/// boundaries cannot shift. Order is significant and never normalised.
#[must_use]
pub fn derive_composite_key<S: AsRef<str>>(parts: &[S]) -> CacheKey {
    let mut hasher = Sha256::new();
    for part in parts {
        let bytes = part.as_ref().as_bytes();
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    CacheKey(hex::encode(hasher.finalize()))
}

/// Stable fingerprint of an arbitrary JSON value
///
/// Object keys are sorted recursively before hashing, so the fingerprint does
/// not depend on insertion order even when `serde_json` preserves it.
///
/// # Errors
///
/// Returns a serialization error if the value cannot be encoded
pub fn fingerprint_json(value: &serde_json::Value) -> Result<String> {
    let bytes = serde_json::to_vec(&canonicalize(value))
        .map_err(|e| Error::serialization(format!("Failed to encode fingerprint input: {e}")))?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<&String, serde_json::Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            serde_json::Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), v))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}
