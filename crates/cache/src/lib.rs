//! Content-addressed stage caching for deckflow
//!
//! This crate provides the caching infrastructure for deckflow pipelines:
//! - Deterministic, content-based cache key derivation
//! - Manifest-checked cache entries, one namespace per stage kind
//! - Atomic commits through a staging directory
//! - Hydration of cached artifacts into a run workspace
//!
//! # Overview
//!
//! An entry lives at `<cache_root>/<stage-kind>/<key>/` and only counts as
//! present once its `manifest.json` exists and every file it declares is on
//! disk. Entries are written into `<cache_root>/.staging/` and moved into place
//! with a single rename, so readers never observe a half-written entry.
//!
//! # Cache Key Computation
//!
//! - Input artifacts: a type prefix plus the SHA-256 of the file content
//! - Multi-input stages: SHA-256 over the ordered, length-prefixed parts
//!   (upstream keys and scalar parameters such as the slide count)

// TODO(cache-docs): Add # Errors documentation to all fallible public functions
#![expect(
    clippy::missing_errors_doc,
    reason = "Error documentation to be added incrementally"
)]

mod error;
pub mod key;
pub mod kind;
pub mod manifest;
pub mod materialize;
pub mod root;
pub mod store;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use key::{CacheKey, derive_composite_key, derive_input_key, fingerprint_json, hash_file};
pub use kind::StageKind;
pub use manifest::{EntryManifest, MANIFEST_FILE, ManifestFile};
pub use materialize::{
    HydrationReport, ProducedDocument, ProducedFile, StageOutputs, externalize, hydrate,
    materialize_document, resolve_document,
};
pub use root::default_cache_root;
pub use store::{CacheEntry, EntryFile, EntryStatus, StageCacheStore, StagingEntry};
