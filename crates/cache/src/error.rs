//! Error types for the stage cache

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(deckflow::cache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(deckflow::cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// A referenced input artifact does not exist
    #[error("Input artifact not found: {}", path.display())]
    #[diagnostic(
        code(deckflow::cache::invalid_input),
        help("Cache keys are derived from file contents; the artifact must exist and be a regular file")
    )]
    InvalidInput {
        /// Path that was expected to exist
        path: PathBuf,
    },

    /// No manifest exists for the requested entry
    #[error("Cache entry not found: {kind}/{key}")]
    #[diagnostic(
        code(deckflow::cache::not_found),
        help("The entry was never committed; run the stage to populate it")
    )]
    NotFound {
        /// Stage namespace
        kind: String,
        /// The cache key that was not found
        key: String,
    },

    /// Manifest present but a declared file is missing or altered
    #[error("Cache entry {kind}/{key} is corrupt: {}", problems.join(", "))]
    #[diagnostic(
        code(deckflow::cache::corruption),
        help("Renew the entry or delete the entry directory to force recomputation")
    )]
    CacheCorruption {
        /// Stage namespace
        kind: String,
        /// Affected key
        key: String,
        /// Human readable description of each inconsistency
        problems: Vec<String>,
    },

    /// A complete entry already exists and renew was not requested
    #[error("Cache entry {kind}/{key} already exists")]
    #[diagnostic(code(deckflow::cache::exists))]
    EntryExists {
        /// Stage namespace
        kind: String,
        /// Existing key
        key: String,
    },

    /// Atomic commit of a staged entry failed
    #[error("Failed to commit cache entry {kind}/{key}: {message}")]
    #[diagnostic(
        code(deckflow::cache::persistence),
        help("The entry was left absent; the next run will recompute it")
    )]
    Persistence {
        /// Stage namespace
        kind: String,
        /// Key being committed
        key: String,
        /// What went wrong
        message: String,
    },

    /// Files already in the hydration root differ from the entry's content
    #[error("Workspace files differ from cache entry {kind}/{key}: {}", paths.join(", "))]
    #[diagnostic(
        code(deckflow::cache::hydration_conflict),
        help("Hydration never overwrites existing files; remove them or recompute the stage")
    )]
    HydrationConflict {
        /// Stage namespace
        kind: String,
        /// Entry key
        key: String,
        /// Hydration-root-relative paths holding other content
        paths: Vec<String>,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(deckflow::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an invalid input error
    #[must_use]
    pub fn invalid_input(path: impl Into<PathBuf>) -> Self {
        Self::InvalidInput { path: path.into() }
    }

    /// Create a not found error
    #[must_use]
    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Create a corruption error
    #[must_use]
    pub fn corruption(
        kind: impl Into<String>,
        key: impl Into<String>,
        problems: Vec<String>,
    ) -> Self {
        Self::CacheCorruption {
            kind: kind.into(),
            key: key.into(),
            problems,
        }
    }

    /// Create a persistence error
    #[must_use]
    pub fn persistence(
        kind: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Persistence {
            kind: kind.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a hydration conflict error
    #[must_use]
    pub fn hydration_conflict(
        kind: impl Into<String>,
        key: impl Into<String>,
        paths: Vec<String>,
    ) -> Self {
        Self::HydrationConflict {
            kind: kind.into(),
            key: key.into(),
            paths,
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Whether this error reports an inconsistent entry on disk
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CacheCorruption { .. })
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
