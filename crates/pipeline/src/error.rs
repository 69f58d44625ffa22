//! Error types for pipeline runs

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use crate::phase::Phase;
use crate::stages::ExecutionError;
use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for pipeline runs
///
/// Every failure that happens inside a phase carries that phase.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Cache failure (key derivation, corruption, persistence) within a phase
    #[error("Cache failure during {phase}: {source}")]
    #[diagnostic(code(deckflow::pipeline::cache))]
    Cache {
        /// Phase that was running
        phase: Phase,
        /// Underlying cache error
        #[source]
        source: deckflow_cache::Error,
    },

    /// An external stage executor failed
    #[error("Stage {phase} failed: {source}")]
    #[diagnostic(
        code(deckflow::pipeline::execution),
        help("Stage failures are not retried by the pipeline; fix the cause and rerun")
    )]
    Execution {
        /// Phase whose executor failed
        phase: Phase,
        /// Error reported by the executor
        #[source]
        source: ExecutionError,
    },

    /// I/O error while preparing the run workspace
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(deckflow::pipeline::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed
        operation: String,
    },

    /// Invalid pipeline configuration
    #[error("Configuration error: {message}")]
    #[diagnostic(code(deckflow::pipeline::config))]
    Configuration {
        /// Error message describing the configuration issue
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

    /// Wrap a cache error with the phase it occurred in
    #[must_use]
    pub fn cache(phase: Phase, source: deckflow_cache::Error) -> Self {
        Self::Cache { phase, source }
    }

    /// Phase the error occurred in, if it happened inside one
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Cache { phase, .. } | Self::Execution { phase, .. } => Some(*phase),
            Self::Io { .. } | Self::Configuration { .. } => None,
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;
