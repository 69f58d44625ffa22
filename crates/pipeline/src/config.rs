//! Pipeline configuration
//!
//! Generation and presentation parameters are opaque to the orchestrator and
//! passed through to stage executors untouched.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of slides to generate
pub const DEFAULT_SLIDE_COUNT: u32 = 10;

/// Default bound on refinement iterations
pub const DEFAULT_MAX_REFINE_ITERATIONS: u32 = 3;

/// How the stage cache is used for a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    /// Never read or write the cache
    Off,
    /// Reuse existing entries but never write new ones
    Read,
    /// Reuse existing entries and persist fresh results
    #[default]
    ReadWrite,
    /// Ignore existing entries, recompute and renew them
    Write,
}

impl CacheMode {
    /// Whether existing entries may satisfy a phase
    #[must_use]
    pub fn reads(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Whether fresh results are persisted
    #[must_use]
    pub fn writes(self) -> bool {
        matches!(self, Self::ReadWrite | Self::Write)
    }

    /// Whether existing entries are replaced
    #[must_use]
    pub fn renews(self) -> bool {
        self == Self::Write
    }
}

/// What to do when a cache entry's manifest disagrees with its files
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CorruptionPolicy {
    /// Log the corruption, re-execute the phase and renew the entry
    #[default]
    Recompute,
    /// Fail the run with the corruption error
    Abort,
}

/// Configuration for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Number of slides the generator should produce
    pub slide_count: u32,

    /// Upper bound on refinement iterations
    pub max_refine_iterations: u32,

    /// Return the generated presentation without refining it
    pub no_refinement: bool,

    /// Regenerate the outline and presentation even on a cache hit
    pub regen_outline: bool,

    /// Cache usage for this run
    pub cache_mode: CacheMode,

    /// Cache root override; resolved from the environment when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Handling of corrupt cache entries
    pub on_corruption: CorruptionPolicy,

    /// Generation parameters passed through to executors
    pub generation: serde_json::Value,

    /// Presentation-format parameters passed through to executors
    pub presentation: serde_json::Value,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            slide_count: DEFAULT_SLIDE_COUNT,
            max_refine_iterations: DEFAULT_MAX_REFINE_ITERATIONS,
            no_refinement: false,
            regen_outline: false,
            cache_mode: CacheMode::default(),
            cache_dir: None,
            on_corruption: CorruptionPolicy::default(),
            generation: serde_json::Value::Null,
            presentation: serde_json::Value::Null,
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from TOML
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the TOML is malformed or invalid
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::configuration(format!("Invalid pipeline config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a configuration
    /// error if it does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read"))?;
        Self::from_toml_str(&content)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the slide count is zero
    pub fn validate(&self) -> Result<()> {
        if self.slide_count == 0 {
            return Err(Error::configuration("slideCount must be at least 1"));
        }
        Ok(())
    }
}
