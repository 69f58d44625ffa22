//! Command implementations
//!
//! Each command returns the text to print; `main` owns stdout.

pub mod keys;
pub mod status;
pub mod verify;
pub mod version;

use deckflow_cache::{StageCacheStore, default_cache_root};
use deckflow_pipeline::{PipelineConfig, PipelineInputs};
use std::path::{Path, PathBuf};

/// Rendering of command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Aligned plain text
    Text,
    /// Pretty JSON
    Json,
}

/// A parsed CLI command
#[derive(Debug)]
pub enum Command {
    Version,
    Keys {
        inputs: PipelineInputs,
        format: OutputFormat,
    },
    Status {
        inputs: PipelineInputs,
        deep: bool,
        format: OutputFormat,
    },
    Verify {
        kind: String,
        key: String,
    },
}

impl Command {
    /// Name used in the command span
    pub fn name(&self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Keys { .. } => "keys",
            Self::Status { .. } => "status",
            Self::Verify { .. } => "verify",
        }
    }
}

/// Configuration shared by every command
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    /// Pipeline configuration (defaults when no file was given)
    pub config: PipelineConfig,
}

impl CommandContext {
    /// Load the configuration file, then apply a cache root override
    pub fn load(config_path: Option<&Path>, cache_dir: Option<PathBuf>) -> miette::Result<Self> {
        let mut config = match config_path {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if cache_dir.is_some() {
            config.cache_dir = cache_dir;
        }
        Ok(Self { config })
    }

    /// Open the cache this configuration points at
    pub fn store(&self) -> miette::Result<StageCacheStore> {
        let root = match &self.config.cache_dir {
            Some(dir) => dir.clone(),
            None => default_cache_root()?,
        };
        tracing::debug!(root = %root.display(), "Opened stage cache");
        Ok(StageCacheStore::new(root))
    }
}

/// Run a command and return its output
pub fn execute(command: Command, ctx: &CommandContext) -> miette::Result<String> {
    match command {
        Command::Version => Ok(version::get_version_info()),
        Command::Keys { inputs, format } => keys::execute(ctx, &inputs, format),
        Command::Status {
            inputs,
            deep,
            format,
        } => status::execute(ctx, &inputs, deep, format),
        Command::Verify { kind, key } => verify::execute(ctx, &kind, &key),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> miette::Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| miette::miette!("Failed to render JSON output: {e}"))
}
