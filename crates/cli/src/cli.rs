use crate::commands::{Command, OutputFormat};
use crate::tracing::{LogLevel, TracingFormat};
use clap::{Args, Parser, Subcommand};
use deckflow_pipeline::PipelineInputs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "deckflow")]
#[command(about = "Inspect the stage cache of deckflow presentation pipelines")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short = 'l',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-format",
        global = true,
        help = "Log output format",
        default_value = "compact",
        value_enum
    )]
    pub log_format: TracingFormat,

    #[arg(long, global = true, help = "Output logs in JSON format")]
    pub json: bool,

    #[arg(
        short = 'c',
        long,
        global = true,
        help = "Pipeline configuration file (TOML)"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Cache root, overriding the configuration")]
    pub cache_dir: Option<PathBuf>,
}

impl Cli {
    /// Log format after applying `--json`
    pub fn tracing_format(&self) -> TracingFormat {
        if self.json {
            TracingFormat::Json
        } else {
            self.log_format
        }
    }
}

/// The four input artifacts of a pipeline run
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    #[arg(long, help = "Template presentation (.pptx)")]
    pub template: PathBuf,

    #[arg(long, help = "Reference content PDF")]
    pub reference_pdf: PathBuf,

    #[arg(long, help = "Reference slide deck built from the reference PDF")]
    pub reference_deck: PathBuf,

    #[arg(long, help = "Target document PDF")]
    pub target: PathBuf,
}

impl From<InputArgs> for PipelineInputs {
    fn from(args: InputArgs) -> Self {
        Self {
            template: args.template,
            reference_pdf: args.reference_pdf,
            reference_deck: args.reference_deck,
            target_pdf: args.target,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Show version information")]
    Version,
    #[command(about = "Print the cache key of every stage for a set of inputs")]
    Keys {
        #[command(flatten)]
        inputs: InputArgs,
        #[arg(long, help = "Output format", default_value = "text", value_enum)]
        format: OutputFormat,
    },
    #[command(about = "Show which stages are cached for a set of inputs")]
    Status {
        #[command(flatten)]
        inputs: InputArgs,
        #[arg(long, help = "Re-hash every cached file instead of checking sizes")]
        deep: bool,
        #[arg(long, help = "Output format", default_value = "text", value_enum)]
        format: OutputFormat,
    },
    #[command(about = "Verify the checksums of one cache entry")]
    Verify {
        #[arg(help = "Stage kind (template, induction, reference-pair, target-document, generation)")]
        kind: String,
        #[arg(help = "Cache key")]
        key: String,
    },
}

impl From<Commands> for Command {
    fn from(cmd: Commands) -> Self {
        match cmd {
            Commands::Version => Self::Version,
            Commands::Keys { inputs, format } => Self::Keys {
                inputs: inputs.into(),
                format,
            },
            Commands::Status {
                inputs,
                deep,
                format,
            } => Self::Status {
                inputs: inputs.into(),
                deep,
                format,
            },
            Commands::Verify { kind, key } => Self::Verify { kind, key },
        }
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}
