//! Staged presentation pipeline with a content-addressed stage cache
//!
//! A run turns a template, a reference PDF + slide deck pair and a target
//! document into a presentation through six phases:
//!
//! 1. template parsing
//! 2. slide induction
//! 3. reference parsing
//! 4. target document parsing
//! 5. generation
//! 6. refinement
//!
//! Phases 1-5 are cached under keys derived from input content and upstream
//! keys (see [`StageKeys`]). The phases themselves are implemented by the
//! caller through the traits in [`stages`] and injected as [`StageExecutors`].
//!
//! ```rust,ignore
//! let pipeline = Pipeline::new(PipelineConfig::default(), executors)?;
//! let report = pipeline.run(&run, &inputs)?;
//! println!("{:?}", report.outcome);
//! ```

#![expect(
    clippy::missing_errors_doc,
    reason = "Executor trait errors are documented on ExecutionError"
)]

pub mod config;
mod error;
pub mod keys;
pub mod orchestrator;
pub mod phase;
pub mod results;
pub mod stages;
pub mod workspace;

pub use config::{CacheMode, CorruptionPolicy, PipelineConfig};
pub use error::{Error, Result};
pub use keys::StageKeys;
pub use orchestrator::{Pipeline, RunOutcome, RunReport};
pub use phase::{Phase, PhaseRecord, PhaseState, Resolution};
pub use results::{
    GeneratedPresentation, ParsedDocument, ParsedTemplate, RefinedPresentation,
    ReferenceGuidelines, SlideInduction,
};
pub use stages::{
    DocumentParser, ExecutionError, ExecutionResult, GenerationInput, PresentationGenerator,
    PresentationRefiner, ReferenceParser, RefinementInput, SlideInducer, StageContext,
    StageExecutors, TemplateParser,
};
pub use workspace::{PipelineInputs, ProjectRun, RunWorkspace};
