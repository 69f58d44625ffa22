//! Stage executor contract
//!
//! Each phase is implemented outside the orchestrator by a type implementing
//! the matching trait. Executors are built once by the caller and injected
//! through [`StageExecutors`]; the orchestrator never constructs them.

use crate::config::PipelineConfig;
use crate::results::{
    GeneratedPresentation, ParsedDocument, ParsedTemplate, RefinedPresentation,
    ReferenceGuidelines, SlideInduction,
};
use crate::workspace::RunWorkspace;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// What every executor can see
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// The run's workspace
    pub workspace: &'a RunWorkspace,
    /// The run's configuration
    pub config: &'a PipelineConfig,
}

/// Failure reported by a stage executor
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExecutionError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ExecutionError {
    /// Create an error from a message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping an underlying cause
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The executor's message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(e: std::io::Error) -> Self {
        Self::with_source(e.to_string(), e)
    }
}

/// Result type returned by executors
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Phase 1: parse the template and render its slides
pub trait TemplateParser: Send + Sync {
    /// Parse `template` (already copied into the workspace)
    fn parse_template(&self, ctx: &StageContext<'_>, template: &Path)
    -> ExecutionResult<ParsedTemplate>;
}

/// Phase 2: induce slide layouts
pub trait SlideInducer: Send + Sync {
    /// Induce layouts from a parsed template
    fn induce_slides(
        &self,
        ctx: &StageContext<'_>,
        template: &ParsedTemplate,
    ) -> ExecutionResult<SlideInduction>;
}

/// Phase 3: extract preference guidelines from a reference pair
pub trait ReferenceParser: Send + Sync {
    /// Parse the reference PDF and the deck built from it
    fn parse_references(
        &self,
        ctx: &StageContext<'_>,
        reference_pdf: &Path,
        reference_deck: &Path,
    ) -> ExecutionResult<ReferenceGuidelines>;
}

/// Phase 4: parse the target document
pub trait DocumentParser: Send + Sync {
    /// Parse `target_pdf` under the given guidelines
    fn parse_document(
        &self,
        ctx: &StageContext<'_>,
        target_pdf: &Path,
        guidelines: &ReferenceGuidelines,
    ) -> ExecutionResult<ParsedDocument>;
}

/// Everything generation depends on
#[derive(Debug, Clone, Copy)]
pub struct GenerationInput<'a> {
    /// Phase 1 result
    pub template: &'a ParsedTemplate,
    /// Phase 2 result
    pub induction: &'a SlideInduction,
    /// Phase 3 result
    pub guidelines: &'a ReferenceGuidelines,
    /// Phase 4 result
    pub document: &'a ParsedDocument,
    /// Number of slides to produce
    pub slide_count: u32,
    /// Opaque generation parameters
    pub parameters: &'a serde_json::Value,
}

/// Phase 5: generate the initial presentation
pub trait PresentationGenerator: Send + Sync {
    /// Generate a presentation
    ///
    /// Returning `presentation: None` reports a generation failure; the run
    /// then ends without refinement and nothing is cached.
    fn generate(
        &self,
        ctx: &StageContext<'_>,
        input: &GenerationInput<'_>,
    ) -> ExecutionResult<GeneratedPresentation>;
}

/// Everything refinement depends on
#[derive(Debug, Clone, Copy)]
pub struct RefinementInput<'a> {
    /// The generated presentation to refine
    pub initial: &'a Path,
    /// Outline the presentation was generated from
    pub outline: &'a serde_json::Value,
    /// Reference slide deck
    pub reference_deck: &'a Path,
    /// Phase 1 result
    pub template: &'a ParsedTemplate,
    /// Phase 2 result
    pub induction: &'a SlideInduction,
    /// Phase 3 result
    pub guidelines: &'a ReferenceGuidelines,
    /// Phase 4 result
    pub document: &'a ParsedDocument,
    /// Number of slides
    pub slide_count: u32,
    /// Upper bound on refinement iterations
    pub max_iterations: u32,
}

/// Phase 6: refine the generated presentation
pub trait PresentationRefiner: Send + Sync {
    /// Refine a generated presentation
    fn refine(
        &self,
        ctx: &StageContext<'_>,
        input: &RefinementInput<'_>,
    ) -> ExecutionResult<RefinedPresentation>;
}

/// The injected executors, one per phase
#[derive(Clone)]
pub struct StageExecutors {
    /// Phase 1
    pub template: Arc<dyn TemplateParser>,
    /// Phase 2
    pub induction: Arc<dyn SlideInducer>,
    /// Phase 3
    pub references: Arc<dyn ReferenceParser>,
    /// Phase 4
    pub document: Arc<dyn DocumentParser>,
    /// Phase 5
    pub generator: Arc<dyn PresentationGenerator>,
    /// Phase 6
    pub refiner: Arc<dyn PresentationRefiner>,
}

impl StageExecutors {
    /// Use one value for every phase
    pub fn from_shared<T>(executor: Arc<T>) -> Self
    where
        T: TemplateParser
            + SlideInducer
            + ReferenceParser
            + DocumentParser
            + PresentationGenerator
            + PresentationRefiner
            + 'static,
    {
        Self {
            template: executor.clone(),
            induction: executor.clone(),
            references: executor.clone(),
            document: executor.clone(),
            generator: executor.clone(),
            refiner: executor,
        }
    }
}

impl std::fmt::Debug for StageExecutors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutors").finish_non_exhaustive()
    }
}
