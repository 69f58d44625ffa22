//! Shared fixtures for pipeline integration tests
//!
//! `FakeStages` implements every executor trait with deterministic file
//! output and counts how often each phase runs.

#![allow(dead_code)]

use deckflow_pipeline::workspace::layout;
use deckflow_pipeline::{
    CacheMode, DocumentParser, ExecutionError, ExecutionResult, GeneratedPresentation,
    GenerationInput, ParsedDocument, ParsedTemplate, Phase, Pipeline, PipelineConfig,
    PipelineInputs, PresentationGenerator, PresentationRefiner, ProjectRun, RefinedPresentation,
    ReferenceGuidelines, ReferenceParser, RefinementInput, RunReport, SlideInducer,
    SlideInduction, StageContext, StageExecutors, TemplateParser,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

/// Executors that write small deterministic artifacts
#[derive(Debug, Default)]
pub struct FakeStages {
    calls: [AtomicUsize; 6],
    /// Make generation return the failure sentinel
    pub generation_fails: AtomicBool,
    /// Make a phase return an execution error
    pub error_in: Mutex<Option<Phase>>,
}

impl FakeStages {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self, phase: Phase) -> usize {
        self.calls[usize::from(phase.number() - 1)].load(Ordering::SeqCst)
    }

    /// Invocation count of every phase, in order
    pub fn all_calls(&self) -> [usize; 6] {
        Phase::ALL.map(|p| self.calls(p))
    }

    fn enter(&self, phase: Phase) -> ExecutionResult<()> {
        self.calls[usize::from(phase.number() - 1)].fetch_add(1, Ordering::SeqCst);
        if *self.error_in.lock().unwrap() == Some(phase) {
            return Err(ExecutionError::new(format!("{phase} exploded")));
        }
        Ok(())
    }
}

/// Executors write their documents compactly, unlike the cache's pretty copies
fn write_document(path: &Path, value: &serde_json::Value) -> ExecutionResult<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| ExecutionError::with_source("failed to encode document", e))?;
    fs::write(path, bytes)?;
    Ok(())
}

fn require(path: &Path) -> ExecutionResult<Vec<u8>> {
    fs::read(path).map_err(|e| {
        ExecutionError::with_source(format!("expected {} in workspace", path.display()), e)
    })
}

impl TemplateParser for FakeStages {
    fn parse_template(
        &self,
        ctx: &StageContext<'_>,
        template: &Path,
    ) -> ExecutionResult<ParsedTemplate> {
        self.enter(Phase::TemplateParsing)?;
        let deck = require(template)?;
        let images = ctx.workspace.slide_images_dir();
        fs::create_dir_all(&images)?;
        fs::write(images.join("slide_0001.jpg"), [b"slide:".as_slice(), deck.as_slice()].concat())?;
        fs::write(images.join("slide_0002.jpg"), b"slide:2")?;
        Ok(ParsedTemplate {
            presentation: template.to_path_buf(),
            slide_images: images,
        })
    }
}

impl SlideInducer for FakeStages {
    fn induce_slides(
        &self,
        ctx: &StageContext<'_>,
        template: &ParsedTemplate,
    ) -> ExecutionResult<SlideInduction> {
        self.enter(Phase::SlideInduction)?;
        let deck = require(&template.presentation)?;
        let slides = fs::read_dir(&template.slide_images)?.count();
        let out = ctx.workspace.path(layout::TEMPLATE_PRESENTATION);
        fs::write(&out, [b"layout:".as_slice(), deck.as_slice()].concat())?;
        let induction = json!({"layouts": [{"name": "title", "slides": slides}]});
        write_document(&ctx.workspace.path(layout::SLIDE_INDUCTION), &induction)?;
        Ok(SlideInduction {
            template_presentation: out,
            induction,
        })
    }
}

impl ReferenceParser for FakeStages {
    fn parse_references(
        &self,
        ctx: &StageContext<'_>,
        reference_pdf: &Path,
        reference_deck: &Path,
    ) -> ExecutionResult<ReferenceGuidelines> {
        self.enter(Phase::ReferenceParsing)?;
        let pdf = String::from_utf8_lossy(&require(reference_pdf)?).into_owned();
        let deck = String::from_utf8_lossy(&require(reference_deck)?).into_owned();
        let parsed = ctx.workspace.path(layout::REF_PDF_DIR);
        fs::create_dir_all(&parsed)?;
        fs::write(parsed.join("reference.md"), &pdf)?;
        let guidelines = json!({"tone": "formal", "pdf": pdf, "deck": deck});
        write_document(&ctx.workspace.path(layout::PREF_GUIDELINES), &guidelines)?;
        Ok(ReferenceGuidelines { guidelines })
    }
}

impl DocumentParser for FakeStages {
    fn parse_document(
        &self,
        ctx: &StageContext<'_>,
        target_pdf: &Path,
        guidelines: &ReferenceGuidelines,
    ) -> ExecutionResult<ParsedDocument> {
        self.enter(Phase::TargetParsing)?;
        let text = String::from_utf8_lossy(&require(target_pdf)?).into_owned();
        let dir = ctx.workspace.target_dir();
        fs::create_dir_all(&dir)?;
        let figure = dir.join("figure-1.png");
        fs::write(&figure, format!("figure of {text}"))?;
        let figure = figure.to_string_lossy().into_owned();
        let parsed = ParsedDocument {
            document: json!({
                "title": text,
                "tone": guidelines.guidelines["tone"],
                "figures": [figure.clone()],
            }),
            captions: BTreeMap::from([(figure, "Figure 1".to_string())]),
        };
        write_document(&ctx.workspace.path(layout::REFINED_DOC), &parsed.document)?;
        write_document(&ctx.workspace.path(layout::IMAGE_CAPTIONS), &json!(parsed.captions))?;
        Ok(parsed)
    }
}

impl PresentationGenerator for FakeStages {
    fn generate(
        &self,
        ctx: &StageContext<'_>,
        input: &GenerationInput<'_>,
    ) -> ExecutionResult<GeneratedPresentation> {
        self.enter(Phase::Generation)?;
        // Upstream artifacts must be present whether executed or hydrated
        require(&input.induction.template_presentation)?;
        require(&input.template.slide_images.join("slide_0001.jpg"))?;
        for image in input.document.captions.keys() {
            require(Path::new(image))?;
        }

        let outline = json!({
            "slides": input.slide_count,
            "title": input.document.document["title"],
        });
        if self.generation_fails.load(Ordering::SeqCst) {
            return Ok(GeneratedPresentation::failed(outline));
        }
        let deck = ctx.workspace.output_path(layout::FINAL_PRESENTATION);
        fs::write(
            &deck,
            format!(
                "deck:{}:{}:{}",
                input.slide_count,
                input.document.document["title"],
                input.guidelines.guidelines["tone"]
            ),
        )?;
        fs::write(ctx.workspace.output_path(layout::FINAL_PDF), b"rendered")?;
        write_document(&ctx.workspace.output_path(layout::OUTLINE), &outline)?;
        Ok(GeneratedPresentation {
            presentation: Some(deck),
            outline,
        })
    }
}

impl PresentationRefiner for FakeStages {
    fn refine(
        &self,
        ctx: &StageContext<'_>,
        input: &RefinementInput<'_>,
    ) -> ExecutionResult<RefinedPresentation> {
        self.enter(Phase::Refinement)?;
        let mut deck = require(input.initial)?;
        deck.extend_from_slice(format!("\nrefined:{}", input.max_iterations).as_bytes());
        let out = ctx.workspace.output_path("refined.pptx");
        fs::write(&out, deck)?;
        Ok(RefinedPresentation { presentation: out })
    }
}

/// Input artifacts and a cache directory in one temp dir
pub struct Fixture {
    pub tmp: TempDir,
    pub inputs: PipelineInputs,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("inputs");
        fs::create_dir_all(&dir).unwrap();
        let inputs = PipelineInputs {
            template: dir.join("template.pptx"),
            reference_pdf: dir.join("reference.pdf"),
            reference_deck: dir.join("reference.pptx"),
            target_pdf: dir.join("paper.pdf"),
        };
        fs::write(&inputs.template, "template deck").unwrap();
        fs::write(&inputs.reference_pdf, "reference paper").unwrap();
        fs::write(&inputs.reference_deck, "reference slides").unwrap();
        fs::write(&inputs.target_pdf, "target paper").unwrap();
        Self { tmp, inputs }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.tmp.path().join("cache")
    }

    pub fn config(&self) -> PipelineConfig {
        PipelineConfig {
            cache_dir: Some(self.cache_dir()),
            ..PipelineConfig::default()
        }
    }

    pub fn config_with(&self, mode: CacheMode) -> PipelineConfig {
        PipelineConfig {
            cache_mode: mode,
            ..self.config()
        }
    }

    pub fn project(&self, id: &str) -> ProjectRun {
        let base = self.tmp.path().join("projects").join(id);
        ProjectRun::new(id, base.join("workspace"), base.join("output"))
    }

    pub fn pipeline(&self, config: PipelineConfig, stages: &Arc<FakeStages>) -> Pipeline {
        Pipeline::new(config, StageExecutors::from_shared(stages.clone())).unwrap()
    }

    pub fn run(
        &self,
        config: PipelineConfig,
        stages: &Arc<FakeStages>,
        project: &str,
    ) -> deckflow_pipeline::Result<RunReport> {
        self.pipeline(config, stages)
            .run(&self.project(project), &self.inputs)
    }
}

/// Every file under `root` with its content, sorted by path
pub fn snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files: Vec<_> = walkdir::WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| (e.path().to_path_buf(), fs::read(e.path()).unwrap()))
        .collect();
    files.sort();
    files
}
