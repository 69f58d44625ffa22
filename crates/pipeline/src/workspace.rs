//! Run identity and workspace layout
//!
//! Stage executors read from and write to a per-project workspace. The layout
//! below is shared by fresh execution and cache hydration, so downstream phases
//! find the same files whichever way an upstream phase resolved.

use crate::phase::Phase;
use crate::{Error, Result};
use deckflow_cache::hash_file;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Workspace-relative paths (relative to the workspace root)
pub mod layout {
    /// Copy of the input template
    pub const SOURCE_PRESENTATION: &str = "source.pptx";
    /// Rendered slide images of the template
    pub const SLIDE_IMAGES: &str = "slide_images";
    /// Template presentation produced by slide induction
    pub const TEMPLATE_PRESENTATION: &str = "template.pptx";
    /// Slide induction data
    pub const SLIDE_INDUCTION: &str = "slide_induction.json";
    /// Preference guidelines from the reference pair
    pub const PREF_GUIDELINES: &str = "pref_guidelines.json";
    /// Parsed reference PDF
    pub const REF_PDF_DIR: &str = "pdf/ref_pdf";
    /// Parsed reference slide deck
    pub const REF_DECK_DIR: &str = "pdf/ref_slide_pdf";
    /// Parsed target document directory
    pub const TARGET_DIR: &str = "pdf/target_pdf";
    /// Parsed target document
    pub const REFINED_DOC: &str = "pdf/target_pdf/refined_doc.json";
    /// Image path to caption map of the target document
    pub const IMAGE_CAPTIONS: &str = "pdf/target_pdf/image_captions.json";

    /// Generated presentation (relative to the output directory)
    pub const FINAL_PRESENTATION: &str = "final.pptx";
    /// Rendered PDF of the generated presentation (relative to the output directory)
    pub const FINAL_PDF: &str = "final.pdf";
    /// Presentation outline (relative to the output directory)
    pub const OUTLINE: &str = "presentation_outline.json";
}

/// One pipeline invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRun {
    /// Project identifier
    pub project_id: String,
    /// Root of the per-project workspace
    pub workspace_root: PathBuf,
    /// Where user-facing artifacts are written
    pub output_dir: PathBuf,
}

impl ProjectRun {
    /// Describe a run
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        workspace_root: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            workspace_root: workspace_root.into(),
            output_dir: output_dir.into(),
        }
    }
}

/// The input artifacts of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineInputs {
    /// Template presentation
    pub template: PathBuf,
    /// Reference content PDF
    pub reference_pdf: PathBuf,
    /// Reference slide deck built from the reference PDF
    pub reference_deck: PathBuf,
    /// Document to turn into a presentation
    pub target_pdf: PathBuf,
}

/// The mutable directory tree of a run
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    project_id: String,
    root: PathBuf,
    output_dir: PathBuf,
}

impl RunWorkspace {
    /// Create the workspace and output directories if needed
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory cannot be created
    pub fn prepare(run: &ProjectRun) -> Result<Self> {
        for dir in [&run.workspace_root, &run.output_dir] {
            fs::create_dir_all(dir).map_err(|e| Error::io(e, dir, "create_dir_all"))?;
        }
        Ok(Self {
            project_id: run.project_id.clone(),
            root: run.workspace_root.clone(),
            output_dir: run.output_dir.clone(),
        })
    }

    /// Project identifier
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Workspace root; hydration root of phases 1-4
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Output directory; hydration root of generation
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Absolute path of a workspace-relative layout entry
    #[must_use]
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Absolute path of an output-relative layout entry
    #[must_use]
    pub fn output_path(&self, rel: &str) -> PathBuf {
        self.output_dir.join(rel)
    }

    /// Where the template is staged for parsing
    #[must_use]
    pub fn source_presentation(&self) -> PathBuf {
        self.path(layout::SOURCE_PRESENTATION)
    }

    /// Rendered slide image directory
    #[must_use]
    pub fn slide_images_dir(&self) -> PathBuf {
        self.path(layout::SLIDE_IMAGES)
    }

    /// Parsed target document directory
    #[must_use]
    pub fn target_dir(&self) -> PathBuf {
        self.path(layout::TARGET_DIR)
    }

    /// Copy the template into the workspace as `source.pptx`
    ///
    /// An existing copy is kept only while its content matches `template`;
    /// otherwise it is replaced through a temporary file and a rename.
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be hashed or copied
    pub fn stage_template(&self, template: &Path) -> Result<PathBuf> {
        let dst = self.source_presentation();
        let wanted = hash_file(template).map_err(|e| Error::cache(Phase::TemplateParsing, e))?;
        if dst.is_file() && hash_file(&dst).is_ok_and(|current| current == wanted) {
            return Ok(dst);
        }

        let replaced = dst.exists();
        let tmp = NamedTempFile::new_in(&self.root)
            .map_err(|e| Error::io(e, &self.root, "create"))?;
        fs::copy(template, tmp.path()).map_err(|e| Error::io(e, template, "copy"))?;
        tmp.persist(&dst)
            .map_err(|e| Error::io(e.error, &dst, "persist"))?;
        tracing::debug!(
            template = %template.display(),
            dst = %dst.display(),
            replaced,
            "Staged template into workspace"
        );
        Ok(dst)
    }
}
