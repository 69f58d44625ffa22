//! Typed stage results and how each maps onto a cache entry

use crate::workspace::{RunWorkspace, layout};
use deckflow_cache::{
    CacheEntry, Error as CacheError, Result as CacheResult, StageKind, StageOutputs,
    materialize_document,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Phase 1 result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTemplate {
    /// The template presentation as parsed
    pub presentation: PathBuf,
    /// Directory of rendered slide images
    pub slide_images: PathBuf,
}

/// Phase 2 result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideInduction {
    /// Layout template presentation
    pub template_presentation: PathBuf,
    /// Induced layout description
    pub induction: serde_json::Value,
}

/// Phase 3 result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceGuidelines {
    /// Preference guidelines
    pub guidelines: serde_json::Value,
}

/// Phase 4 result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    /// Parsed document
    pub document: serde_json::Value,
    /// Absolute image path to caption
    pub captions: BTreeMap<String, String>,
}

/// Phase 5 result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedPresentation {
    /// Generated deck; `None` means generation failed
    pub presentation: Option<PathBuf>,
    /// Presentation outline
    pub outline: serde_json::Value,
}

impl GeneratedPresentation {
    /// The failure sentinel
    #[must_use]
    pub fn failed(outline: serde_json::Value) -> Self {
        Self {
            presentation: None,
            outline,
        }
    }
}

/// Phase 6 result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinedPresentation {
    /// The refined deck
    pub presentation: PathBuf,
}

/// A result that round-trips through a cache entry
pub(crate) trait CachedStage: Sized {
    const KIND: StageKind;

    /// Directory the entry's workspace paths are relative to
    fn hydration_root(ws: &RunWorkspace) -> &Path {
        ws.root()
    }

    /// Files and documents to persist
    fn capture(&self, ws: &RunWorkspace) -> CacheResult<StageOutputs>;

    /// Rebuild the result from an entry already hydrated into `ws`
    fn restore(entry: &CacheEntry, ws: &RunWorkspace) -> CacheResult<Self>;

    /// Whether the result may be persisted at all
    fn is_cacheable(&self) -> bool {
        true
    }
}

fn any_file(_: &Path) -> bool {
    true
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .is_some_and(|ext| matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp"))
}

fn decode<T: serde::de::DeserializeOwned>(
    entry: &CacheEntry,
    path: &str,
    value: serde_json::Value,
) -> CacheResult<T> {
    serde_json::from_value(value).map_err(|e| {
        CacheError::corruption(
            entry.kind.dir_name(),
            entry.key.as_str(),
            vec![format!("{path} has an unexpected shape: {e}")],
        )
    })
}

impl CachedStage for ParsedTemplate {
    const KIND: StageKind = StageKind::Template;

    fn capture(&self, _ws: &RunWorkspace) -> CacheResult<StageOutputs> {
        StageOutputs::new()
            .file(
                &self.presentation,
                "source.pptx",
                layout::SOURCE_PRESENTATION,
            )
            .dir(&self.slide_images, "slide_images", layout::SLIDE_IMAGES, any_file)
    }

    fn restore(_entry: &CacheEntry, ws: &RunWorkspace) -> CacheResult<Self> {
        Ok(Self {
            presentation: ws.source_presentation(),
            slide_images: ws.slide_images_dir(),
        })
    }
}

impl CachedStage for SlideInduction {
    const KIND: StageKind = StageKind::Induction;

    fn capture(&self, _ws: &RunWorkspace) -> CacheResult<StageOutputs> {
        Ok(StageOutputs::new()
            .file(
                &self.template_presentation,
                "template.pptx",
                layout::TEMPLATE_PRESENTATION,
            )
            .document(
                "slide_induction.json",
                self.induction.clone(),
                Some(layout::SLIDE_INDUCTION.to_string()),
            ))
    }

    fn restore(entry: &CacheEntry, ws: &RunWorkspace) -> CacheResult<Self> {
        Ok(Self {
            template_presentation: ws.path(layout::TEMPLATE_PRESENTATION),
            induction: entry.read_json("slide_induction.json")?,
        })
    }
}

impl CachedStage for ReferenceGuidelines {
    const KIND: StageKind = StageKind::ReferencePair;

    fn capture(&self, ws: &RunWorkspace) -> CacheResult<StageOutputs> {
        StageOutputs::new()
            .document(
                "pref_guidelines.json",
                self.guidelines.clone(),
                Some(layout::PREF_GUIDELINES.to_string()),
            )
            .dir(&ws.path(layout::REF_PDF_DIR), "ref_pdf", layout::REF_PDF_DIR, any_file)?
            .dir(
                &ws.path(layout::REF_DECK_DIR),
                "ref_slide_pdf",
                layout::REF_DECK_DIR,
                any_file,
            )
    }

    fn restore(entry: &CacheEntry, _ws: &RunWorkspace) -> CacheResult<Self> {
        Ok(Self {
            guidelines: entry.read_json("pref_guidelines.json")?,
        })
    }
}

impl CachedStage for ParsedDocument {
    const KIND: StageKind = StageKind::TargetDocument;

    fn capture(&self, ws: &RunWorkspace) -> CacheResult<StageOutputs> {
        let captions = serde_json::to_value(&self.captions)
            .map_err(|e| CacheError::serialization(format!("image captions: {e}")))?;
        Ok(StageOutputs::new()
            .dir(&ws.target_dir(), "images", layout::TARGET_DIR, is_image)?
            .path_document("refined_doc.json", self.document.clone())
            .path_document("image_captions.json", captions))
    }

    fn restore(entry: &CacheEntry, ws: &RunWorkspace) -> CacheResult<Self> {
        let document =
            materialize_document(entry, "refined_doc.json", ws.root(), layout::REFINED_DOC)?;
        let captions = materialize_document(
            entry,
            "image_captions.json",
            ws.root(),
            layout::IMAGE_CAPTIONS,
        )?;
        Ok(Self {
            document,
            captions: decode(entry, "image_captions.json", captions)?,
        })
    }
}

impl CachedStage for GeneratedPresentation {
    const KIND: StageKind = StageKind::Generation;

    fn hydration_root(ws: &RunWorkspace) -> &Path {
        ws.output_dir()
    }

    fn capture(&self, _ws: &RunWorkspace) -> CacheResult<StageOutputs> {
        let Some(presentation) = &self.presentation else {
            return Err(CacheError::configuration(
                "a failed generation has no presentation to cache",
            ));
        };
        Ok(StageOutputs::new()
            .file(presentation, "final.pptx", layout::FINAL_PRESENTATION)
            .optional_file(
                presentation.with_extension("pdf"),
                "final.pdf",
                layout::FINAL_PDF,
            )
            .document(
                "presentation_outline.json",
                self.outline.clone(),
                Some(layout::OUTLINE.to_string()),
            ))
    }

    fn restore(entry: &CacheEntry, ws: &RunWorkspace) -> CacheResult<Self> {
        Ok(Self {
            presentation: Some(ws.output_path(layout::FINAL_PRESENTATION)),
            outline: entry.read_json("presentation_outline.json")?,
        })
    }

    fn is_cacheable(&self) -> bool {
        self.presentation.is_some()
    }
}
