//! Per-stage cache keys of a run
//!
//! All keys are derived from the input artifacts and configuration before any
//! phase runs. Downstream keys combine upstream keys, never anything a phase
//! wrote into the workspace.

use crate::config::PipelineConfig;
use crate::phase::Phase;
use crate::workspace::PipelineInputs;
use crate::{Error, Result};
use deckflow_cache::{CacheKey, StageKind, derive_composite_key, derive_input_key, fingerprint_json};
use serde::{Deserialize, Serialize};

/// Key prefix of template presentations
pub const TEMPLATE_PREFIX: &str = "pptx_";
/// Key prefix of reference PDFs
pub const REFERENCE_PDF_PREFIX: &str = "refpdf_";
/// Key prefix of reference slide decks
pub const REFERENCE_DECK_PREFIX: &str = "refppt_";
/// Key prefix of target PDFs
pub const TARGET_PDF_PREFIX: &str = "tgtpdf_";

/// The cache key of every cacheable phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageKeys {
    /// Template parsing
    pub template: CacheKey,
    /// Slide induction
    pub induction: CacheKey,
    /// Reference pair parsing
    pub reference_pair: CacheKey,
    /// Target document parsing
    pub target_document: CacheKey,
    /// Presentation generation
    pub generation: CacheKey,
}

impl StageKeys {
    /// Derive every key of a run
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] attributed to the first phase whose input
    /// artifact is missing.
    pub fn derive(inputs: &PipelineInputs, config: &PipelineConfig) -> Result<Self> {
        let template = derive_input_key(&inputs.template, TEMPLATE_PREFIX)
            .map_err(|e| Error::cache(Phase::TemplateParsing, e))?;
        let induction = derive_composite_key(&[&template]);

        let reference_pdf = derive_input_key(&inputs.reference_pdf, REFERENCE_PDF_PREFIX)
            .map_err(|e| Error::cache(Phase::ReferenceParsing, e))?;
        let reference_deck = derive_input_key(&inputs.reference_deck, REFERENCE_DECK_PREFIX)
            .map_err(|e| Error::cache(Phase::ReferenceParsing, e))?;
        let reference_pair = derive_composite_key(&[&reference_pdf, &reference_deck]);

        let target_pdf = derive_input_key(&inputs.target_pdf, TARGET_PDF_PREFIX)
            .map_err(|e| Error::cache(Phase::TargetParsing, e))?;
        let target_document = derive_composite_key(&[&target_pdf, &reference_pair]);

        let params = fingerprint_json(&config.generation)
            .map_err(|e| Error::cache(Phase::Generation, e))?;
        let generation = derive_composite_key(&[
            template.to_string(),
            induction.to_string(),
            reference_pair.to_string(),
            target_document.to_string(),
            format!("slides={}", config.slide_count),
            format!("params={params}"),
        ]);

        Ok(Self {
            template,
            induction,
            reference_pair,
            target_document,
            generation,
        })
    }

    /// Key of a stage namespace
    #[must_use]
    pub fn get(&self, kind: StageKind) -> &CacheKey {
        match kind {
            StageKind::Template => &self.template,
            StageKind::Induction => &self.induction,
            StageKind::ReferencePair => &self.reference_pair,
            StageKind::TargetDocument => &self.target_document,
            StageKind::Generation => &self.generation,
        }
    }
}
