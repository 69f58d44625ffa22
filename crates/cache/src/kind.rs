//! Stage namespaces and their completeness requirements

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A cache namespace, one per cacheable pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    /// Parsed template presentation and its rendered slide images
    Template,
    /// Slide induction over a parsed template
    Induction,
    /// Preference guidelines extracted from a reference PDF + deck pair
    ReferencePair,
    /// Parsed target document with image captions
    TargetDocument,
    /// Initial generated presentation and outline
    Generation,
}

impl StageKind {
    /// Every cacheable stage, in pipeline order
    pub const ALL: [Self; 5] = [
        Self::Template,
        Self::Induction,
        Self::ReferencePair,
        Self::TargetDocument,
        Self::Generation,
    ];

    /// Directory name under the cache root
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Induction => "induction",
            Self::ReferencePair => "reference-pair",
            Self::TargetDocument => "target-document",
            Self::Generation => "generation",
        }
    }

    /// Entry-relative files that must be declared for an entry to count
    #[must_use]
    pub fn required_files(self) -> &'static [&'static str] {
        match self {
            Self::Template => &["source.pptx"],
            Self::Induction => &["template.pptx", "slide_induction.json"],
            Self::ReferencePair => &["pref_guidelines.json"],
            Self::TargetDocument => &["refined_doc.json", "image_captions.json"],
            Self::Generation => &["final.pptx", "presentation_outline.json"],
        }
    }

    /// Entry-relative directories that must hold at least one declared file
    #[must_use]
    pub fn required_dirs(self) -> &'static [&'static str] {
        match self {
            Self::Template => &["slide_images"],
            _ => &[],
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.dir_name() == s)
            .ok_or_else(|| format!("Unknown stage kind: {s}"))
    }
}
