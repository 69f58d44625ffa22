//! Pipeline phases and their per-run state

use deckflow_cache::{CacheKey, StageKind};
use serde::{Deserialize, Serialize};

/// The six ordered pipeline phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Parse the template presentation and render slide images
    TemplateParsing,
    /// Induce slide layouts from the parsed template
    SlideInduction,
    /// Extract preference guidelines from a reference PDF + deck
    ReferenceParsing,
    /// Parse the target document
    TargetParsing,
    /// Generate the initial presentation
    Generation,
    /// Refine the generated presentation (never cached)
    Refinement,
}

impl Phase {
    /// Every phase in execution order
    pub const ALL: [Self; 6] = [
        Self::TemplateParsing,
        Self::SlideInduction,
        Self::ReferenceParsing,
        Self::TargetParsing,
        Self::Generation,
        Self::Refinement,
    ];

    /// One-based position in the pipeline
    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Self::TemplateParsing => 1,
            Self::SlideInduction => 2,
            Self::ReferenceParsing => 3,
            Self::TargetParsing => 4,
            Self::Generation => 5,
            Self::Refinement => 6,
        }
    }

    /// Cache namespace of the phase; `None` for refinement
    #[must_use]
    pub fn cache_kind(self) -> Option<StageKind> {
        match self {
            Self::TemplateParsing => Some(StageKind::Template),
            Self::SlideInduction => Some(StageKind::Induction),
            Self::ReferenceParsing => Some(StageKind::ReferencePair),
            Self::TargetParsing => Some(StageKind::TargetDocument),
            Self::Generation => Some(StageKind::Generation),
            Self::Refinement => None,
        }
    }

    /// Human readable name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::TemplateParsing => "template parsing",
            Self::SlideInduction => "slide induction",
            Self::ReferenceParsing => "reference document parsing",
            Self::TargetParsing => "target document parsing",
            Self::Generation => "presentation generation",
            Self::Refinement => "presentation refinement",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// States a phase moves through during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseState {
    /// Not reached yet
    NotStarted,
    /// Looking for a complete cache entry
    CacheCheck,
    /// Restoring from a complete entry
    CacheHit,
    /// Running the external executor
    Executing,
    /// Writing the fresh result into the cache
    Persisting,
    /// Finished successfully
    Done,
    /// Aborted the run
    Failed,
}

/// How a finished phase obtained its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    /// Restored from the cache; the executor was not invoked
    CacheHit,
    /// The executor ran
    Executed,
    /// A corrupt entry was found and the executor ran to replace it
    Recovered,
    /// Not run because the pipeline exited early
    Skipped,
}

/// Record of one phase in a [`crate::RunReport`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// Which phase
    pub phase: Phase,
    /// Cache key, for cacheable phases
    pub key: Option<CacheKey>,
    /// How the result was obtained
    pub resolution: Resolution,
    /// State transitions, starting at [`PhaseState::NotStarted`]
    pub states: Vec<PhaseState>,
}

/// Tracks state transitions of a running phase
#[derive(Debug)]
pub(crate) struct PhaseTracker {
    phase: Phase,
    key: Option<CacheKey>,
    states: Vec<PhaseState>,
}

impl PhaseTracker {
    pub(crate) fn start(phase: Phase, key: Option<&CacheKey>) -> Self {
        tracing::info!(phase = %phase, step = phase.number(), "[STAGE] {}", phase);
        Self {
            phase,
            key: key.cloned(),
            states: vec![PhaseState::NotStarted],
        }
    }

    pub(crate) fn advance(&mut self, state: PhaseState) {
        tracing::debug!(phase = %self.phase, state = ?state, "Phase transition");
        self.states.push(state);
    }

    pub(crate) fn current(&self) -> PhaseState {
        self.states
            .last()
            .copied()
            .unwrap_or(PhaseState::NotStarted)
    }

    pub(crate) fn fail(mut self) {
        let reached = self.current();
        self.advance(PhaseState::Failed);
        tracing::error!(
            phase = %self.phase,
            reached = ?reached,
            "Phase failed; aborting pipeline run"
        );
    }

    /// Record for a phase that was never entered
    pub(crate) fn skipped(phase: Phase) -> PhaseRecord {
        tracing::info!(phase = %phase, "Skipping {}", phase);
        PhaseRecord {
            phase,
            key: None,
            resolution: Resolution::Skipped,
            states: vec![PhaseState::NotStarted],
        }
    }

    pub(crate) fn finish(mut self, resolution: Resolution) -> PhaseRecord {
        self.advance(PhaseState::Done);
        PhaseRecord {
            phase: self.phase,
            key: self.key,
            resolution,
            states: self.states,
        }
    }
}
