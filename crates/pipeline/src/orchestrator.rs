//! Sequencing of the six phases over the stage cache
//!
//! Every cacheable phase runs the same state machine:
//!
//! ```text
//! NotStarted -> CacheCheck -> CacheHit ------------------------> Done
//!                          \-> Executing -> [Persisting] -------> Done
//! (any state) -> Failed
//! ```
//!
//! A cache hit hydrates the entry into the workspace and rebuilds the typed
//! result without invoking the executor. Hydration never overwrites, so when
//! the workspace already holds files from a different result the hit is
//! abandoned and the phase executes instead. Refinement is never cached.

use crate::config::{CorruptionPolicy, PipelineConfig};
use crate::keys::StageKeys;
use crate::phase::{Phase, PhaseRecord, PhaseState, PhaseTracker, Resolution};
use crate::results::{CachedStage, GeneratedPresentation, RefinedPresentation};
use crate::stages::{ExecutionResult, GenerationInput, RefinementInput, StageContext, StageExecutors};
use crate::workspace::{PipelineInputs, ProjectRun, RunWorkspace};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use deckflow_cache::{CacheKey, EntryStatus, StageCacheStore, default_cache_root, externalize, hydrate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum RunOutcome {
    /// A presentation was produced
    Completed {
        /// Final presentation
        artifact: PathBuf,
        /// Whether refinement ran
        refined: bool,
    },
    /// A phase reported failure without raising an error
    Failed {
        /// The phase that failed
        phase: Phase,
    },
}

/// Summary of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Project identifier
    pub project_id: String,
    /// Keys used for every cacheable phase
    pub keys: StageKeys,
    /// One record per phase, in execution order
    pub records: Vec<PhaseRecord>,
    /// How the run ended
    pub outcome: RunOutcome,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Record of a phase, if it was reached
    #[must_use]
    pub fn record(&self, phase: Phase) -> Option<&PhaseRecord> {
        self.records.iter().find(|r| r.phase == phase)
    }

    /// Resolution of a phase, if it was reached
    #[must_use]
    pub fn resolution(&self, phase: Phase) -> Option<Resolution> {
        self.record(phase).map(|r| r.resolution)
    }

    /// Phases whose executor ran
    #[must_use]
    pub fn executed(&self) -> Vec<Phase> {
        self.records
            .iter()
            .filter(|r| matches!(r.resolution, Resolution::Executed | Resolution::Recovered))
            .map(|r| r.phase)
            .collect()
    }

    /// The final presentation, if the run completed
    #[must_use]
    pub fn artifact(&self) -> Option<&PathBuf> {
        match &self.outcome {
            RunOutcome::Completed { artifact, .. } => Some(artifact),
            RunOutcome::Failed { .. } => None,
        }
    }
}

/// Runs the phases of a project against injected executors
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    executors: StageExecutors,
    store: Option<StageCacheStore>,
}

impl Pipeline {
    /// Create a pipeline, opening the configured cache
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the config is invalid or no cache
    /// root can be resolved.
    pub fn new(config: PipelineConfig, executors: StageExecutors) -> Result<Self> {
        config.validate()?;
        let store = if config.cache_mode == crate::CacheMode::Off {
            None
        } else {
            let root = match &config.cache_dir {
                Some(dir) => dir.clone(),
                None => default_cache_root().map_err(|e| {
                    Error::configuration(format!("Cannot resolve cache root: {e}"))
                })?,
            };
            tracing::debug!(root = %root.display(), mode = ?config.cache_mode, "Using stage cache");
            Some(StageCacheStore::new(root))
        };
        Ok(Self {
            config,
            executors,
            store,
        })
    }

    /// Replace the cache store
    #[must_use]
    pub fn with_store(mut self, store: StageCacheStore) -> Self {
        self.store = Some(store);
        self
    }

    /// The run configuration
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The cache store, unless caching is off
    #[must_use]
    pub fn store(&self) -> Option<&StageCacheStore> {
        self.store.as_ref()
    }

    /// Derive the cache keys a run over `inputs` would use
    ///
    /// # Errors
    ///
    /// Returns an error if an input artifact is missing
    pub fn keys(&self, inputs: &PipelineInputs) -> Result<StageKeys> {
        StageKeys::derive(inputs, &self.config)
    }

    /// Run every phase for one project
    ///
    /// # Errors
    ///
    /// Returns the first error raised by any phase; the error names the phase.
    /// A generation that reports failure through its sentinel is not an error
    /// and yields [`RunOutcome::Failed`].
    pub fn run(&self, run: &ProjectRun, inputs: &PipelineInputs) -> Result<RunReport> {
        let started_at = Utc::now();
        tracing::info!(project = %run.project_id, "Starting pipeline run");

        let keys = self.keys(inputs)?;
        let ws = RunWorkspace::prepare(run)?;
        let template_copy = ws.stage_template(&inputs.template)?;
        let ctx = StageContext {
            workspace: &ws,
            config: &self.config,
        };
        let mut records = Vec::with_capacity(Phase::ALL.len());

        let template = self.resolve(
            Phase::TemplateParsing,
            &keys.template,
            false,
            &ws,
            &mut records,
            || self.executors.template.parse_template(&ctx, &template_copy),
        )?;
        let induction = self.resolve(
            Phase::SlideInduction,
            &keys.induction,
            false,
            &ws,
            &mut records,
            || self.executors.induction.induce_slides(&ctx, &template),
        )?;
        let guidelines = self.resolve(
            Phase::ReferenceParsing,
            &keys.reference_pair,
            false,
            &ws,
            &mut records,
            || {
                self.executors.references.parse_references(
                    &ctx,
                    &inputs.reference_pdf,
                    &inputs.reference_deck,
                )
            },
        )?;
        let document = self.resolve(
            Phase::TargetParsing,
            &keys.target_document,
            false,
            &ws,
            &mut records,
            || {
                self.executors
                    .document
                    .parse_document(&ctx, &inputs.target_pdf, &guidelines)
            },
        )?;

        let generation_input = GenerationInput {
            template: &template,
            induction: &induction,
            guidelines: &guidelines,
            document: &document,
            slide_count: self.config.slide_count,
            parameters: &self.config.generation,
        };
        let generated: GeneratedPresentation = self.resolve(
            Phase::Generation,
            &keys.generation,
            self.config.regen_outline,
            &ws,
            &mut records,
            || self.executors.generator.generate(&ctx, &generation_input),
        )?;

        let outcome = match &generated.presentation {
            None => {
                tracing::warn!(
                    project = %run.project_id,
                    "Generation produced no presentation; ending run"
                );
                records.push(PhaseTracker::skipped(Phase::Refinement));
                RunOutcome::Failed {
                    phase: Phase::Generation,
                }
            }
            Some(initial) if self.config.no_refinement => {
                records.push(PhaseTracker::skipped(Phase::Refinement));
                RunOutcome::Completed {
                    artifact: initial.clone(),
                    refined: false,
                }
            }
            Some(initial) => {
                let input = RefinementInput {
                    initial,
                    outline: &generated.outline,
                    reference_deck: &inputs.reference_deck,
                    template: &template,
                    induction: &induction,
                    guidelines: &guidelines,
                    document: &document,
                    slide_count: self.config.slide_count,
                    max_iterations: self.config.max_refine_iterations,
                };
                let refined = self.refine(&ctx, &input, &mut records)?;
                RunOutcome::Completed {
                    artifact: refined.presentation,
                    refined: true,
                }
            }
        };

        let report = RunReport {
            project_id: run.project_id.clone(),
            keys,
            records,
            outcome,
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            project = %report.project_id,
            outcome = ?report.outcome,
            executed = report.executed().len(),
            "Pipeline run finished"
        );
        Ok(report)
    }

    fn refine(
        &self,
        ctx: &StageContext<'_>,
        input: &RefinementInput<'_>,
        records: &mut Vec<PhaseRecord>,
    ) -> Result<RefinedPresentation> {
        let mut tracker = PhaseTracker::start(Phase::Refinement, None);
        tracker.advance(PhaseState::Executing);
        match self.executors.refiner.refine(ctx, input) {
            Ok(refined) => {
                records.push(tracker.finish(Resolution::Executed));
                Ok(refined)
            }
            Err(source) => {
                tracker.fail();
                Err(Error::Execution {
                    phase: Phase::Refinement,
                    source,
                })
            }
        }
    }

    /// Run one cacheable phase through the cache state machine
    fn resolve<T: CachedStage>(
        &self,
        phase: Phase,
        key: &CacheKey,
        force_renew: bool,
        ws: &RunWorkspace,
        records: &mut Vec<PhaseRecord>,
        execute: impl FnOnce() -> ExecutionResult<T>,
    ) -> Result<T> {
        let mut tracker = PhaseTracker::start(phase, Some(key));
        match self.resolve_inner(&mut tracker, phase, key, force_renew, ws, execute) {
            Ok((value, resolution)) => {
                records.push(tracker.finish(resolution));
                Ok(value)
            }
            Err(e) => {
                tracker.fail();
                Err(e)
            }
        }
    }

    fn resolve_inner<T: CachedStage>(
        &self,
        tracker: &mut PhaseTracker,
        phase: Phase,
        key: &CacheKey,
        force_renew: bool,
        ws: &RunWorkspace,
        execute: impl FnOnce() -> ExecutionResult<T>,
    ) -> Result<(T, Resolution)> {
        let mode = self.config.cache_mode;
        let mut renew = force_renew || mode.renews();
        let mut resolution = Resolution::Executed;

        if let Some(store) = self.store.as_ref().filter(|_| mode.reads() && !force_renew) {
            tracker.advance(PhaseState::CacheCheck);
            let problems = match store.status(T::KIND, key) {
                EntryStatus::Missing => {
                    tracing::debug!(phase = %phase, kind = %T::KIND, key = %key, "Cache miss");
                    None
                }
                EntryStatus::Corrupt(problems) => Some(problems),
                EntryStatus::Complete => match Self::restore::<T>(store, key, ws) {
                    Ok(value) => {
                        tracker.advance(PhaseState::CacheHit);
                        tracing::info!(phase = %phase, kind = %T::KIND, key = %key, "Cache hit");
                        return Ok((value, Resolution::CacheHit));
                    }
                    Err(deckflow_cache::Error::CacheCorruption { problems, .. }) => Some(problems),
                    Err(deckflow_cache::Error::HydrationConflict { paths, .. }) => {
                        tracing::warn!(
                            phase = %phase,
                            kind = %T::KIND,
                            key = %key,
                            conflicts = ?paths,
                            "Workspace holds another result's files; re-executing"
                        );
                        None
                    }
                    Err(e) => return Err(Error::cache(phase, e)),
                },
            };
            if let Some(problems) = problems {
                if self.config.on_corruption == CorruptionPolicy::Abort {
                    return Err(Error::cache(
                        phase,
                        deckflow_cache::Error::corruption(T::KIND.dir_name(), key.as_str(), problems),
                    ));
                }
                tracing::error!(
                    phase = %phase,
                    kind = %T::KIND,
                    key = %key,
                    problems = ?problems,
                    "Corrupt cache entry; recomputing"
                );
                renew = true;
                resolution = Resolution::Recovered;
            }
        }

        tracker.advance(PhaseState::Executing);
        let value = execute().map_err(|source| Error::Execution { phase, source })?;

        let persist_to = self
            .store
            .as_ref()
            .filter(|_| mode.writes() && value.is_cacheable());
        if let Some(store) = persist_to {
            tracker.advance(PhaseState::Persisting);
            let outputs = value.capture(ws).map_err(|e| Error::cache(phase, e))?;
            match externalize(store, T::hydration_root(ws), T::KIND, key, &outputs, renew) {
                Ok(_) => {}
                Err(deckflow_cache::Error::EntryExists { .. }) => {
                    tracing::debug!(
                        phase = %phase,
                        kind = %T::KIND,
                        key = %key,
                        "Entry committed concurrently; keeping fresh result"
                    );
                }
                Err(e) => return Err(Error::cache(phase, e)),
            }
        }
        Ok((value, resolution))
    }

    fn restore<T: CachedStage>(
        store: &StageCacheStore,
        key: &CacheKey,
        ws: &RunWorkspace,
    ) -> deckflow_cache::Result<T> {
        let entry = store.get(T::KIND, key)?;
        hydrate(T::hydration_root(ws), &entry)?;
        T::restore(&entry, ws)
    }
}
