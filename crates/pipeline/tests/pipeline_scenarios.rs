//! End-to-end pipeline runs against counting fake executors
//!
//! Covers cold and warm runs, upstream reuse when only the target document
//! changes, early exits, corruption handling and every cache mode.

mod common;

use common::{FakeStages, Fixture, snapshot};
use deckflow_cache::{EntryStatus, StageCacheStore, StageKind};
use deckflow_pipeline::{
    CacheMode, CorruptionPolicy, Error, Phase, PhaseState, PipelineConfig, Resolution, RunOutcome,
};
use std::fs;
use std::sync::atomic::Ordering;

fn store(fixture: &Fixture) -> StageCacheStore {
    StageCacheStore::new(fixture.cache_dir())
}

#[test]
fn test_cold_run_executes_every_phase_and_fills_cache() {
    let fixture = Fixture::new();
    let stages = FakeStages::new();

    let report = fixture.run(fixture.config(), &stages, "p1").unwrap();

    assert_eq!(stages.all_calls(), [1, 1, 1, 1, 1, 1]);
    for phase in Phase::ALL {
        assert_eq!(report.resolution(phase), Some(Resolution::Executed), "{phase}");
    }
    let store = store(&fixture);
    for kind in StageKind::ALL {
        assert!(store.has(kind, report.keys.get(kind)), "{kind} not cached");
    }
    let output = fixture.project("p1").output_dir;
    assert_eq!(
        report.outcome,
        RunOutcome::Completed {
            artifact: output.join("refined.pptx"),
            refined: true,
        }
    );
    assert_eq!(
        report.record(Phase::Generation).unwrap().states,
        vec![
            PhaseState::NotStarted,
            PhaseState::CacheCheck,
            PhaseState::Executing,
            PhaseState::Persisting,
            PhaseState::Done,
        ]
    );
}

#[test]
fn test_warm_run_only_refines() {
    let fixture = Fixture::new();
    let cold = fixture.run(fixture.config(), &FakeStages::new(), "p1").unwrap();

    let stages = FakeStages::new();
    let warm = fixture.run(fixture.config(), &stages, "p2").unwrap();

    assert_eq!(stages.all_calls(), [0, 0, 0, 0, 0, 1]);
    for phase in &Phase::ALL[..5] {
        assert_eq!(warm.resolution(*phase), Some(Resolution::CacheHit), "{phase}");
    }
    assert_eq!(cold.keys, warm.keys);

    let cold_out = fixture.project("p1").output_dir;
    let warm_out = fixture.project("p2").output_dir;
    assert_eq!(
        fs::read(cold_out.join("final.pptx")).unwrap(),
        fs::read(warm_out.join("final.pptx")).unwrap()
    );
    assert_eq!(
        fs::read(cold.artifact().unwrap()).unwrap(),
        fs::read(warm.artifact().unwrap()).unwrap()
    );
    assert_eq!(fs::read(warm_out.join("final.pdf")).unwrap(), b"rendered");
    assert!(warm_out.join("presentation_outline.json").is_file());
}

#[test]
fn test_warm_run_hydrates_upstream_workspace() {
    let fixture = Fixture::new();
    fixture.run(fixture.config(), &FakeStages::new(), "p1").unwrap();
    fixture.run(fixture.config(), &FakeStages::new(), "p2").unwrap();

    let ws = fixture.project("p2").workspace_root;
    for rel in [
        "source.pptx",
        "slide_images/slide_0001.jpg",
        "template.pptx",
        "slide_induction.json",
        "pref_guidelines.json",
        "pdf/ref_pdf/reference.md",
        "pdf/target_pdf/figure-1.png",
        "pdf/target_pdf/refined_doc.json",
        "pdf/target_pdf/image_captions.json",
    ] {
        assert!(ws.join(rel).is_file(), "{rel} missing after hydration");
    }

    let captions: serde_json::Value =
        serde_json::from_slice(&fs::read(ws.join("pdf/target_pdf/image_captions.json")).unwrap())
            .unwrap();
    let figure = ws
        .join("pdf/target_pdf/figure-1.png")
        .to_string_lossy()
        .into_owned();
    assert_eq!(captions[&figure], serde_json::json!("Figure 1"));
}

#[test]
fn test_changed_target_document_reuses_upstream_phases() {
    let fixture = Fixture::new();
    fixture.run(fixture.config(), &FakeStages::new(), "p1").unwrap();

    fs::write(&fixture.inputs.target_pdf, "a different paper").unwrap();
    let stages = FakeStages::new();
    let report = fixture.run(fixture.config(), &stages, "p2").unwrap();

    assert_eq!(stages.all_calls(), [0, 0, 0, 1, 1, 1]);
    assert_eq!(report.resolution(Phase::ReferenceParsing), Some(Resolution::CacheHit));
    assert_eq!(report.resolution(Phase::TargetParsing), Some(Resolution::Executed));
    let deck = fs::read_to_string(fixture.project("p2").output_dir.join("final.pptx")).unwrap();
    assert!(deck.contains("a different paper"));
}

#[test]
fn test_renamed_inputs_with_same_content_hit() {
    let fixture = Fixture::new();
    fixture.run(fixture.config(), &FakeStages::new(), "p1").unwrap();

    let renamed = fixture.tmp.path().join("inputs/renamed-template.pptx");
    fs::copy(&fixture.inputs.template, &renamed).unwrap();
    let mut inputs = fixture.inputs.clone();
    inputs.template = renamed;

    let stages = FakeStages::new();
    let pipeline = fixture.pipeline(fixture.config(), &stages);
    pipeline.run(&fixture.project("p2"), &inputs).unwrap();
    assert_eq!(stages.calls(Phase::TemplateParsing), 0);
}

#[test]
fn test_no_refinement_returns_generated_deck() {
    let fixture = Fixture::new();
    let stages = FakeStages::new();
    let config = PipelineConfig {
        no_refinement: true,
        ..fixture.config()
    };

    let report = fixture.run(config, &stages, "p1").unwrap();

    assert_eq!(stages.calls(Phase::Refinement), 0);
    assert_eq!(report.resolution(Phase::Refinement), Some(Resolution::Skipped));
    assert_eq!(
        report.outcome,
        RunOutcome::Completed {
            artifact: fixture.project("p1").output_dir.join("final.pptx"),
            refined: false,
        }
    );
}

#[test]
fn test_generation_sentinel_ends_run_without_caching() {
    let fixture = Fixture::new();
    let stages = FakeStages::new();
    stages.generation_fails.store(true, Ordering::SeqCst);

    let report = fixture.run(fixture.config(), &stages, "p1").unwrap();

    assert_eq!(
        report.outcome,
        RunOutcome::Failed {
            phase: Phase::Generation
        }
    );
    assert_eq!(stages.calls(Phase::Refinement), 0);
    assert!(report.artifact().is_none());

    let store = store(&fixture);
    assert_eq!(
        store.status(StageKind::Generation, &report.keys.generation),
        EntryStatus::Missing
    );
    assert!(store.has(StageKind::TargetDocument, &report.keys.target_document));

    // The next run retries generation only
    let retry = FakeStages::new();
    fixture.run(fixture.config(), &retry, "p1").unwrap();
    assert_eq!(retry.all_calls(), [0, 0, 0, 0, 1, 1]);
}

#[test]
fn test_executor_error_aborts_with_phase() {
    let fixture = Fixture::new();
    let stages = FakeStages::new();
    *stages.error_in.lock().unwrap() = Some(Phase::TargetParsing);

    let err = fixture.run(fixture.config(), &stages, "p1").unwrap_err();

    assert!(matches!(
        err,
        Error::Execution {
            phase: Phase::TargetParsing,
            ..
        }
    ));
    assert_eq!(stages.all_calls(), [1, 1, 1, 1, 0, 0]);
    let keys = fixture.pipeline(fixture.config(), &stages).keys(&fixture.inputs).unwrap();
    let store = store(&fixture);
    assert!(store.has(StageKind::ReferencePair, &keys.reference_pair));
    assert!(!store.has(StageKind::TargetDocument, &keys.target_document));
}

#[test]
fn test_missing_input_fails_before_any_phase() {
    let fixture = Fixture::new();
    fs::remove_file(&fixture.inputs.reference_deck).unwrap();
    let stages = FakeStages::new();

    let err = fixture.run(fixture.config(), &stages, "p1").unwrap_err();

    assert_eq!(err.phase(), Some(Phase::ReferenceParsing));
    assert_eq!(stages.all_calls(), [0; 6]);
}

#[test]
fn test_interrupted_commit_is_invisible_and_recomputed() {
    let fixture = Fixture::new();
    let config = fixture.config();
    let keys = fixture
        .pipeline(config.clone(), &FakeStages::new())
        .keys(&fixture.inputs)
        .unwrap();
    let store = store(&fixture);

    // A writer that died mid-commit
    let mut staging = store.stage(StageKind::Generation, &keys.generation).unwrap();
    staging
        .write_json("presentation_outline.json", &serde_json::json!({}), None)
        .unwrap();
    std::mem::forget(staging);

    // A writer that died after creating the entry directory
    let partial = store.entry_path(StageKind::Template, &keys.template);
    fs::create_dir_all(&partial).unwrap();
    fs::write(partial.join("source.pptx"), b"half").unwrap();

    assert_eq!(
        store.status(StageKind::Generation, &keys.generation),
        EntryStatus::Missing
    );
    assert_eq!(
        store.status(StageKind::Template, &keys.template),
        EntryStatus::Missing
    );

    let stages = FakeStages::new();
    let report = fixture.run(config, &stages, "p1").unwrap();
    assert_eq!(stages.all_calls(), [1, 1, 1, 1, 1, 1]);
    assert_eq!(report.resolution(Phase::TemplateParsing), Some(Resolution::Executed));
    assert!(store.has(StageKind::Template, &keys.template));
    assert!(store.has(StageKind::Generation, &keys.generation));
}

#[test]
fn test_rerun_in_same_workspace_changes_nothing() {
    let fixture = Fixture::new();
    fixture.run(fixture.config(), &FakeStages::new(), "p1").unwrap();
    let project = fixture.project("p1");
    let before = snapshot(&project.workspace_root);
    let output_before = snapshot(&project.output_dir);

    let stages = FakeStages::new();
    fixture.run(fixture.config(), &stages, "p1").unwrap();

    assert_eq!(stages.all_calls(), [0, 0, 0, 0, 0, 1]);
    assert_eq!(snapshot(&project.workspace_root), before);
    assert_eq!(snapshot(&project.output_dir), output_before);
}

#[test]
fn test_edited_template_is_restaged_in_same_workspace() {
    let fixture = Fixture::new();
    fixture.run(fixture.config(), &FakeStages::new(), "p1").unwrap();

    fs::write(&fixture.inputs.template, "edited template").unwrap();
    let stages = FakeStages::new();
    let report = fixture.run(fixture.config(), &stages, "p1").unwrap();

    assert_eq!(report.resolution(Phase::TemplateParsing), Some(Resolution::Executed));
    let ws = fixture.project("p1").workspace_root;
    assert_eq!(fs::read(ws.join("source.pptx")).unwrap(), b"edited template");

    let entry = store(&fixture)
        .get(StageKind::Template, &report.keys.template)
        .unwrap();
    assert_eq!(fs::read(entry.path.join("source.pptx")).unwrap(), b"edited template");
    assert_eq!(
        fs::read(entry.path.join("slide_images/slide_0001.jpg")).unwrap(),
        b"slide:edited template"
    );

    // A fresh project with the edited template hydrates matching slides
    let fresh = FakeStages::new();
    let hit = fixture.run(fixture.config(), &fresh, "p3").unwrap();
    assert_eq!(hit.resolution(Phase::TemplateParsing), Some(Resolution::CacheHit));
    let slide = fixture
        .project("p3")
        .workspace_root
        .join("slide_images/slide_0001.jpg");
    assert_eq!(fs::read(slide).unwrap(), b"slide:edited template");
}

#[test]
fn test_reused_output_dir_returns_deck_of_current_key() {
    let fixture = Fixture::new();
    let with_slides = |n| PipelineConfig {
        slide_count: n,
        no_refinement: true,
        ..fixture.config()
    };
    let ten = fixture.run(with_slides(10), &FakeStages::new(), "p1").unwrap();
    fixture.run(with_slides(7), &FakeStages::new(), "p1").unwrap();

    let stages = FakeStages::new();
    let again = fixture.run(with_slides(10), &stages, "p1").unwrap();

    assert_eq!(again.keys.generation, ten.keys.generation);
    assert_eq!(again.resolution(Phase::Generation), Some(Resolution::Executed));
    assert_eq!(stages.all_calls(), [0, 0, 0, 0, 1, 0]);

    let entry = store(&fixture)
        .get(StageKind::Generation, &ten.keys.generation)
        .unwrap();
    let returned = fs::read(again.artifact().unwrap()).unwrap();
    assert_eq!(returned, fs::read(entry.path.join("final.pptx")).unwrap());
    assert!(returned.starts_with(b"deck:10:"));
}

#[test]
fn test_stale_document_in_workspace_reexecutes_target_parsing() {
    let fixture = Fixture::new();
    fixture.run(fixture.config(), &FakeStages::new(), "p1").unwrap();
    let doc = fixture
        .project("p1")
        .workspace_root
        .join("pdf/target_pdf/refined_doc.json");
    fs::write(&doc, br#"{"title":"another paper"}"#).unwrap();

    let stages = FakeStages::new();
    let report = fixture.run(fixture.config(), &stages, "p1").unwrap();

    assert_eq!(report.resolution(Phase::TargetParsing), Some(Resolution::Executed));
    assert_eq!(report.resolution(Phase::Generation), Some(Resolution::CacheHit));
    assert_eq!(stages.all_calls(), [0, 0, 0, 1, 0, 1]);
    let rewritten: serde_json::Value = serde_json::from_slice(&fs::read(&doc).unwrap()).unwrap();
    assert_eq!(rewritten["title"], "target paper");
}

#[test]
fn test_corrupt_entry_is_recomputed_by_default() {
    let fixture = Fixture::new();
    let cold = fixture.run(fixture.config(), &FakeStages::new(), "p1").unwrap();
    let store = store(&fixture);
    let entry = store.entry_path(StageKind::Template, &cold.keys.template);
    fs::remove_file(entry.join("slide_images/slide_0002.jpg")).unwrap();
    assert!(matches!(
        store.status(StageKind::Template, &cold.keys.template),
        EntryStatus::Corrupt(_)
    ));

    let stages = FakeStages::new();
    let report = fixture.run(fixture.config(), &stages, "p2").unwrap();

    assert_eq!(report.resolution(Phase::TemplateParsing), Some(Resolution::Recovered));
    assert_eq!(report.resolution(Phase::SlideInduction), Some(Resolution::CacheHit));
    assert_eq!(stages.all_calls(), [1, 0, 0, 0, 0, 1]);
    assert!(store.has(StageKind::Template, &cold.keys.template));
}

#[test]
fn test_altered_entry_content_is_recomputed() {
    let fixture = Fixture::new();
    let cold = fixture.run(fixture.config(), &FakeStages::new(), "p1").unwrap();
    let store = store(&fixture);
    let deck = store
        .entry_path(StageKind::Generation, &cold.keys.generation)
        .join("final.pptx");
    let len = fs::metadata(&deck).unwrap().len();
    fs::write(&deck, vec![b'x'; usize::try_from(len).unwrap()]).unwrap();

    let stages = FakeStages::new();
    let report = fixture.run(fixture.config(), &stages, "p2").unwrap();

    assert_eq!(report.resolution(Phase::Generation), Some(Resolution::Recovered));
    assert_eq!(stages.calls(Phase::Generation), 1);
    assert_eq!(
        store.verify(StageKind::Generation, &cold.keys.generation),
        EntryStatus::Complete
    );
    let hydrated = fs::read(fixture.project("p2").output_dir.join("final.pptx")).unwrap();
    assert!(!hydrated.starts_with(b"xxx"));
}

#[test]
fn test_corrupt_entry_aborts_when_configured() {
    let fixture = Fixture::new();
    let cold = fixture.run(fixture.config(), &FakeStages::new(), "p1").unwrap();
    let store = store(&fixture);
    let entry = store.entry_path(StageKind::ReferencePair, &cold.keys.reference_pair);
    fs::remove_file(entry.join("pref_guidelines.json")).unwrap();

    let stages = FakeStages::new();
    let config = PipelineConfig {
        on_corruption: CorruptionPolicy::Abort,
        ..fixture.config()
    };
    let err = fixture.run(config, &stages, "p2").unwrap_err();

    match err {
        Error::Cache { phase, source } => {
            assert_eq!(phase, Phase::ReferenceParsing);
            assert!(source.is_corruption());
        }
        other => panic!("expected cache corruption, got {other:?}"),
    }
    assert_eq!(stages.calls(Phase::ReferenceParsing), 0);
}

#[test]
fn test_cache_off_never_touches_store() {
    let fixture = Fixture::new();
    let stages = FakeStages::new();
    fixture.run(fixture.config_with(CacheMode::Off), &stages, "p1").unwrap();
    fixture.run(fixture.config_with(CacheMode::Off), &stages, "p2").unwrap();

    assert_eq!(stages.all_calls(), [2, 2, 2, 2, 2, 2]);
    assert!(!fixture.cache_dir().exists());
}

#[test]
fn test_read_mode_reuses_but_never_writes() {
    let fixture = Fixture::new();
    let stages = FakeStages::new();
    let report = fixture
        .run(fixture.config_with(CacheMode::Read), &stages, "p1")
        .unwrap();
    assert_eq!(stages.all_calls(), [1, 1, 1, 1, 1, 1]);
    let store = store(&fixture);
    for kind in StageKind::ALL {
        assert!(!store.has(kind, report.keys.get(kind)));
    }

    fixture.run(fixture.config(), &FakeStages::new(), "p2").unwrap();
    let reader = FakeStages::new();
    fixture
        .run(fixture.config_with(CacheMode::Read), &reader, "p3")
        .unwrap();
    assert_eq!(reader.all_calls(), [0, 0, 0, 0, 0, 1]);
}

#[test]
fn test_write_mode_renews_every_entry() {
    let fixture = Fixture::new();
    let cold = fixture.run(fixture.config(), &FakeStages::new(), "p1").unwrap();
    let store = store(&fixture);
    let created = store
        .get(StageKind::Template, &cold.keys.template)
        .unwrap()
        .manifest
        .created_at;

    let stages = FakeStages::new();
    let report = fixture
        .run(fixture.config_with(CacheMode::Write), &stages, "p2")
        .unwrap();

    assert_eq!(stages.all_calls(), [1, 1, 1, 1, 1, 1]);
    assert!(!report.record(Phase::Generation).unwrap().states.contains(&PhaseState::CacheCheck));
    let renewed = store.get(StageKind::Template, &cold.keys.template).unwrap();
    assert!(renewed.manifest.created_at >= created);
    assert!(store.has(StageKind::Generation, &cold.keys.generation));
}

#[test]
fn test_regen_outline_reruns_generation_only() {
    let fixture = Fixture::new();
    fixture.run(fixture.config(), &FakeStages::new(), "p1").unwrap();

    let stages = FakeStages::new();
    let config = PipelineConfig {
        regen_outline: true,
        ..fixture.config()
    };
    let report = fixture.run(config, &stages, "p2").unwrap();

    assert_eq!(stages.all_calls(), [0, 0, 0, 0, 1, 1]);
    assert_eq!(report.resolution(Phase::Generation), Some(Resolution::Executed));
    assert!(store(&fixture).has(StageKind::Generation, &report.keys.generation));
}

#[test]
fn test_slide_count_change_misses_generation_only() {
    let fixture = Fixture::new();
    fixture.run(fixture.config(), &FakeStages::new(), "p1").unwrap();

    let stages = FakeStages::new();
    let config = PipelineConfig {
        slide_count: 7,
        ..fixture.config()
    };
    fixture.run(config, &stages, "p2").unwrap();
    assert_eq!(stages.all_calls(), [0, 0, 0, 0, 1, 1]);
}

#[test]
fn test_report_serializes() {
    let fixture = Fixture::new();
    let report = fixture.run(fixture.config(), &FakeStages::new(), "p1").unwrap();
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["projectId"], "p1");
    assert_eq!(value["outcome"]["status"], "completed");
    assert_eq!(value["records"].as_array().unwrap().len(), 6);
    assert_eq!(value["records"][0]["resolution"], "executed");
}
