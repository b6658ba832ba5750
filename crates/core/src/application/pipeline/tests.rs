//! JobPipeline behavior with scripted collaborators

use super::*;
use crate::domain::{JobMetadata, ScoreBreakdown};
use crate::port::event_sink::mocks::RecordingEventSink;
use crate::port::generator::mocks::{GeneratorBehavior, MockEvaluator, ScriptedGenerator};
use crate::port::result_repository::mocks::RecordingResultRepository;
use crate::port::time_provider::mocks::MockTimeProvider;

fn job() -> JobRequest {
    JobRequest::new("r1", "owner", 0)
        .with_metadata(JobMetadata::new(serde_json::json!({"surname": "Kim"})))
}

struct Harness {
    primary: Option<Arc<ScriptedGenerator>>,
    fallback: Arc<ScriptedGenerator>,
    evaluator: Arc<MockEvaluator>,
    results: Arc<RecordingResultRepository>,
    config: PipelineConfig,
}

impl Harness {
    fn new(primary: Option<ScriptedGenerator>, fallback: ScriptedGenerator) -> Self {
        Self {
            primary: primary.map(Arc::new),
            fallback: Arc::new(fallback),
            evaluator: Arc::new(MockEvaluator::new(0.5)),
            results: Arc::new(RecordingResultRepository::new()),
            config: PipelineConfig::default(),
        }
    }

    fn build(self) -> (JobPipeline, Harness) {
        let pipeline = JobPipeline::new(
            self.primary
                .clone()
                .map(|p| p as Arc<dyn CandidateGenerator>),
            self.fallback.clone(),
            self.evaluator.clone(),
            self.results.clone(),
            Arc::new(MockTimeProvider::new(42)),
            self.config.clone(),
        );
        (pipeline, self)
    }
}

fn progress_names(events: &[OutboundEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            OutboundEvent::JobProgress { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

fn terminal_events(events: &[OutboundEvent]) -> Vec<&OutboundEvent> {
    events.iter().filter(|e| e.is_terminal()).collect()
}

#[tokio::test]
async fn test_successful_run_emits_every_stage_then_complete() {
    let mut harness = Harness::new(
        Some(ScriptedGenerator::returning("primary", &["a", "b", "c"])),
        ScriptedGenerator::returning("fallback", &["z"]),
    );
    harness.evaluator = Arc::new(MockEvaluator::new(0.1).with_score("b", 0.9).with_score("c", 0.5));
    let (pipeline, harness) = harness.build();
    let sink = RecordingEventSink::new();

    let outcome = pipeline.run(&job(), &CancelFlag::new(), &sink).await;

    let events = sink.events();
    assert_eq!(
        progress_names(&events),
        vec!["starting", "prepare", "generate", "evaluate", "rank", "finalize"]
    );
    assert_eq!(terminal_events(&events).len(), 1);
    assert_eq!(events.last().map(|e| e.name()), Some("job.complete"));

    // Progress is the cumulative weight of finished stages
    let progress: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            OutboundEvent::JobProgress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![0, 0, 10, 55, 85, 95]);

    match outcome {
        RunOutcome::Completed(result) => {
            let order: Vec<&str> = result
                .results
                .iter()
                .map(|r| r.candidate.value.as_str())
                .collect();
            assert_eq!(order, vec!["b", "c", "a"]);
            assert_eq!(result.total_generated, 3);
            assert!(!result.used_fallback);
            assert_eq!(result.completed_at, 42);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(harness.fallback.call_count(), 0);
}

#[tokio::test]
async fn test_primary_failure_uses_fallback() {
    let (pipeline, harness) = Harness::new(
        Some(ScriptedGenerator::failing("primary", "upstream 503")),
        ScriptedGenerator::returning("fallback", &["x", "y"]),
    )
    .build();
    let sink = RecordingEventSink::new();

    let outcome = pipeline.run(&job(), &CancelFlag::new(), &sink).await;

    match outcome {
        RunOutcome::Completed(result) => {
            assert!(result.used_fallback);
            assert_eq!(result.total_generated, 2);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(harness.primary.unwrap().call_count(), 1);
    assert_eq!(harness.fallback.call_count(), 1);
}

#[tokio::test]
async fn test_primary_panic_uses_fallback() {
    let (pipeline, _harness) = Harness::new(
        Some(ScriptedGenerator::panicking("primary", "primary exploded")),
        ScriptedGenerator::returning("fallback", &["x"]),
    )
    .build();
    let sink = RecordingEventSink::new();

    let outcome = pipeline.run(&job(), &CancelFlag::new(), &sink).await;
    assert!(matches!(outcome, RunOutcome::Completed(ref r) if r.used_fallback));
}

#[tokio::test]
async fn test_primary_empty_result_uses_fallback() {
    let (pipeline, _harness) = Harness::new(
        Some(ScriptedGenerator::returning("primary", &[])),
        ScriptedGenerator::returning("fallback", &["x"]),
    )
    .build();
    let sink = RecordingEventSink::new();

    let outcome = pipeline.run(&job(), &CancelFlag::new(), &sink).await;
    assert!(matches!(outcome, RunOutcome::Completed(ref r) if r.used_fallback));
}

#[tokio::test(start_paused = true)]
async fn test_primary_timeout_uses_fallback() {
    let mut harness = Harness::new(
        Some(ScriptedGenerator::new(
            "primary",
            GeneratorBehavior::Delay(Duration::from_secs(600), vec!["slow".to_string()]),
        )),
        ScriptedGenerator::returning("fallback", &["fast"]),
    );
    harness.config.primary_timeout = Duration::from_secs(5);
    let (pipeline, _harness) = harness.build();
    let sink = RecordingEventSink::new();

    let outcome = pipeline.run(&job(), &CancelFlag::new(), &sink).await;
    match outcome {
        RunOutcome::Completed(result) => {
            assert!(result.used_fallback);
            assert_eq!(result.results[0].candidate.value, "fast");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_no_primary_goes_straight_to_fallback() {
    let (pipeline, harness) =
        Harness::new(None, ScriptedGenerator::returning("fallback", &["x"])).build();
    let sink = RecordingEventSink::new();

    let outcome = pipeline.run(&job(), &CancelFlag::new(), &sink).await;
    assert!(matches!(outcome, RunOutcome::Completed(ref r) if r.used_fallback));
    assert_eq!(harness.fallback.call_count(), 1);
}

#[tokio::test]
async fn test_fallback_failure_is_pipeline_failure() {
    let (pipeline, _harness) = Harness::new(
        Some(ScriptedGenerator::failing("primary", "down")),
        ScriptedGenerator::failing("fallback", "also down"),
    )
    .build();
    let sink = RecordingEventSink::new();

    let outcome = pipeline.run(&job(), &CancelFlag::new(), &sink).await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed {
            code: ErrorCode::PipelineFailed,
            ..
        }
    ));
    let events = sink.events();
    assert_eq!(terminal_events(&events).len(), 1);
    assert_eq!(events.last().map(|e| e.name()), Some("job.error"));
    // Stopped at generate
    assert_eq!(
        progress_names(&events),
        vec!["starting", "prepare", "generate"]
    );
}

#[tokio::test]
async fn test_evaluation_failure_is_pipeline_failure() {
    let mut harness = Harness::new(None, ScriptedGenerator::returning("fallback", &["ok", "bad"]));
    harness.evaluator = Arc::new(MockEvaluator::new(0.5).failing_on("bad"));
    let (pipeline, harness) = harness.build();
    let sink = RecordingEventSink::new();

    let outcome = pipeline.run(&job(), &CancelFlag::new(), &sink).await;
    assert!(matches!(outcome, RunOutcome::Failed { .. }));

    tokio::task::yield_now().await;
    assert!(harness.results.saved().is_empty());
}

#[tokio::test]
async fn test_cancel_before_start_runs_nothing() {
    let (pipeline, harness) = Harness::new(
        Some(ScriptedGenerator::returning("primary", &["a"])),
        ScriptedGenerator::returning("fallback", &["z"]),
    )
    .build();
    let sink = RecordingEventSink::new();
    let cancel = CancelFlag::new();
    cancel.cancel();

    let outcome = pipeline.run(&job(), &cancel, &sink).await;

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(sink.names(), vec!["job.progress", "job.cancelled"]);
    assert_eq!(harness.primary.unwrap().call_count(), 0);
}

/// Cancels the run when the named stage is announced
struct CancelOnStage {
    stage: &'static str,
    flag: CancelFlag,
    inner: RecordingEventSink,
}

impl EventSink for CancelOnStage {
    fn emit(&self, event: OutboundEvent) {
        if let OutboundEvent::JobProgress { name, .. } = &event {
            if name == self.stage {
                self.flag.cancel();
            }
        }
        self.inner.emit(event);
    }
}

#[tokio::test]
async fn test_cancel_mid_run_stops_at_next_stage_boundary() {
    let (pipeline, _harness) = Harness::new(
        Some(ScriptedGenerator::returning("primary", &["a", "b"])),
        ScriptedGenerator::returning("fallback", &["z"]),
    )
    .build();
    let flag = CancelFlag::new();
    let sink = CancelOnStage {
        stage: "evaluate",
        flag: flag.clone(),
        inner: RecordingEventSink::new(),
    };

    let outcome = pipeline.run(&job(), &flag, &sink).await;

    assert_eq!(outcome, RunOutcome::Cancelled);
    let events = sink.inner.events();
    // The evaluate stage finishes; rank never starts
    assert_eq!(
        progress_names(&events),
        vec!["starting", "prepare", "generate", "evaluate"]
    );
    assert_eq!(terminal_events(&events).len(), 1);
    assert_eq!(events.last().map(|e| e.name()), Some("job.cancelled"));
}

#[tokio::test]
async fn test_cancel_after_last_checkpoint_has_no_effect() {
    let (pipeline, _harness) =
        Harness::new(None, ScriptedGenerator::returning("fallback", &["z"])).build();
    let flag = CancelFlag::new();
    let sink = CancelOnStage {
        stage: "finalize",
        flag: flag.clone(),
        inner: RecordingEventSink::new(),
    };

    let outcome = pipeline.run(&job(), &flag, &sink).await;
    assert!(matches!(outcome, RunOutcome::Completed(_)));
}

#[tokio::test]
async fn test_result_is_persisted_in_background() {
    let (pipeline, harness) =
        Harness::new(None, ScriptedGenerator::returning("fallback", &["z"])).build();
    let sink = RecordingEventSink::new();

    pipeline.run(&job(), &CancelFlag::new(), &sink).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let saved = harness.results.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0, "owner");
    assert_eq!(saved[0].1.request_id, "r1");
}

#[tokio::test]
async fn test_persistence_failure_does_not_fail_the_run() {
    let mut harness = Harness::new(None, ScriptedGenerator::returning("fallback", &["z"]));
    harness.results = Arc::new(RecordingResultRepository::failing());
    let (pipeline, _harness) = harness.build();
    let sink = RecordingEventSink::new();

    let outcome = pipeline.run(&job(), &CancelFlag::new(), &sink).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(matches!(outcome, RunOutcome::Completed(_)));
    assert_eq!(sink.events().last().map(|e| e.name()), Some("job.complete"));
}

#[test]
fn test_rank_is_stable_and_truncates() {
    let scored = |value: &str, overall: f64, index: usize| ScoredCandidate {
        candidate: Candidate::new(value),
        score: ScoreBreakdown::new(overall),
        generation_index: index,
    };
    let mut list = vec![
        scored("first-tie", 0.7, 0),
        scored("low", 0.1, 1),
        scored("top", 0.9, 2),
        scored("second-tie", 0.7, 3),
    ];

    rank(&mut list, 3);

    let order: Vec<&str> = list.iter().map(|s| s.candidate.value.as_str()).collect();
    assert_eq!(order, vec!["top", "first-tie", "second-tie"]);
}
