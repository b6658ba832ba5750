//! One node, real adapters: gateway -> scheduler -> pipeline -> SQLite
//!
//! The primary generator points at a closed port, so every run exercises
//! the fallback path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use turnstile_core::application::{
    shutdown_channel, CancellationRegistry, ConnectionGateway, ConnectionRegistry, EventRouter,
    GatewayConfig, JobExecutor, JobPipeline, LockConfig, PipelineConfig, Principal, QueueManager,
    Scheduler, SchedulerConfig, ShutdownSender,
};
use turnstile_core::domain::{ErrorCode, InboundEvent, OutboundEvent, QueueConfig};
use turnstile_core::port::generator::mocks::ScriptedGenerator;
use turnstile_core::port::state_store::memory::InMemoryStateStore;
use turnstile_core::port::{
    CandidateGenerator, ResultRepository, SystemTimeProvider, UuidProvider,
};
use turnstile_infra_compute::{HeuristicEvaluator, HttpCandidateGenerator, RuleBasedGenerator};
use turnstile_infra_sqlite::{create_pool, run_migrations, SqliteResultRepository};

const WAIT: Duration = Duration::from_secs(10);

struct Node {
    queue: Arc<QueueManager>,
    gateway: ConnectionGateway,
    results: Arc<SqliteResultRepository>,
    _shutdown: ShutdownSender,
    _loops: Vec<JoinHandle<()>>,
}

async fn node(fallback: Arc<dyn CandidateGenerator>, gateway_config: GatewayConfig) -> Node {
    let store = Arc::new(InMemoryStateStore::new());
    let clock = Arc::new(SystemTimeProvider);
    let queue = Arc::new(QueueManager::new(
        store.clone(),
        QueueConfig::new("e2e", 2),
        LockConfig::default(),
        clock.clone(),
        Arc::new(UuidProvider),
    ));
    queue.initialize().await.unwrap();

    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let results = Arc::new(SqliteResultRepository::new(pool));

    let primary: Arc<dyn CandidateGenerator> = Arc::new(
        HttpCandidateGenerator::new("http://127.0.0.1:9/generate", Duration::from_secs(2))
            .unwrap(),
    );
    let pipeline = Arc::new(JobPipeline::new(
        Some(primary),
        fallback,
        Arc::new(HeuristicEvaluator::new()),
        results.clone(),
        clock.clone(),
        PipelineConfig::default(),
    ));
    let router = Arc::new(EventRouter::new(
        store,
        queue.keys().events.clone(),
        Arc::new(ConnectionRegistry::new()),
        Arc::new(CancellationRegistry::new()),
    ));
    let executor = Arc::new(JobExecutor::new(queue.clone(), pipeline, router.clone()));

    let (shutdown, token) = shutdown_channel();
    let scheduler = Scheduler::new(
        queue.clone(),
        executor.clone(),
        router.clone(),
        SchedulerConfig {
            tick_interval: Duration::from_millis(20),
        },
    );
    let scheduler_loop = tokio::spawn(async move {
        scheduler.run(token).await.unwrap();
    });

    let gateway = ConnectionGateway::new(
        queue.clone(),
        executor,
        router,
        clock,
        Arc::new(UuidProvider),
        gateway_config,
    );
    Node {
        queue,
        gateway,
        results,
        _shutdown: shutdown,
        _loops: vec![scheduler_loop],
    }
}

fn start(id: &str) -> InboundEvent {
    let mut inputs = serde_json::Map::new();
    inputs.insert("surname".to_string(), serde_json::json!("Kim"));
    inputs.insert("gender".to_string(), serde_json::json!("female"));
    InboundEvent::JobStart {
        request_id: id.to_string(),
        inputs,
    }
}

/// Every push up to and including the terminal one
async fn until_terminal(rx: &mut mpsc::UnboundedReceiver<OutboundEvent>) -> Vec<OutboundEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(WAIT, async {
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
    })
    .await
    .expect("run did not finish in time");
    events
}

#[tokio::test]
async fn test_queued_job_completes_on_fallback_and_is_persisted() {
    let node = node(Arc::new(RuleBasedGenerator::new()), GatewayConfig::default()).await;
    let (socket_id, mut rx) = node.gateway.connect(Principal::user("alice"));

    let reply = node.gateway.handle(&socket_id, start("e2e-1")).await;
    assert_eq!(
        reply,
        OutboundEvent::JobStarted {
            request_id: "e2e-1".to_string(),
            queued: true
        }
    );

    let events = until_terminal(&mut rx).await;
    let names: Vec<&str> = events.iter().map(OutboundEvent::name).collect();
    assert_eq!(names[0], "session.opened");
    assert!(names.contains(&"queue.status"));
    assert_eq!(names.iter().filter(|n| **n == "queue.ready").count(), 1);

    let steps: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            OutboundEvent::JobProgress { step, .. } => Some(*step),
            _ => None,
        })
        .collect();
    assert!(steps.windows(2).all(|w| w[0] < w[1]), "steps {:?}", steps);

    let Some(OutboundEvent::JobComplete {
        results,
        total_generated,
        used_fallback,
        ..
    }) = events.last()
    else {
        panic!("expected job.complete, got {:?}", events.last());
    };
    assert!(*used_fallback);
    assert_eq!(*total_generated, 30);
    assert_eq!(results.len(), 10);
    assert!(results
        .windows(2)
        .all(|w| w[0].score.overall >= w[1].score.overall));

    // Bookkeeping and persistence finish after the terminal push
    let mut persisted = Vec::new();
    for _ in 0..100 {
        let metrics = node.queue.metrics().await.unwrap();
        persisted = node
            .results
            .find_by_owner(&"alice".to_string(), 10)
            .await
            .unwrap();
        if metrics.total_processed == 1 && metrics.processing == 0 && !persisted.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].request_id, "e2e-1");
    assert!(persisted[0].used_fallback);
    assert_eq!(node.queue.metrics().await.unwrap().processing, 0);
}

#[tokio::test]
async fn test_same_inputs_give_same_fallback_ranking() {
    let node = node(Arc::new(RuleBasedGenerator::new()), GatewayConfig::default()).await;
    let (socket_id, mut rx) = node.gateway.connect(Principal::user("bob"));

    let mut rankings = Vec::new();
    for id in ["same-1", "same-2"] {
        node.gateway.handle(&socket_id, start(id)).await;
        let events = until_terminal(&mut rx).await;
        match events.last() {
            Some(OutboundEvent::JobComplete { results, .. }) => rankings.push(
                results
                    .iter()
                    .map(|r| r.candidate.value.clone())
                    .collect::<Vec<_>>(),
            ),
            other => panic!("expected job.complete, got {:?}", other),
        }
    }
    assert_eq!(rankings[0], rankings[1]);
}

#[tokio::test]
async fn test_evaluation_failure_ends_with_pipeline_error() {
    let digits = Arc::new(ScriptedGenerator::returning("digits", &["123", "456"]));
    let node = node(digits, GatewayConfig::default()).await;
    let (socket_id, mut rx) = node.gateway.connect(Principal::user("carol"));

    node.gateway.handle(&socket_id, start("bad-1")).await;
    let events = until_terminal(&mut rx).await;

    match events.last() {
        Some(OutboundEvent::JobError { code, .. }) => assert_eq!(*code, ErrorCode::PipelineFailed),
        other => panic!("expected job.error, got {:?}", other),
    }

    // Removed from processing without touching the average
    for _ in 0..100 {
        if node.queue.metrics().await.unwrap().processing == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let metrics = node.queue.metrics().await.unwrap();
    assert_eq!(metrics.processing, 0);
    assert_eq!(metrics.total_processed, 0);
}

#[tokio::test]
async fn test_immediate_execution_bypasses_the_queue() {
    let node = node(
        Arc::new(RuleBasedGenerator::new()),
        GatewayConfig {
            immediate_execution: true,
        },
    )
    .await;
    let (socket_id, mut rx) = node.gateway.connect(Principal::user("dave"));

    let reply = node.gateway.handle(&socket_id, start("now-1")).await;
    assert_eq!(
        reply,
        OutboundEvent::JobStarted {
            request_id: "now-1".to_string(),
            queued: false
        }
    );

    let events = until_terminal(&mut rx).await;
    assert!(matches!(events.last(), Some(OutboundEvent::JobComplete { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, OutboundEvent::QueueReady { .. })));

    let metrics = node.queue.metrics().await.unwrap();
    assert_eq!(metrics.total_waiting(), 0);
    assert_eq!(metrics.processing, 0);
}
