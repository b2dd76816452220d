//! Dispatcher scheduling, retry and shutdown behavior.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use persona::analysis::{
    AnalysisError, AnalysisInput, PipelineConfig, PipelineOrchestrator, TransientKind,
};
use persona::dispatcher::{
    AnalysisPayload, DispatchError, Dispatcher, DispatcherConfig, OnComplete, OnError,
    PipelineHandler, QueueSnapshot, WorkHandler, WorkKind, WorkRequest,
};
use persona::llm::{ScriptedGenerator, ScriptedReply};
use persona::models::{AnalysisStage, JobStatus, Post, Profile};
use persona::rate_limit::{RateLimitConfig, RateLimiter};
use persona::repository::{InMemoryJobStore, JobStore};

mod common;

use common::{all_labels, input, script};

#[derive(Debug, Clone)]
struct Start {
    name: String,
    attempt: u32,
    at: Instant,
}

/// Handler driven by the payload: `work_ms` of simulated work, then
/// failure for the first `fail_attempts` attempts.
#[derive(Default)]
struct TestHandler {
    starts: Mutex<Vec<Start>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl TestHandler {
    fn starts(&self) -> Vec<Start> {
        self.starts.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkHandler for TestHandler {
    async fn handle(
        &self,
        request: &WorkRequest,
        cancel: CancellationToken,
    ) -> Result<Value, AnalysisError> {
        let name = request.payload["name"].as_str().unwrap_or_default().to_string();
        self.starts.lock().unwrap().push(Start {
            name: name.clone(),
            attempt: request.attempt,
            at: Instant::now(),
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let work = Duration::from_millis(request.payload["work_ms"].as_u64().unwrap_or(0));
        let finished = tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(work) => true,
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if !finished {
            return Err(AnalysisError::Aborted);
        }

        let fail_attempts = request.payload["fail_attempts"].as_u64().unwrap_or(0) as u32;
        if request.attempt <= fail_attempts {
            return Err(match request.payload["error"].as_str() {
                Some("critical") => AnalysisError::Critical("bad payload".to_string()),
                _ => AnalysisError::transient(TransientKind::Timeout, "backend too slow"),
            });
        }
        Ok(json!({ "name": name }))
    }
}

type Completion = (String, Result<Value, DispatchError>);

fn callbacks(name: &str, tx: &mpsc::UnboundedSender<Completion>) -> (OnComplete, OnError) {
    let ok_tx = tx.clone();
    let err_tx = tx.clone();
    let ok_name = name.to_string();
    let err_name = name.to_string();
    (
        Box::new(move |value| {
            let _ = ok_tx.send((ok_name, Ok(value)));
        }),
        Box::new(move |err| {
            let _ = err_tx.send((err_name, Err(err)));
        }),
    )
}

struct Harness {
    dispatcher: Dispatcher,
    handler: Arc<TestHandler>,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl Harness {
    fn new(config: DispatcherConfig, limits: RateLimitConfig) -> Self {
        Self::with_snapshot(config, limits, None)
    }

    fn with_snapshot(
        config: DispatcherConfig,
        limits: RateLimitConfig,
        snapshot: Option<QueueSnapshot>,
    ) -> Self {
        let handler = Arc::new(TestHandler::default());
        let dispatcher = Dispatcher::spawn(
            config,
            RateLimiter::new(limits),
            handler.clone(),
            snapshot,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            dispatcher,
            handler,
            tx,
            rx,
        }
    }

    async fn enqueue(&self, name: &str, identity: &str, payload: Value) -> String {
        let mut payload = payload;
        payload["name"] = json!(name);
        let (on_complete, on_error) = callbacks(name, &self.tx);
        self.dispatcher
            .enqueue(WorkKind::Analysis, payload, identity, on_complete, on_error)
            .await
            .unwrap()
    }

    async fn next(&mut self) -> Completion {
        self.rx.recv().await.unwrap()
    }

    async fn collect(&mut self, n: usize) -> Vec<Completion> {
        let mut done = Vec::with_capacity(n);
        for _ in 0..n {
            done.push(self.next().await);
        }
        done
    }
}

fn config() -> DispatcherConfig {
    DispatcherConfig {
        backoff_base_ms: 100,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_global_cap_limits_in_flight_items() {
    let mut h = Harness::new(config(), RateLimitConfig::default());
    for (i, identity) in ["ada", "grace", "linus", "barbara", "ken"].iter().enumerate() {
        h.enqueue(&format!("item{}", i), identity, json!({ "work_ms": 1000 }))
            .await;
    }

    let done = h.collect(5).await;
    assert!(done.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(h.handler.peak.load(Ordering::SeqCst), 3);

    let starts = h.handler.starts();
    let early: Vec<&str> = starts
        .iter()
        .filter(|s| s.at == starts[0].at)
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(early.len(), 3);
    for name in ["item0", "item1", "item2"] {
        assert!(early.contains(&name));
    }
}

#[tokio::test(start_paused = true)]
async fn test_identity_cap_holds_later_items_in_order() {
    let limits = RateLimitConfig {
        max_concurrent: 1,
        ..Default::default()
    };
    let mut h = Harness::new(config(), limits);
    h.enqueue("ada-1", "ada", json!({ "work_ms": 1000 })).await;
    h.enqueue("ada-2", "ada", json!({ "work_ms": 1000 })).await;
    h.enqueue("grace-1", "grace", json!({ "work_ms": 1000 })).await;

    let done = h.collect(3).await;
    assert!(done.iter().all(|(_, r)| r.is_ok()));

    let starts = h.handler.starts();
    let at = |name: &str| starts.iter().find(|s| s.name == name).unwrap().at;
    assert_eq!(at("ada-1"), at("grace-1"));
    assert!(at("ada-2") >= at("ada-1") + Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn test_window_budget_delays_next_request() {
    let limits = RateLimitConfig {
        window_ms: 10_000,
        max_requests: 1,
        max_concurrent: 2,
    };
    let mut h = Harness::new(config(), limits);
    h.enqueue("first", "ada", json!({})).await;
    h.enqueue("second", "ada", json!({})).await;
    h.enqueue("other", "grace", json!({})).await;

    let done = h.collect(3).await;
    let order: Vec<&str> = done.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(order.last(), Some(&"second"));

    let starts = h.handler.starts();
    let at = |name: &str| starts.iter().find(|s| s.name == name).unwrap().at;
    assert!(at("second") >= at("first") + Duration::from_millis(10_000));
    assert!(at("other") < at("second"));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_is_retried() {
    let mut h = Harness::new(config(), RateLimitConfig::default());
    h.enqueue("flaky", "ada", json!({ "fail_attempts": 2 })).await;

    let (name, result) = h.next().await;
    assert_eq!(name, "flaky");
    assert_eq!(result.unwrap()["name"], "flaky");

    let attempts: Vec<u32> = h.handler.starts().iter().map(|s| s.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    let starts = h.handler.starts();
    assert!(starts[1].at >= starts[0].at + Duration::from_millis(100));
    assert!(starts[2].at >= starts[1].at + Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_at_max_attempts() {
    let mut h = Harness::new(config(), RateLimitConfig::default());
    h.enqueue("broken", "ada", json!({ "fail_attempts": 10 })).await;

    let (_, result) = h.next().await;
    match result {
        Err(DispatchError::Failed { attempts, source }) => {
            assert_eq!(attempts, 3);
            assert!(source.is_retryable());
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(h.handler.starts().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_critical_failure_is_not_retried() {
    let mut h = Harness::new(config(), RateLimitConfig::default());
    h.enqueue(
        "bad",
        "ada",
        json!({ "fail_attempts": 10, "error": "critical" }),
    )
    .await;

    let (_, result) = h.next().await;
    assert!(matches!(
        result,
        Err(DispatchError::Failed { attempts: 1, .. })
    ));
    assert_eq!(h.handler.starts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_queued_and_in_flight_items() {
    let config = DispatcherConfig {
        max_concurrent: 1,
        ..config()
    };
    let mut h = Harness::new(config, RateLimitConfig::default());
    let running = h.enqueue("running", "ada", json!({ "work_ms": 60_000 })).await;
    let waiting = h.enqueue("waiting", "grace", json!({ "work_ms": 1000 })).await;

    assert!(h.dispatcher.cancel(&waiting).await.unwrap());
    let (name, result) = h.next().await;
    assert_eq!(name, "waiting");
    assert!(matches!(result, Err(DispatchError::Cancelled)));

    assert!(h.dispatcher.cancel(&running).await.unwrap());
    let (name, result) = h.next().await;
    assert_eq!(name, "running");
    assert!(matches!(result, Err(DispatchError::Cancelled)));

    assert!(!h.dispatcher.cancel("no-such-item").await.unwrap());
    assert!(h.handler.starts().iter().all(|s| s.name == "running"));
}

#[tokio::test]
async fn test_shutdown_snapshots_unfinished_items() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("queue.db").display());
    let snapshot = QueueSnapshot::open(&url).await.unwrap();

    let config = DispatcherConfig {
        max_concurrent: 1,
        ..config()
    };
    let mut h = Harness::with_snapshot(config, RateLimitConfig::default(), Some(snapshot.clone()));
    for (name, identity) in [("one", "ada"), ("two", "grace"), ("three", "linus")] {
        h.enqueue(name, identity, json!({ "work_ms": 3_600_000 })).await;
    }

    let status = h.dispatcher.status().await.unwrap();
    assert_eq!(status.active, 1);
    assert_eq!(status.queued, 2);

    assert_eq!(h.dispatcher.shutdown().await.unwrap(), 3);
    let done = h.collect(3).await;
    assert!(done
        .iter()
        .all(|(_, r)| matches!(r, Err(DispatchError::Shutdown))));
    assert!(matches!(
        h.dispatcher.status().await,
        Err(DispatchError::Closed)
    ));

    let restored = snapshot.restore(Duration::from_secs(300)).await.unwrap();
    let names: Vec<&str> = restored
        .iter()
        .map(|i| i.payload["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["one", "two", "three"]);
    assert_eq!(restored[0].attempts, 1);
    assert_eq!(restored[1].attempts, 0);
    assert_eq!(restored[2].identity, "linus");

    // Restored items run to completion on a fresh dispatcher.
    let mut h = Harness::new(DispatcherConfig::default(), RateLimitConfig::default());
    for mut item in restored {
        item.payload["work_ms"] = json!(0);
        let name = item.payload["name"].as_str().unwrap().to_string();
        let (on_complete, on_error) = callbacks(&name, &h.tx);
        h.dispatcher
            .requeue(item, on_complete, on_error)
            .await
            .unwrap();
    }
    let done = h.collect(3).await;
    assert!(done.iter().all(|(_, r)| r.is_ok()));
    let first = h
        .handler
        .starts()
        .into_iter()
        .find(|s| s.name == "one")
        .unwrap();
    assert_eq!(first.attempt, 2);

    assert!(snapshot
        .restore(Duration::from_secs(300))
        .await
        .unwrap()
        .is_empty());
}

fn chat_input() -> AnalysisInput {
    AnalysisInput::new(
        Profile::new("ada"),
        vec![Post::new("Rewrote the lexer again, third time is the charm.")],
    )
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_handler_answers_chat_items() {
    let generator = Arc::new(ScriptedGenerator::new());
    generator.push("chat", ScriptedReply::text("Mostly compilers."));
    let orchestrator = PipelineOrchestrator::new(generator.clone()).with_config(PipelineConfig {
        inter_stage_delay_ms: 0,
        ..Default::default()
    });
    let dispatcher = Dispatcher::spawn(
        DispatcherConfig::default(),
        RateLimiter::new(RateLimitConfig::default()),
        Arc::new(PipelineHandler::new(Arc::new(orchestrator))),
        None,
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut payload = AnalysisPayload::new(chat_input());
    payload.prompt = Some("What do they write about?".to_string());
    let (on_complete, on_error) = callbacks("chat", &tx);
    dispatcher
        .enqueue(
            WorkKind::Chat,
            serde_json::to_value(&payload).unwrap(),
            "ada",
            on_complete,
            on_error,
        )
        .await
        .unwrap();

    let (_, result) = rx.recv().await.unwrap();
    assert_eq!(result.unwrap()["response"], "Mostly compilers.");
    assert_eq!(generator.call_labels(), vec!["chat"]);
    assert_eq!(dispatcher.shutdown().await.unwrap(), 0);
}

fn analysis_dispatcher(
    generator: &Arc<ScriptedGenerator>,
    store: Arc<InMemoryJobStore>,
    snapshot: Option<QueueSnapshot>,
) -> Dispatcher {
    let orchestrator = PipelineOrchestrator::new(generator.clone())
        .with_store(store)
        .with_config(PipelineConfig {
            backoff_base_ms: 10,
            inter_stage_delay_ms: 0,
            ..Default::default()
        });
    Dispatcher::spawn(
        DispatcherConfig::default(),
        RateLimiter::new(RateLimitConfig::default()),
        Arc::new(PipelineHandler::new(Arc::new(orchestrator))),
        snapshot,
    )
}

fn analysis_payload() -> Value {
    serde_json::to_value(AnalysisPayload::new(input())).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_handler_runs_analysis_items() {
    let generator = Arc::new(ScriptedGenerator::new());
    script(&generator, &AnalysisStage::ALL);
    let store = Arc::new(InMemoryJobStore::new());
    let dispatcher = analysis_dispatcher(&generator, store.clone(), None);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (on_complete, on_error) = callbacks("ada", &tx);
    let id = dispatcher
        .enqueue(WorkKind::Analysis, analysis_payload(), "ada", on_complete, on_error)
        .await
        .unwrap();

    let (_, result) = rx.recv().await.unwrap();
    let value = result.unwrap();
    assert_eq!(value["job_id"], json!(id));
    assert_eq!(value["record"]["interests"].as_array().unwrap().len(), 3);
    assert_eq!(value["record"]["socialBehaviorMetrics"]["engagement"], 72);
    assert_eq!(value["defaulted"], json!([]));
    assert_eq!(value["tolerated"], json!([]));
    assert_eq!(generator.call_labels(), all_labels());

    // The job is stored under the item id.
    let job = store.get_job(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_stages, 6);
    assert_eq!(store.stage_results(&id).await.unwrap().len(), 6);
    assert_eq!(dispatcher.shutdown().await.unwrap(), 0);
}

#[tokio::test]
async fn test_restored_analysis_resumes_its_job() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("queue.db").display());
    let snapshot = QueueSnapshot::open(&url).await.unwrap();

    let interests = AnalysisStage::Interests.as_str();
    let generator = Arc::new(ScriptedGenerator::new());
    script(&generator, &[AnalysisStage::BasicInfo]);
    generator.push(interests, ScriptedReply::Hang);
    let store = Arc::new(InMemoryJobStore::new());
    let dispatcher = analysis_dispatcher(&generator, store.clone(), Some(snapshot.clone()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (on_complete, on_error) = callbacks("ada", &tx);
    let id = dispatcher
        .enqueue(WorkKind::Analysis, analysis_payload(), "ada", on_complete, on_error)
        .await
        .unwrap();

    // Wait until the first stage is checkpointed and the second is stuck.
    for _ in 0..500 {
        if generator.call_count(interests) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(generator.call_count(interests), 1);

    assert_eq!(dispatcher.shutdown().await.unwrap(), 1);
    let (_, result) = rx.recv().await.unwrap();
    assert!(matches!(result, Err(DispatchError::Shutdown)));
    let job = store.get_job(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.processed_stages, 1);

    let mut restored = snapshot.restore(Duration::from_secs(300)).await.unwrap();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].id, id);

    script(&generator, &AnalysisStage::ALL[1..]);
    let dispatcher = analysis_dispatcher(&generator, store.clone(), None);
    let (on_complete, on_error) = callbacks("ada", &tx);
    dispatcher
        .requeue(restored.remove(0), on_complete, on_error)
        .await
        .unwrap();

    let (_, result) = rx.recv().await.unwrap();
    assert_eq!(result.unwrap()["job_id"], json!(id));
    assert_eq!(generator.call_count(AnalysisStage::BasicInfo.as_str()), 1);
    assert_eq!(generator.call_count(interests), 2);

    let jobs = store.list_jobs(None, 10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Completed);
    assert_eq!(jobs[0].processed_stages, 6);
    assert_eq!(store.stage_results(&id).await.unwrap().len(), 6);
}
