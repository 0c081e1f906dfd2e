//! End-to-end scheduler tests.
//!
//! Every worker is backed by an instrumented in-process backend that records
//! the requests it receives, when they arrive, and how many were in flight.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use crewforge_agent::{
    CompletionBackend, CompletionRequest, CompletionResponse, Observation, Worker, WorkerConfig,
    WorkerRegistry,
};
use crewforge_core::{
    BackendError, BackendErrorKind, ConfigError, CrewError, CrewResult, HumanChannel, HumanQuery,
    HumanReply, TaskId, WorkerId,
};
use crewforge_orchestrator::*;
use crewforge_tools::{HumanInputTool, ToolRegistry, ToolTimeouts, HUMAN_TOOL};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Instrumented backend
// ---------------------------------------------------------------------------

type Respond = dyn Fn(&CompletionRequest) -> Result<CompletionResponse, BackendError> + Send + Sync;

#[derive(Default)]
struct Probe {
    active: AtomicUsize,
    max_active: AtomicUsize,
    events: Mutex<Vec<String>>,
    call_times: Mutex<Vec<Instant>>,
}

struct TestBackend {
    respond: Box<Respond>,
    delay: Duration,
    requests: Mutex<Vec<CompletionRequest>>,
    probe: Arc<Probe>,
}

impl TestBackend {
    fn new(
        respond: impl Fn(&CompletionRequest) -> Result<CompletionResponse, BackendError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            probe: Arc::new(Probe::default()),
        }
    }

    /// Answers every task with "<task id> done".
    fn answering() -> Self {
        Self::new(|r| {
            Ok(CompletionResponse::final_answer(format!(
                "{} done",
                r.task_id
            )))
        })
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn with_probe(mut self, probe: Arc<Probe>) -> Self {
        self.probe = probe;
        self
    }

    fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    fn request_for(&self, task: &str) -> CompletionRequest {
        self.requests
            .lock()
            .iter()
            .find(|r| r.task_id.as_str() == task)
            .cloned()
            .expect("no request for task")
    }
}

#[async_trait]
impl CompletionBackend for TestBackend {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        self.requests.lock().push(request.clone());
        let active = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_active.fetch_max(active, Ordering::SeqCst);
        self.probe
            .events
            .lock()
            .push(format!("start:{}", request.task_id));
        self.probe.call_times.lock().push(Instant::now());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.probe
            .events
            .lock()
            .push(format!("end:{}", request.task_id));
        self.probe.active.fetch_sub(1, Ordering::SeqCst);
        (self.respond)(request)
    }
}

fn worker(config: WorkerConfig, backend: &Arc<TestBackend>) -> Worker {
    Worker::new(config, backend.clone())
}

fn plain(id: &str) -> WorkerConfig {
    WorkerConfig::new(id, format!("{id} role"), format!("{id} goal"))
}

fn scheduler(workers: Vec<Worker>, nodes: Vec<TaskNode>, options: RunOptions) -> Scheduler {
    let workers = WorkerRegistry::new(workers).unwrap();
    let graph = TaskGraph::build(nodes, &workers).unwrap();
    Scheduler::new(graph, workers, Arc::new(ToolRegistry::new())).with_options(options)
}

fn task(id: &str, worker: &str) -> TaskNode {
    TaskNode::new(id, worker, format!("do {id}"))
}

fn id(task: &str) -> TaskId {
    TaskId::new(task)
}

// ---------------------------------------------------------------------------
// Dependency ordering and failure isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failed_upstream_blocks_chain_but_not_independent_branch() {
    let flaky = Arc::new(TestBackend::new(|_| {
        Err(BackendError::new(BackendErrorKind::Protocol, "malformed reply"))
    }));
    let steady = Arc::new(TestBackend::answering());

    let scheduler = scheduler(
        vec![worker(plain("flaky"), &flaky), worker(plain("writer"), &steady)],
        vec![
            task("a", "flaky"),
            task("b", "writer").depends_on(["a"]),
            task("c", "writer").depends_on(["b"]),
            task("d", "writer"),
        ],
        RunOptions::default(),
    );
    let report = scheduler.run().await;

    assert_eq!(report.state(&id("a")), Some(NodeState::Failed));
    assert_eq!(report.state(&id("b")), Some(NodeState::Blocked));
    assert_eq!(report.state(&id("c")), Some(NodeState::Blocked));
    assert_eq!(report.state(&id("d")), Some(NodeState::Completed));
    assert_eq!(report.status, RunStatus::PartialFailure);

    // The writer only ever saw the independent task.
    assert_eq!(steady.calls(), 1);
    assert_eq!(steady.request_for("d").task_id, id("d"));

    let a = report.result(&id("a")).unwrap();
    assert_eq!(a.status, TaskStatus::Failed);
    assert!(matches!(a.error, Some(CrewError::Backend(_))));
    assert_eq!(a.produced_by, Some(WorkerId::new("flaky")));

    let c = report.result(&id("c")).unwrap();
    assert_eq!(c.error, Some(CrewError::Blocked { upstream: id("a") }));
    assert!(c.output.is_none());
    assert!(c.started_at.is_none());
}

#[tokio::test]
async fn test_final_task_defaults_to_last_sink() {
    let backend = Arc::new(TestBackend::answering());
    let scheduler = scheduler(
        vec![worker(plain("writer"), &backend)],
        vec![
            task("draft", "writer"),
            task("edit", "writer").depends_on(["draft"]),
            task("notes", "writer"),
        ],
        RunOptions::default(),
    );
    let report = scheduler.run().await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.final_task, id("notes"));
    assert_eq!(report.output(), Some("notes done"));
    assert_eq!(report.tasks.len(), 3);
}

#[tokio::test]
async fn test_cycle_detected_before_any_execution() {
    let backend = Arc::new(TestBackend::answering());
    let workers = WorkerRegistry::new(vec![worker(plain("writer"), &backend)]).unwrap();
    let err = TaskGraph::build(
        vec![
            task("a", "writer").depends_on(["b"]),
            task("b", "writer").depends_on(["a"]),
        ],
        &workers,
    )
    .unwrap_err();

    assert!(matches!(err, ConfigError::Cycle { .. }));
    assert_eq!(CrewError::from(err).kind(), "configuration");
    assert_eq!(backend.calls(), 0);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_independent_tasks_run_concurrently() {
    let backend = Arc::new(TestBackend::answering().with_delay(Duration::from_millis(50)));
    let scheduler = scheduler(
        vec![worker(plain("researcher"), &backend)],
        vec![task("ideas", "researcher"), task("history", "researcher")],
        RunOptions::default(),
    );
    let report = scheduler.run().await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(backend.probe.max_active.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_max_in_flight_bounds_fan_out() {
    let backend = Arc::new(TestBackend::answering().with_delay(Duration::from_millis(50)));
    let scheduler = scheduler(
        vec![worker(plain("researcher"), &backend)],
        (1..=5).map(|i| task(&format!("t{i}"), "researcher")).collect(),
        RunOptions::default().with_max_in_flight(2),
    );
    let report = scheduler.run().await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(backend.probe.max_active.load(Ordering::SeqCst), 2);
    assert_eq!(backend.calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_task_runs_alone() {
    let probe = Arc::new(Probe::default());
    let backend = Arc::new(
        TestBackend::answering()
            .with_delay(Duration::from_millis(10))
            .with_probe(Arc::clone(&probe)),
    );
    let scheduler = scheduler(
        vec![worker(plain("writer"), &backend)],
        vec![
            task("a", "writer"),
            task("solo", "writer").sequential(),
            task("b", "writer"),
        ],
        RunOptions::default(),
    );
    let report = scheduler.run().await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(
        *probe.events.lock(),
        vec!["start:a", "end:a", "start:solo", "end:solo", "start:b", "end:b"]
    );
}

// ---------------------------------------------------------------------------
// Context propagation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_context_contains_exactly_dependency_outputs() {
    let slow = Arc::new(TestBackend::answering().with_delay(Duration::from_millis(30)));
    let fast = Arc::new(TestBackend::answering().with_delay(Duration::from_millis(5)));
    let scheduler = scheduler(
        vec![worker(plain("slow"), &slow), worker(plain("fast"), &fast)],
        vec![
            task("a", "slow"),
            task("b", "fast"),
            task("unrelated", "fast"),
            task("c", "fast").depends_on(["a", "b"]),
        ],
        RunOptions::default(),
    );
    let report = scheduler.run().await;
    assert_eq!(report.status, RunStatus::Success);

    // a finished after b, but the context follows the dependency order.
    let a_done = report.result(&id("a")).unwrap().finished_at;
    let b_done = report.result(&id("b")).unwrap().finished_at;
    assert!(a_done >= b_done);

    let request = fast.request_for("c");
    let context: Vec<_> = request
        .context
        .iter()
        .map(|e| (e.source_task.as_str(), e.text.as_str()))
        .collect();
    assert_eq!(context, vec![("a", "a done"), ("b", "b done")]);
}

#[tokio::test]
async fn test_task_whitelist_narrows_available_tools() {
    let backend = Arc::new(TestBackend::answering());
    let scheduler = scheduler(
        vec![worker(
            plain("researcher").with_tools(["search", "read_page"]),
            &backend,
        )],
        vec![
            task("narrow", "researcher").with_tools(["search"]),
            task("wide", "researcher"),
        ],
        RunOptions::default(),
    );
    scheduler.run().await;

    assert_eq!(backend.request_for("narrow").available_tools, vec!["search"]);
    assert_eq!(
        backend.request_for("wide").available_tools,
        vec!["read_page", "search"]
    );
}

// ---------------------------------------------------------------------------
// Delegation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_delegated_output_is_attributed_to_subordinate() {
    let manager = Arc::new(TestBackend::new(|r| {
        assert_eq!(r.delegates, vec![WorkerId::new("writer")]);
        Ok(CompletionResponse::delegate(
            "writer",
            format!("{} (keep it short)", r.task_description),
        ))
    }));
    let writer = Arc::new(TestBackend::new(|r| {
        Ok(CompletionResponse::final_answer(format!(
            "written: {}",
            r.task_description
        )))
    }));
    let research = Arc::new(TestBackend::answering());

    let scheduler = scheduler(
        vec![
            worker(plain("manager").with_delegation(["writer"]), &manager),
            worker(plain("writer"), &writer),
            worker(plain("researcher"), &research),
        ],
        vec![
            task("ideas", "researcher"),
            task("report", "manager").depends_on(["ideas"]),
        ],
        RunOptions::default(),
    );
    let report = scheduler.run().await;

    let result = report.result(&id("report")).unwrap();
    assert_eq!(result.status, TaskStatus::Delegated);
    assert_eq!(result.output(), Some("written: do report (keep it short)"));
    assert_eq!(result.produced_by, Some(WorkerId::new("writer")));
    assert_eq!(
        result.delegation_chain,
        vec![WorkerId::new("manager"), WorkerId::new("writer")]
    );
    assert_eq!(report.state(&id("report")), Some(NodeState::Completed));
    assert_eq!(report.status, RunStatus::Success);

    // The subordinate sees the same upstream context.
    let context = &writer.request_for("report").context;
    assert_eq!(context.len(), 1);
    assert_eq!(context[0].text, "ideas done");

    let manager_activity = report
        .workers
        .iter()
        .find(|w| w.worker == WorkerId::new("manager"))
        .unwrap();
    assert_eq!(manager_activity.metrics.delegations_sent, 1);
}

#[tokio::test]
async fn test_self_delegation_fails_with_loop_error() {
    let manager = Arc::new(TestBackend::new(|_| {
        Ok(CompletionResponse::delegate("manager", "you again"))
    }));
    let writer = Arc::new(TestBackend::answering());

    let scheduler = scheduler(
        vec![
            worker(plain("manager").with_delegation(["writer"]), &manager),
            worker(plain("writer"), &writer),
        ],
        vec![task("report", "manager")],
        RunOptions::default(),
    );
    let report = scheduler.run().await;

    let result = report.result(&id("report")).unwrap();
    assert_eq!(
        result.error,
        Some(CrewError::DelegationLoop {
            chain: vec![WorkerId::new("manager")],
            target: WorkerId::new("manager"),
        })
    );
    assert_eq!(manager.calls(), 1);
    assert_eq!(writer.calls(), 0);
}

#[tokio::test]
async fn test_two_delegators_cycling_fail_with_loop_error() {
    let alpha = Arc::new(TestBackend::new(|_| {
        Ok(CompletionResponse::delegate("beta", "over to you"))
    }));
    let beta = Arc::new(TestBackend::new(|_| {
        Ok(CompletionResponse::delegate("alpha", "no, over to you"))
    }));
    let workers = || {
        vec![
            worker(plain("alpha").with_delegation(["beta"]), &alpha),
            worker(plain("beta").with_delegation(["alpha"]), &beta),
        ]
    };

    // Room for two hops: the cycle itself is what gets rejected.
    let report = scheduler(
        workers(),
        vec![task("t", "alpha")],
        RunOptions::default().with_max_delegation_depth(2),
    )
    .run()
    .await;
    assert_eq!(
        report.result(&id("t")).unwrap().error,
        Some(CrewError::DelegationLoop {
            chain: vec![WorkerId::new("alpha"), WorkerId::new("beta")],
            target: WorkerId::new("alpha"),
        })
    );

    // With the default single hop the second delegation is rejected too.
    let report = scheduler(workers(), vec![task("t", "alpha")], RunOptions::default())
        .run()
        .await;
    assert!(matches!(
        report.result(&id("t")).unwrap().error,
        Some(CrewError::DelegationLoop { .. })
    ));
    assert_eq!(report.status, RunStatus::PartialFailure);
}

#[tokio::test]
async fn test_reviewing_delegator_owns_the_final_answer() {
    let manager = Arc::new(TestBackend::new(|r| match r.transcript.last() {
        Some(Observation::DelegatedOutput { worker, output }) => Ok(
            CompletionResponse::final_answer(format!("approved ({worker}): {output}")),
        ),
        _ => Ok(CompletionResponse::delegate("writer", "draft it")),
    }));
    let writer = Arc::new(TestBackend::new(|r| {
        Ok(CompletionResponse::final_answer(format!(
            "draft of {}",
            r.task_id
        )))
    }));

    let scheduler = scheduler(
        vec![
            worker(
                plain("manager").with_delegation(["writer"]).with_review(),
                &manager,
            ),
            worker(plain("writer"), &writer),
        ],
        vec![task("report", "manager")],
        RunOptions::default(),
    );
    let report = scheduler.run().await;

    let result = report.result(&id("report")).unwrap();
    assert_eq!(result.status, TaskStatus::Success);
    assert_eq!(result.output(), Some("approved (writer): draft of report"));
    assert_eq!(result.produced_by, Some(WorkerId::new("manager")));
    assert_eq!(
        result.delegation_chain,
        vec![WorkerId::new("manager"), WorkerId::new("writer")]
    );
    assert_eq!(manager.calls(), 2);
}

// ---------------------------------------------------------------------------
// Backend retries
// ---------------------------------------------------------------------------

fn flaky_once() -> Arc<TestBackend> {
    let attempts = AtomicUsize::new(0);
    Arc::new(TestBackend::new(move |r| {
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(BackendError::new(BackendErrorKind::Transport, "connection reset"))
        } else {
            Ok(CompletionResponse::final_answer(format!("{} done", r.task_id)))
        }
    }))
}

#[tokio::test(start_paused = true)]
async fn test_transient_backend_failure_is_retried_when_enabled() {
    let backend = flaky_once();
    let report = scheduler(
        vec![worker(plain("writer"), &backend)],
        vec![task("a", "writer")],
        RunOptions::default().with_backend_retries(1),
    )
    .run()
    .await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.output(), Some("a done"));
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_backend_failure_is_not_retried_by_default() {
    let backend = flaky_once();
    let report = scheduler(
        vec![worker(plain("writer"), &backend)],
        vec![task("a", "writer")],
        RunOptions::default(),
    )
    .run()
    .await;

    assert_eq!(report.state(&id("a")), Some(NodeState::Failed));
    assert_eq!(backend.calls(), 1);
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_rate_limit_delays_requests_instead_of_dropping_them() {
    let backend = Arc::new(TestBackend::answering());
    let started = Instant::now();
    let scheduler = scheduler(
        vec![worker(plain("researcher").with_rate_limit(1), &backend)],
        vec![
            task("one", "researcher"),
            task("two", "researcher"),
            task("three", "researcher"),
        ],
        RunOptions::default(),
    );
    let report = scheduler.run().await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(backend.calls(), 3);

    let mut offsets: Vec<Duration> = backend
        .probe
        .call_times
        .lock()
        .iter()
        .map(|t| t.duration_since(started))
        .collect();
    offsets.sort();
    assert!(offsets[0] < Duration::from_secs(1));
    assert!(offsets[1] >= Duration::from_secs(59));
    assert!(offsets[2] >= Duration::from_secs(119));

    let activity = &report.workers[0];
    assert_eq!(activity.metrics.requests, 3);
    assert!(activity.metrics.throttled_ms >= 170_000);
}

// ---------------------------------------------------------------------------
// Budgets, panics and callbacks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_iteration_budget_exhaustion_fails_the_task() {
    let backend = Arc::new(TestBackend::new(|_| {
        Ok(CompletionResponse::tool_call("search", "again"))
    }));
    let scheduler = scheduler(
        vec![worker(plain("researcher").with_max_iterations(3), &backend)],
        vec![task("loop", "researcher")],
        RunOptions::default(),
    );
    let report = scheduler.run().await;

    assert_eq!(
        report.result(&id("loop")).unwrap().error,
        Some(CrewError::IterationBudgetExceeded {
            worker: WorkerId::new("researcher"),
            max_iterations: 3,
        })
    );
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn test_panicking_backend_fails_only_its_task() {
    let exploding = Arc::new(TestBackend::new(|_| panic!("backend exploded")));
    let steady = Arc::new(TestBackend::answering());
    let scheduler = scheduler(
        vec![
            worker(plain("exploding"), &exploding),
            worker(plain("steady"), &steady),
        ],
        vec![task("boom", "exploding"), task("fine", "steady")],
        RunOptions::default(),
    );
    let report = scheduler.run().await;

    let boom = report.result(&id("boom")).unwrap();
    assert!(matches!(&boom.error, Some(CrewError::Internal(msg)) if msg.contains("backend exploded")));
    assert_eq!(report.state(&id("fine")), Some(NodeState::Completed));
}

#[tokio::test]
async fn test_callback_failures_never_reach_the_graph() {
    let backend = Arc::new(TestBackend::answering());
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let failing: Arc<dyn TaskCallback> = Arc::new(move |result: &TaskResult| -> CrewResult<()> {
        assert_eq!(result.output(), Some("a done"));
        seen.fetch_add(1, Ordering::SeqCst);
        Err(CrewError::Callback("mail server down".to_string()))
    });
    let panicking: Arc<dyn TaskCallback> =
        Arc::new(|_: &TaskResult| -> CrewResult<()> { panic!("callback exploded") });

    let scheduler = scheduler(
        vec![worker(plain("writer"), &backend)],
        vec![
            task("a", "writer").with_callback(failing),
            task("b", "writer").depends_on(["a"]).with_callback(panicking),
            task("c", "writer").depends_on(["b"]),
        ],
        RunOptions::default(),
    );
    let report = scheduler.run().await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.output(), Some("c done"));
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_run_timeout_cancels_remaining_work() {
    let quick = Arc::new(TestBackend::answering());
    let stuck = Arc::new(TestBackend::answering().with_delay(Duration::from_secs(3600)));
    let scheduler = scheduler(
        vec![worker(plain("quick"), &quick), worker(plain("stuck"), &stuck)],
        vec![
            task("a", "quick"),
            task("b", "stuck"),
            task("c", "quick").depends_on(["b"]),
        ],
        RunOptions::default().with_timeout(Duration::from_secs(10)),
    );
    let report = scheduler.run().await;

    assert!(report.timed_out);
    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.state(&id("a")), Some(NodeState::Completed));
    assert_eq!(report.result(&id("a")).unwrap().output(), Some("a done"));
    assert_eq!(report.state(&id("b")), Some(NodeState::Cancelled));
    assert_eq!(report.state(&id("c")), Some(NodeState::Cancelled));
    assert_eq!(
        report.result(&id("c")).unwrap().error,
        Some(CrewError::Cancelled)
    );
    assert_eq!(quick.calls(), 1);
}

/// Never finishes its hook.
struct StuckCallback;

#[async_trait]
impl TaskCallback for StuckCallback {
    async fn on_complete(&self, _result: &TaskResult) -> CrewResult<()> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_stuck_callback_cannot_outlive_run_timeout() {
    let backend = Arc::new(TestBackend::answering());
    let scheduler = scheduler(
        vec![worker(plain("writer"), &backend)],
        vec![task("a", "writer").with_callback(Arc::new(StuckCallback))],
        RunOptions::default().with_timeout(Duration::from_secs(10)),
    );

    let started = Instant::now();
    let report = tokio::time::timeout(Duration::from_secs(3600), scheduler.run())
        .await
        .expect("run did not return after its deadline");

    assert!(started.elapsed() <= Duration::from_secs(11));
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.output(), Some("a done"));
}

/// Nobody is at the keyboard.
struct AbsentOperator;

#[async_trait]
impl HumanChannel for AbsentOperator {
    async fn ask(&self, _query: HumanQuery) -> CrewResult<HumanReply> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_cancels_unanswered_human_input() {
    let asker = Arc::new(TestBackend::new(|r| {
        Ok(CompletionResponse::tool_call(HUMAN_TOOL, format!("Approve {}?", r.task_id)))
    }));
    let mut tools = ToolRegistry::new().with_timeouts(ToolTimeouts {
        automated: Some(Duration::from_secs(30)),
        human: None,
    });
    tools.register(Arc::new(HumanInputTool::new(Arc::new(AbsentOperator))));

    let workers =
        WorkerRegistry::new(vec![worker(plain("editor").with_tools([HUMAN_TOOL]), &asker)])
            .unwrap();
    let graph = TaskGraph::build(vec![task("approve", "editor")], &workers).unwrap();
    let scheduler = Scheduler::new(graph, workers, Arc::new(tools))
        .with_options(RunOptions::default().with_timeout(Duration::from_secs(120)));

    let started = Instant::now();
    let report = tokio::time::timeout(Duration::from_secs(3600), scheduler.run())
        .await
        .expect("run did not return after its deadline");

    assert!(report.timed_out);
    assert!(started.elapsed() >= Duration::from_secs(120));
    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.state(&id("approve")), Some(NodeState::Cancelled));
    assert_eq!(
        report.result(&id("approve")).unwrap().error,
        Some(CrewError::Cancelled)
    );
    assert_eq!(asker.calls(), 1);
}

#[tokio::test]
async fn test_cancelled_before_start_runs_nothing() {
    let backend = Arc::new(TestBackend::answering());
    let scheduler = scheduler(
        vec![worker(plain("writer"), &backend)],
        vec![task("a", "writer"), task("b", "writer").depends_on(["a"])],
        RunOptions::default(),
    );
    let token = CancellationToken::new();
    token.cancel();
    let report = scheduler.run_with_cancellation(token).await;

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(!report.timed_out);
    assert!(report
        .tasks
        .iter()
        .all(|t| t.state == NodeState::Cancelled));
    assert_eq!(backend.calls(), 0);
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_result_retrieval_is_idempotent() {
    let backend = Arc::new(TestBackend::answering());
    let scheduler = scheduler(
        vec![worker(plain("writer"), &backend)],
        vec![task("a", "writer")],
        RunOptions::default(),
    );
    let report = scheduler.run().await;

    let first = report.result(&id("a")).unwrap().clone();
    let second = report.result(&id("a")).unwrap().clone();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
    assert_eq!(report.final_result(), Some(&first));

    let json = report.to_json().unwrap();
    let parsed: RunReport = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.result(&id("a")), Some(&first));
    assert_eq!(parsed.status, RunStatus::Success);
}

#[tokio::test]
async fn test_scheduler_can_run_twice() {
    let backend = Arc::new(TestBackend::answering());
    let scheduler = scheduler(
        vec![worker(plain("writer"), &backend)],
        vec![task("a", "writer")],
        RunOptions::default(),
    );
    let first = scheduler.run().await;
    let second = scheduler.run().await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.workers[0].metrics.requests, 1);
    assert_eq!(backend.calls(), 2);
}
