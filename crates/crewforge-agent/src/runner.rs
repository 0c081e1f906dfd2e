use crate::backend::{
    Assignment, CompletionRequest, CompletionResponse, DelegationRequest, Observation,
};
use crate::retry::RetryPolicy;
use crate::worker::Worker;
use async_trait::async_trait;
use crewforge_core::{BackendError, CrewError, CrewResult, WorkerId};
use crewforge_security::RateLimiter;
use crewforge_tools::ToolInvoker;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    /// The final answer.
    pub output: String,
    /// The worker whose final answer became the output.
    pub produced_by: WorkerId,
    /// Every worker that took part, outermost first.
    pub handled_by: Vec<WorkerId>,
}

/// Resolves delegation requests on behalf of the runner.
///
/// Implemented by the orchestrator, which owns the worker registry and tracks
/// the delegation chain for the task being executed.
#[async_trait]
pub trait DelegateHandler: Send + Sync {
    /// Workers `from` may currently hand the task to.
    fn candidates(&self, from: &Worker) -> Vec<WorkerId>;

    /// Run the delegated task to completion on the target worker.
    async fn delegate(
        &self,
        from: &Worker,
        request: DelegationRequest,
        assignment: &Assignment,
    ) -> CrewResult<ExchangeOutcome>;
}

/// Handler for contexts where delegation is not available.
pub struct NoDelegation;

#[async_trait]
impl DelegateHandler for NoDelegation {
    fn candidates(&self, _from: &Worker) -> Vec<WorkerId> {
        Vec::new()
    }

    async fn delegate(
        &self,
        _from: &Worker,
        request: DelegationRequest,
        _assignment: &Assignment,
    ) -> CrewResult<ExchangeOutcome> {
        Err(CrewError::InvalidDelegation {
            target: request.target,
            reason: "delegation is not available here".to_string(),
        })
    }
}

/// Receives per-worker activity from the runner (metrics, dashboards).
#[async_trait]
pub trait ExchangeObserver: Send + Sync {
    /// A backend request went out after waiting `throttled` on the rate limit.
    async fn request_sent(&self, _worker: &WorkerId, _throttled: Duration) {}

    /// A tool call finished.
    async fn tool_called(&self, _worker: &WorkerId, _tool: &str, _succeeded: bool) {}

    /// A task was handed from one worker to another.
    async fn delegated(&self, _from: &WorkerId, _to: &WorkerId) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl ExchangeObserver for NoopObserver {}

/// Drives the exchange loop for a single worker and task.
/// Prompt → backend → ToolCall → execute tool → observation → repeat.
pub struct WorkerRunner {
    tools: Arc<dyn ToolInvoker>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    observer: Arc<dyn ExchangeObserver>,
}

impl WorkerRunner {
    /// Create a runner without retries or observers.
    pub fn new(tools: Arc<dyn ToolInvoker>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            tools,
            limiter,
            retry: RetryPolicy::default(),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Set the backend retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Report exchange events to an observer.
    pub fn with_observer(mut self, observer: Arc<dyn ExchangeObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run the exchange until the worker (or a worker it delegated to)
    /// produces a final answer.
    ///
    /// Tool failures and refused delegations are fed back as observations.
    /// Backend failures, delegation loops and an exhausted iteration budget
    /// end the exchange with an error.
    pub async fn run(
        &self,
        worker: &Worker,
        assignment: &Assignment,
        delegation: &dyn DelegateHandler,
    ) -> CrewResult<ExchangeOutcome> {
        let config = worker.config();
        let permitted = config.allowed_tools.restrict_to(&assignment.tools);
        let delegates = if worker.is_delegator() {
            delegation.candidates(worker)
        } else {
            Vec::new()
        };
        let mut handled_by = vec![worker.id().clone()];
        let mut transcript = Vec::new();

        info!(
            task_id = %assignment.task_id,
            worker = %worker.id(),
            tools = permitted.len(),
            delegates = delegates.len(),
            "Starting exchange"
        );

        for iteration in 1..=config.max_iterations {
            let request = CompletionRequest {
                task_id: assignment.task_id.clone(),
                worker_id: worker.id().clone(),
                role: config.role.clone(),
                goal: config.goal.clone(),
                backstory: config.backstory.clone(),
                task_description: assignment.description.clone(),
                expected_output: assignment.expected_output.clone(),
                context: assignment.context.as_ref().clone(),
                available_tools: permitted.iter().map(str::to_string).collect(),
                delegates: delegates.clone(),
                transcript: transcript.clone(),
                iteration,
            };

            match self.complete(worker, &request).await? {
                CompletionResponse::FinalAnswer { text } => {
                    info!(
                        task_id = %assignment.task_id,
                        worker = %worker.id(),
                        iterations = iteration,
                        "Exchange completed"
                    );
                    return Ok(ExchangeOutcome {
                        output: text,
                        produced_by: worker.id().clone(),
                        handled_by,
                    });
                }

                CompletionResponse::ToolCall(call) => {
                    debug!(
                        task_id = %assignment.task_id,
                        worker = %worker.id(),
                        tool = %call.name,
                        iteration,
                        "Executing tool call"
                    );
                    let result = self.tools.invoke_permitted(&call, &permitted).await;
                    self.observer
                        .tool_called(worker.id(), &call.name, result.is_ok())
                        .await;
                    match result {
                        Ok(output) => transcript.push(Observation::ToolOutput {
                            tool: call.name,
                            argument: call.argument,
                            output,
                        }),
                        Err(error) => {
                            warn!(
                                task_id = %assignment.task_id,
                                worker = %worker.id(),
                                error = %error,
                                "Tool call failed, reporting to backend"
                            );
                            transcript.push(Observation::ToolFailure {
                                tool: call.name,
                                argument: call.argument,
                                error,
                            });
                        }
                    }
                }

                CompletionResponse::Delegate(request) => {
                    if !worker.is_delegator() {
                        warn!(
                            task_id = %assignment.task_id,
                            worker = %worker.id(),
                            target = %request.target,
                            "Non-delegator asked to delegate"
                        );
                        transcript.push(Observation::Notice {
                            message: format!(
                                "You cannot delegate; answer the task yourself instead of handing it to '{}'.",
                                request.target
                            ),
                        });
                        continue;
                    }

                    let target = request.target.clone();
                    self.observer.delegated(worker.id(), &target).await;
                    match delegation.delegate(worker, request, assignment).await {
                        Ok(outcome) if !config.review_delegations => {
                            handled_by.extend(outcome.handled_by);
                            return Ok(ExchangeOutcome {
                                output: outcome.output,
                                produced_by: outcome.produced_by,
                                handled_by,
                            });
                        }
                        Ok(outcome) => {
                            handled_by.extend(outcome.handled_by);
                            transcript.push(Observation::DelegatedOutput {
                                worker: outcome.produced_by,
                                output: outcome.output,
                            });
                        }
                        Err(e) if e.is_fatal_for_delegator() => return Err(e),
                        Err(e) => {
                            warn!(
                                task_id = %assignment.task_id,
                                worker = %worker.id(),
                                target = %target,
                                error = %e,
                                "Delegation failed, reporting to delegator"
                            );
                            transcript.push(Observation::DelegationFailure {
                                worker: target,
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        warn!(
            task_id = %assignment.task_id,
            worker = %worker.id(),
            max_iterations = config.max_iterations,
            "Exchange reached its iteration budget"
        );
        Err(CrewError::IterationBudgetExceeded {
            worker: worker.id().clone(),
            max_iterations: config.max_iterations,
        })
    }

    /// One backend turn: rate limit, timeout, and retry of retryable failures.
    async fn complete(
        &self,
        worker: &Worker,
        request: &CompletionRequest,
    ) -> CrewResult<CompletionResponse> {
        let timeout = worker.config().request_timeout();
        let mut attempt = 0;
        loop {
            let throttled = self.limiter.acquire(worker.id()).await;
            self.observer.request_sent(worker.id(), throttled).await;

            let result = match tokio::time::timeout(timeout, worker.backend().complete(request)).await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::timeout(format!(
                    "no response within {}s",
                    timeout.as_secs()
                ))),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        worker = %worker.id(),
                        error = %err,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retryable backend error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(CrewError::Backend(err)),
            }
        }
    }
}
