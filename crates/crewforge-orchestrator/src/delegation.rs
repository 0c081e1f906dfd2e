use crate::context::RunContext;
use async_trait::async_trait;
use crewforge_agent::{
    Assignment, DelegateHandler, DelegationRequest, ExchangeOutcome, Worker, WorkerRegistry,
    WorkerRunner,
};
use crewforge_core::{CrewError, CrewResult, TaskId, WorkerId};
use tracing::{info, warn};

/// Delegation state for one task execution.
///
/// Tracks the chain of workers currently handling the task and enforces the
/// depth limit so delegation can never loop: a worker may not hand a task to
/// itself, to any worker already in the chain, or past `max_depth` hops.
pub struct DelegationScope<'a> {
    workers: &'a WorkerRegistry,
    runner: &'a WorkerRunner,
    context: &'a RunContext,
    task_id: TaskId,
    /// Workers handling the task, outermost first.
    chain: Vec<WorkerId>,
    max_depth: u32,
}

impl<'a> DelegationScope<'a> {
    /// Scope for a task assigned to `assigned`, before any delegation.
    pub fn root(
        workers: &'a WorkerRegistry,
        runner: &'a WorkerRunner,
        context: &'a RunContext,
        task_id: TaskId,
        assigned: WorkerId,
        max_depth: u32,
    ) -> Self {
        Self {
            workers,
            runner,
            context,
            task_id,
            chain: vec![assigned],
            max_depth,
        }
    }

    /// Number of hops taken so far.
    pub fn depth(&self) -> u32 {
        u32::try_from(self.chain.len().saturating_sub(1)).unwrap_or(u32::MAX)
    }

    /// Workers the task has passed through, outermost first.
    pub fn chain(&self) -> &[WorkerId] {
        &self.chain
    }

    fn nested(&self, target: WorkerId) -> Self {
        let mut chain = self.chain.clone();
        chain.push(target);
        Self {
            workers: self.workers,
            runner: self.runner,
            context: self.context,
            task_id: self.task_id.clone(),
            chain,
            max_depth: self.max_depth,
        }
    }

    fn check(&self, from: &Worker, target: &WorkerId) -> CrewResult<()> {
        if target == from.id() || self.chain.contains(target) || self.depth() >= self.max_depth {
            warn!(
                task_id = %self.task_id,
                worker = %from.id(),
                target = %target,
                depth = self.depth(),
                max_depth = self.max_depth,
                "Delegation rejected as a loop"
            );
            return Err(CrewError::DelegationLoop {
                chain: self.chain.clone(),
                target: target.clone(),
            });
        }
        if !self.workers.contains(target) {
            return Err(CrewError::InvalidDelegation {
                target: target.clone(),
                reason: "no such worker".to_string(),
            });
        }
        if !from.may_delegate_to(target) {
            return Err(CrewError::InvalidDelegation {
                target: target.clone(),
                reason: format!("not a subordinate of '{}'", from.id()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DelegateHandler for DelegationScope<'_> {
    fn candidates(&self, from: &Worker) -> Vec<WorkerId> {
        if self.depth() >= self.max_depth {
            return Vec::new();
        }
        self.workers
            .iter()
            .map(|w| w.id())
            .filter(|id| from.may_delegate_to(id) && !self.chain.contains(id))
            .cloned()
            .collect()
    }

    async fn delegate(
        &self,
        from: &Worker,
        request: DelegationRequest,
        assignment: &Assignment,
    ) -> CrewResult<ExchangeOutcome> {
        self.check(from, &request.target)?;
        let target = self
            .workers
            .get(&request.target)
            .ok_or_else(|| CrewError::InvalidDelegation {
                target: request.target.clone(),
                reason: "no such worker".to_string(),
            })?;

        info!(
            task_id = %self.task_id,
            worker = %from.id(),
            target = %target.id(),
            depth = self.depth() + 1,
            "Delegating task"
        );
        self.context.mark_delegated(&self.task_id);

        let nested = self.nested(target.id().clone());
        let restated = assignment.restated(request.description);
        self.runner.run(target, &restated, &nested).await
    }
}
