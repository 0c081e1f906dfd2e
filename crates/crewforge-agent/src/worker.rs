use crate::backend::CompletionBackend;
use crate::config::WorkerConfig;
use crewforge_core::{ConfigError, WorkerId};
use std::collections::HashMap;
use std::sync::Arc;

/// A configured role bound to a completion backend.
///
/// There is one worker type; a delegator is simply a worker whose config sets
/// `delegator = true`.
pub struct Worker {
    config: WorkerConfig,
    backend: Arc<dyn CompletionBackend>,
}

impl Worker {
    /// Bind a configuration to a completion backend.
    pub fn new(config: WorkerConfig, backend: Arc<dyn CompletionBackend>) -> Self {
        Self { config, backend }
    }

    /// The worker's id.
    pub fn id(&self) -> &WorkerId {
        &self.config.id
    }

    /// The worker's configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// The backend that takes this worker's turns.
    pub fn backend(&self) -> &Arc<dyn CompletionBackend> {
        &self.backend
    }

    /// Whether the worker may hand tasks to subordinates.
    pub fn is_delegator(&self) -> bool {
        self.config.delegator
    }

    /// Whether this worker's config lets it target `other`. Loop and depth
    /// checks are the orchestrator's concern.
    pub fn may_delegate_to(&self, other: &WorkerId) -> bool {
        self.config.delegator
            && other != self.id()
            && (self.config.subordinates.is_empty() || self.config.subordinates.contains(other))
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.config.id)
            .field("role", &self.config.role)
            .field("delegator", &self.config.delegator)
            .finish_non_exhaustive()
    }
}

/// Read-only set of workers for one run, kept in declaration order.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: Vec<Arc<Worker>>,
    index: HashMap<WorkerId, usize>,
}

impl WorkerRegistry {
    /// Build and validate a registry.
    ///
    /// Fails on duplicate ids, a zero iteration budget, or a subordinate that
    /// does not exist or names the delegator itself.
    pub fn new(workers: Vec<Worker>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(workers.len());
        for (position, worker) in workers.iter().enumerate() {
            if index.insert(worker.id().clone(), position).is_some() {
                return Err(ConfigError::DuplicateId {
                    id: worker.id().to_string(),
                });
            }
            if worker.config.max_iterations == 0 {
                return Err(ConfigError::Invalid(format!(
                    "worker '{}' must allow at least one iteration",
                    worker.id()
                )));
            }
        }

        for worker in &workers {
            for subordinate in &worker.config.subordinates {
                if subordinate == worker.id() || !index.contains_key(subordinate) {
                    return Err(ConfigError::InvalidSubordinate {
                        worker: worker.id().clone(),
                        subordinate: subordinate.clone(),
                    });
                }
            }
        }

        Ok(Self {
            workers: workers.into_iter().map(Arc::new).collect(),
            index,
        })
    }

    /// Look up a worker by id.
    pub fn get(&self, id: &WorkerId) -> Option<&Arc<Worker>> {
        self.index.get(id).map(|&i| &self.workers[i])
    }

    /// Whether a worker with this id exists.
    pub fn contains(&self, id: &WorkerId) -> bool {
        self.index.contains_key(id)
    }

    /// Workers in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Worker>> {
        self.workers.iter()
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// `(worker, requests per minute)` for every rate-limited worker.
    pub fn rate_limits(&self) -> impl Iterator<Item = (WorkerId, u32)> + '_ {
        self.workers.iter().filter_map(|w| {
            w.config
                .max_requests_per_minute
                .map(|rpm| (w.id().clone(), rpm))
        })
    }
}
