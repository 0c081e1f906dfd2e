use crate::types::TaskNode;
use crewforge_agent::WorkerRegistry;
use crewforge_core::{ConfigError, TaskId};
use std::collections::{HashMap, HashSet, VecDeque};

/// Validated, immutable task graph.
///
/// Nodes keep their declaration order, which is also the launch order among
/// tasks that become ready together.
#[derive(Debug)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    index: HashMap<TaskId, usize>,
    /// Direct dependents per node, by position.
    dependents: Vec<Vec<usize>>,
    final_task: usize,
}

impl TaskGraph {
    /// Validate the nodes against the worker registry and build the graph.
    ///
    /// The final task defaults to the last declared sink.
    pub fn build(nodes: Vec<TaskNode>, workers: &WorkerRegistry) -> Result<Self, ConfigError> {
        if nodes.is_empty() {
            return Err(ConfigError::EmptyGraph);
        }

        let mut index = HashMap::with_capacity(nodes.len());
        for (position, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), position).is_some() {
                return Err(ConfigError::DuplicateId {
                    id: node.id.to_string(),
                });
            }
        }

        let mut dependents = vec![Vec::new(); nodes.len()];
        for (position, node) in nodes.iter().enumerate() {
            let worker = workers
                .get(&node.worker)
                .ok_or_else(|| ConfigError::UnknownWorker {
                    task: node.id.clone(),
                    worker: node.worker.clone(),
                })?;

            if let Some(tool) = node
                .tool_whitelist
                .not_covered_by(&worker.config().allowed_tools)
                .first()
            {
                return Err(ConfigError::ToolNotAllowed {
                    task: node.id.clone(),
                    worker: node.worker.clone(),
                    tool: (*tool).to_string(),
                });
            }

            for dependency in &node.depends_on {
                if dependency == &node.id {
                    return Err(ConfigError::SelfDependency {
                        task: node.id.clone(),
                    });
                }
                let upstream =
                    index
                        .get(dependency)
                        .ok_or_else(|| ConfigError::UnknownDependency {
                            task: node.id.clone(),
                            dependency: dependency.clone(),
                        })?;
                if !dependents[*upstream].contains(&position) {
                    dependents[*upstream].push(position);
                }
            }
        }

        let final_task = dependents
            .iter()
            .rposition(Vec::is_empty)
            .unwrap_or(nodes.len() - 1);

        let graph = Self {
            nodes,
            index,
            dependents,
            final_task,
        };
        if let Some(path) = graph.find_cycle() {
            return Err(ConfigError::Cycle { path });
        }
        Ok(graph)
    }

    /// Designate the task whose result is the run result.
    pub fn with_final_task(mut self, task: &TaskId) -> Result<Self, ConfigError> {
        self.final_task = *self
            .index
            .get(task)
            .ok_or_else(|| ConfigError::UnknownFinalTask { task: task.clone() })?;
        Ok(self)
    }

    /// Look up a node by id.
    pub fn get(&self, task: &TaskId) -> Option<&TaskNode> {
        self.index.get(task).map(|&i| &self.nodes[i])
    }

    /// Whether the graph has a task with this id.
    pub fn contains(&self, task: &TaskId) -> bool {
        self.index.contains_key(task)
    }

    /// All nodes in declaration order.
    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes whose dependencies have all completed and that have not started
    /// yet, in declaration order.
    ///
    /// `started` holds every node that is in flight or already terminal.
    pub fn ready_set(
        &self,
        completed: &HashSet<TaskId>,
        started: &HashSet<TaskId>,
    ) -> Vec<&TaskNode> {
        self.nodes
            .iter()
            .filter(|node| {
                !started.contains(&node.id)
                    && !completed.contains(&node.id)
                    && node.depends_on.iter().all(|dep| completed.contains(dep))
            })
            .collect()
    }

    /// Nodes nothing depends on, in declaration order.
    pub fn sinks(&self) -> Vec<&TaskNode> {
        self.nodes
            .iter()
            .zip(&self.dependents)
            .filter(|(_, dependents)| dependents.is_empty())
            .map(|(node, _)| node)
            .collect()
    }

    /// The task whose output is the run's output.
    pub fn final_task(&self) -> &TaskNode {
        &self.nodes[self.final_task]
    }

    /// Every node that depends on `task`, directly or transitively, in
    /// declaration order.
    pub fn dependents_closure(&self, task: &TaskId) -> Vec<&TaskNode> {
        let Some(&start) = self.index.get(task) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for &dependent in &self.dependents[current] {
                if !seen[dependent] {
                    seen[dependent] = true;
                    queue.push_back(dependent);
                }
            }
        }
        self.nodes
            .iter()
            .zip(seen)
            .filter_map(|(node, seen)| seen.then_some(node))
            .collect()
    }

    /// Dependencies before dependents; ties broken by declaration order.
    pub fn topological_order(&self) -> Vec<&TaskNode> {
        let mut pending = vec![0_usize; self.nodes.len()];
        for dependents in &self.dependents {
            for &dependent in dependents {
                pending[dependent] += 1;
            }
        }
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut emitted = vec![false; self.nodes.len()];
        while order.len() < self.nodes.len() {
            let Some(next) = (0..self.nodes.len()).find(|&i| !emitted[i] && pending[i] == 0) else {
                break;
            };
            emitted[next] = true;
            order.push(&self.nodes[next]);
            for &dependent in &self.dependents[next] {
                pending[dependent] = pending[dependent].saturating_sub(1);
            }
        }
        order
    }

    /// Depth-first search over `depends_on` edges; returns the first cycle
    /// found with its first task repeated at the end.
    fn find_cycle(&self) -> Option<Vec<TaskId>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack = Vec::new();
        for start in 0..self.nodes.len() {
            if let Some(cycle) = self.dfs_cycle(start, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        position: usize,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<TaskId>> {
        match marks[position] {
            Mark::InProgress => {
                let from = stack.iter().position(|&p| p == position).unwrap_or(0);
                let mut path: Vec<TaskId> = stack[from..]
                    .iter()
                    .map(|&p| self.nodes[p].id.clone())
                    .collect();
                path.push(self.nodes[position].id.clone());
                return Some(path);
            }
            Mark::Done => return None,
            Mark::Unvisited => {}
        }

        marks[position] = Mark::InProgress;
        stack.push(position);
        for dependency in &self.nodes[position].depends_on {
            let Some(&upstream) = self.index.get(dependency) else {
                continue;
            };
            if let Some(cycle) = self.dfs_cycle(upstream, marks, stack) {
                return Some(cycle);
            }
        }
        stack.pop();
        marks[position] = Mark::Done;
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}
