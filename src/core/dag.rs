//! Task dependency graph.
//!
//! Built once per run from a plan's task list and used read-only by the
//! coordinator to answer "what does this task wait on" and "who is affected
//! when this task fails". Construction rejects every structural defect the
//! coordinator must refuse before dispatch.

use crate::core::task::{Task, TaskId};
use crate::error::StructuralError;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};

/// The task dependency graph.
///
/// Nodes are task ids; an edge `a -> b` means `b` depends on `a`.
pub struct TaskGraph {
    graph: DiGraph<TaskId, ()>,
    index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    /// Build and validate the graph for `tasks`.
    ///
    /// # Errors
    /// - `DuplicateTask` if two tasks share an id
    /// - `UnknownDependency` if a dependency names no task in the list
    /// - `CycleDetected` if the dependencies are not acyclic (self-loops
    ///   included); the reported task is the lowest id on a cycle
    pub fn build(tasks: &[Task]) -> Result<Self, StructuralError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for task in tasks {
            if index.contains_key(&task.id) {
                return Err(StructuralError::DuplicateTask {
                    task_id: task.id.clone(),
                });
            }
            let node = graph.add_node(task.id.clone());
            index.insert(task.id.clone(), node);
        }

        for task in tasks {
            let to = index[&task.id];
            for dep in &task.dependencies {
                let from = index.get(dep).ok_or_else(|| StructuralError::UnknownDependency {
                    task_id: task.id.clone(),
                    dependency: dep.clone(),
                })?;
                graph.add_edge(*from, to, ());
            }
        }

        let dag = Self { graph, index };
        if let Some(task_id) = dag.find_cycle() {
            return Err(StructuralError::CycleDetected { task_id });
        }
        Ok(dag)
    }

    fn find_cycle(&self) -> Option<TaskId> {
        if toposort(&self.graph, None).is_ok() {
            return None;
        }
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1 || self.graph.contains_edge(component[0], component[0])
            })
            .filter_map(|component| {
                component
                    .into_iter()
                    .map(|node| self.graph[node].clone())
                    .min()
            })
            .min()
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    /// Tasks `id` waits on, in task-id order.
    pub fn dependencies(&self, id: &TaskId) -> Vec<&TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Tasks that wait on `id` directly, in task-id order.
    pub fn dependents(&self, id: &TaskId) -> Vec<&TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, direction: Direction) -> Vec<&TaskId> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut ids: Vec<&TaskId> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| &self.graph[n])
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Every task that transitively depends on `id` (excluding `id`).
    pub fn downstream(&self, id: &TaskId) -> BTreeSet<TaskId> {
        let mut out = BTreeSet::new();
        let Some(&start) = self.index.get(id) else {
            return out;
        };
        let mut bfs = Bfs::new(&self.graph, start);
        while let Some(node) = bfs.next(&self.graph) {
            if node != start {
                out.insert(self.graph[node].clone());
            }
        }
        out
    }

    /// Task ids in an order where every task follows its dependencies.
    pub fn topological_order(&self) -> Vec<&TaskId> {
        toposort(&self.graph, None)
            .map(|nodes| nodes.into_iter().map(|n| &self.graph[n]).collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
