use crate::types::{TaskStatus, WorkflowTask};
use serde::{Serialize, Serializer};
use std::collections::{HashMap, HashSet};

/// The tasks of one workflow with their dependency edges.
///
/// Insertion order is kept and doubles as the tie-breaker between ready tasks
/// of equal priority.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: HashMap<String, WorkflowTask>,
    order: Vec<String>,
}

impl TaskGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task to the graph.
    pub fn add(&mut self, task: WorkflowTask) {
        let id = task.id.clone();
        if self.tasks.insert(id.clone(), task).is_none() {
            self.order.push(id);
        }
    }

    /// Task by id.
    pub fn get(&self, id: &str) -> Option<&WorkflowTask> {
        self.tasks.get(id)
    }

    /// Mutable task by id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut WorkflowTask> {
        self.tasks.get_mut(id)
    }

    /// Tasks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &WorkflowTask> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    /// Tasks in no particular order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WorkflowTask> {
        self.tasks.values_mut()
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of tasks in `status`.
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Pending with every dependency completed.
    pub fn is_ready(&self, task: &WorkflowTask) -> bool {
        task.status == TaskStatus::Pending
            && task.dependencies.iter().all(|dep| {
                self.tasks
                    .get(dep)
                    .is_some_and(|d| d.status == TaskStatus::Completed)
            })
    }

    /// Ids of ready tasks, highest priority first, then insertion order.
    pub fn ready_ids(&self) -> Vec<String> {
        let mut ready: Vec<(usize, &WorkflowTask)> = self
            .order
            .iter()
            .enumerate()
            .filter_map(|(pos, id)| self.tasks.get(id).map(|t| (pos, t)))
            .filter(|(_, t)| self.is_ready(t))
            .collect();
        ready.sort_by(|(pa, a), (pb, b)| b.priority.cmp(&a.priority).then(pa.cmp(pb)));
        ready.into_iter().map(|(_, t)| t.id.clone()).collect()
    }

    /// Ready tasks, cloned, in scheduling order.
    pub fn ready_tasks(&self) -> Vec<WorkflowTask> {
        self.ready_ids()
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect()
    }

    /// Ids of running tasks assigned to `agent_id`.
    pub fn running_on(&self, agent_id: &str) -> Vec<String> {
        self.iter()
            .filter(|t| {
                t.status == TaskStatus::Running && t.assigned_agent.as_deref() == Some(agent_id)
            })
            .map(|t| t.id.clone())
            .collect()
    }

    /// Every task that depends on `id`, directly or transitively.
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        let mut found: HashSet<String> = HashSet::new();
        let mut frontier = vec![id.to_string()];
        while let Some(current) = frontier.pop() {
            for task in self.tasks.values() {
                if task.dependencies.contains(&current) && found.insert(task.id.clone()) {
                    frontier.push(task.id.clone());
                }
            }
        }
        self.order
            .iter()
            .filter(|id| found.contains(*id))
            .cloned()
            .collect()
    }

    /// Check for cycles in the dependency graph.
    /// Returns true if a cycle is detected.
    pub fn has_cycle(&self) -> bool {
        let mut visited = HashMap::new();
        for id in &self.order {
            if self.dfs_cycle(id, &mut visited) {
                return true;
            }
        }
        false
    }

    fn dfs_cycle<'a>(&'a self, id: &'a str, visited: &mut HashMap<&'a str, u8>) -> bool {
        match visited.get(id) {
            Some(1) => return true,
            Some(2) => return false,
            _ => {}
        }
        visited.insert(id, 1);
        if let Some(task) = self.tasks.get(id) {
            for dep in &task.dependencies {
                if self.dfs_cycle(dep, visited) {
                    return true;
                }
            }
        }
        visited.insert(id, 2);
        false
    }
}

impl Serialize for TaskGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}
