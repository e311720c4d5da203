use crate::graph::TaskGraph;
use chrono::{DateTime, Utc};
use fleet_a2a::{AgentCard, DelegationPriority};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Load added to an agent per assigned task, and removed on release.
pub const LOAD_STEP: i32 = 20;

/// Agents at or above this load are not picked by load-aware strategies.
pub const LOAD_CEILING: u32 = 80;

/// Task type that matches every agent for non-capability strategies.
pub const ANY_TASK_TYPE: &str = "any";

// --- Agents ---

/// Scheduling status of an agent in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Available for new work.
    Idle,
    /// Running a task.
    Busy,
    /// Unreachable; skipped by every strategy.
    Offline,
    /// Failed recently; skipped until seen again.
    Error,
}

/// The orchestrator's view of an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Agent id, matching its A2A card.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Capability names the agent can run.
    pub capabilities: Vec<String>,
    /// Scheduling status.
    pub status: AgentStatus,
    /// 0 to 100.
    pub load: u32,
    /// Last time the agent was heard from.
    pub last_seen: DateTime<Utc>,
    /// Free-form attributes copied from the card.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Agent {
    /// Idle agent with zero load.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            status: AgentStatus::Idle,
            load: 0,
            last_seen: Utc::now(),
            metadata: Map::new(),
        }
    }

    /// Pool entry for a discovered A2A card.
    pub fn from_card(card: &AgentCard) -> Self {
        let mut agent = Self::new(&card.id, &card.name, card.capability_names());
        agent.metadata.clone_from(&card.metadata);
        agent
    }

    /// Whether `capability` is advertised.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Capability match used by round-robin and load-balanced selection.
    pub fn can_run(&self, task_type: &str) -> bool {
        task_type == ANY_TASK_TYPE || self.has_capability(task_type)
    }

    /// Shift load by `delta`, clamped to `[0, 100]`.
    pub fn adjust_load(&mut self, delta: i32) {
        self.load = (self.load as i32 + delta).clamp(0, 100) as u32;
    }

    /// Whether the agent can take a task now.
    pub fn is_idle(&self) -> bool {
        self.status == AgentStatus::Idle
    }
}

// --- Tasks ---

/// Lifecycle of a [`WorkflowTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for dependencies or an agent.
    Pending,
    /// Dispatched to an agent.
    Running,
    /// Finished with output.
    Completed,
    /// Retry budget exhausted or a dependency failed.
    Failed,
    /// Stopped with its workflow.
    Cancelled,
}

impl TaskStatus {
    /// Completed, failed or cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Scheduling priority. Ordered `Low < Normal < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Scheduled last.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Scheduled before normal tasks.
    High,
    /// Scheduled first.
    Critical,
}

impl From<TaskPriority> for DelegationPriority {
    fn from(priority: TaskPriority) -> Self {
        match priority {
            TaskPriority::Low => DelegationPriority::Low,
            TaskPriority::Normal => DelegationPriority::Normal,
            TaskPriority::High => DelegationPriority::High,
            TaskPriority::Critical => DelegationPriority::Urgent,
        }
    }
}

/// A unit of work inside a [`Workflow`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTask {
    /// Task id, unique across workflows.
    pub id: String,
    /// Caller-chosen key that other tasks reference in `depends_on`.
    pub key: String,
    /// Capability name an agent needs to run this task.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Free-form description.
    pub description: String,
    /// Payload handed to the agent.
    pub input: Value,
    /// Result reported by the agent.
    pub output: Option<Value>,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Agent running, or last running, the task.
    pub assigned_agent: Option<String>,
    /// Ids of tasks that must complete first.
    pub dependencies: Vec<String>,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Running time allowed per attempt.
    pub timeout_ms: u64,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Extra capabilities the capability-based strategy requires.
    pub required_capabilities: Vec<String>,
    /// Free-form attributes.
    pub metadata: Map<String, Value>,
    /// Start of the current or last attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
    /// Error of the most recent failed attempt.
    pub last_error: Option<String>,
    /// Correlates the in-flight delegation with this task.
    pub delegation_id: Option<String>,
}

impl WorkflowTask {
    /// Whether the task's timeout has elapsed at `now`.
    pub fn timed_out(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.started_at) {
            (TaskStatus::Running, Some(started)) => {
                now - started > chrono::Duration::milliseconds(self.timeout_ms as i64)
            }
            _ => false,
        }
    }

    /// Wall time from start to end, once both are known.
    pub fn duration_ms(&self) -> Option<u64> {
        let (start, end) = (self.started_at?, self.ended_at?);
        u64::try_from((end - start).num_milliseconds()).ok()
    }
}

/// Caller description of a task, before ids are assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique within the workflow. Defaults to the task's position.
    #[serde(default)]
    pub key: String,
    /// Capability name an agent needs to run this task.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Payload handed to the agent.
    #[serde(default)]
    pub input: Value,
    /// Keys of tasks this one waits for.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Scheduling priority (default: normal).
    #[serde(default)]
    pub priority: TaskPriority,
    /// Retries after the first attempt (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Running time allowed per attempt (default: 30000).
    #[serde(default = "default_task_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra capabilities the capability-based strategy requires.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Free-form attributes copied to the task.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_task_timeout_ms() -> u64 {
    30_000
}

impl TaskSpec {
    /// Task of `task_type` under `key` with default limits.
    pub fn new(key: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            task_type: task_type.into(),
            description: String::new(),
            input: Value::Null,
            depends_on: Vec::new(),
            priority: TaskPriority::Normal,
            max_retries: default_max_retries(),
            timeout_ms: default_task_timeout_ms(),
            required_capabilities: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// Wait for the tasks with these keys.
    pub fn depends_on(mut self, keys: &[&str]) -> Self {
        self.depends_on = keys.iter().map(|k| (*k).to_string()).collect();
        self
    }

    /// Set the payload.
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Require extra capabilities from the assigned agent.
    pub fn with_required_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.required_capabilities = capabilities.iter().map(|c| (*c).to_string()).collect();
        self
    }
}

// --- Workflows ---

/// Lifecycle of a [`Workflow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Created, not started.
    Pending,
    /// Scheduling tasks.
    Running,
    /// Every task completed.
    Completed,
    /// Every task settled and at least one failed.
    Failed,
    /// Stopped by the caller.
    Cancelled,
}

impl WorkflowStatus {
    /// Completed, failed or cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

/// A named DAG of tasks run under one strategy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Workflow id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Tasks and their dependency edges.
    pub tasks: TaskGraph,
    /// Current lifecycle state.
    pub status: WorkflowStatus,
    /// 0 to 100.
    pub progress: u8,
    /// Strategy chosen when the workflow was started.
    pub strategy: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When the workflow was started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the workflow reached a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
    /// Free-form attributes.
    pub metadata: Map<String, Value>,
}

impl Workflow {
    /// Recompute progress and finalize once every task is settled. Returns
    /// `true` when this call moved the workflow to a terminal status.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != WorkflowStatus::Running {
            return false;
        }
        let total = self.tasks.len();
        let completed = self.tasks.count(TaskStatus::Completed);
        let failed = self.tasks.count(TaskStatus::Failed);

        if completed + failed == total {
            self.status = if failed > 0 {
                WorkflowStatus::Failed
            } else {
                WorkflowStatus::Completed
            };
            self.progress = 100;
            self.ended_at = Some(now);
            return true;
        }

        // 100 is reserved for finalized workflows.
        let ratio = completed as f64 / total as f64;
        self.progress = ((ratio * 100.0).round() as u8).min(99);
        false
    }

    /// Whether the workflow is finished.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Aggregate counters across the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorMetrics {
    /// Workflows created.
    pub workflows_total: u64,
    /// Workflows that completed.
    pub workflows_completed: u64,
    /// Workflows that failed.
    pub workflows_failed: u64,
    /// Workflows cancelled by the caller.
    pub workflows_cancelled: u64,
    /// Tasks created.
    pub tasks_total: u64,
    /// Tasks that completed.
    pub tasks_completed: u64,
    /// Tasks failed permanently.
    pub tasks_failed: u64,
    /// Agents that are not offline.
    pub agents_active: u64,
    /// Mean duration of completed tasks.
    pub average_task_duration_ms: f64,
    /// Consensus requests opened.
    pub consensus_requests: u64,
    /// Consensus requests reached.
    pub consensus_successful: u64,
}
