use crate::consensus::ConsensusStatus;
use crate::strategy::FailureAction;
use crate::types::WorkflowStatus;

/// Lifecycle notifications from the engine and the consensus coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    /// A workflow was validated and stored.
    WorkflowCreated {
        workflow_id: String,
    },
    /// A workflow began scheduling under `strategy`.
    WorkflowStarted {
        workflow_id: String,
        strategy: String,
    },
    /// The workflow reached completed, failed or cancelled.
    WorkflowFinished {
        workflow_id: String,
        status: WorkflowStatus,
    },
    /// A task was dispatched to an agent.
    TaskAssigned {
        workflow_id: String,
        task_id: String,
        agent_id: String,
    },
    /// An agent reported a task done.
    TaskCompleted {
        workflow_id: String,
        task_id: String,
        agent_id: String,
    },
    /// A failed attempt that will be tried again.
    TaskRetrying {
        workflow_id: String,
        task_id: String,
        attempt: u32,
        action: FailureAction,
    },
    /// Permanent task failure.
    TaskFailed {
        workflow_id: String,
        task_id: String,
        error: String,
    },
    /// A new agent joined the pool.
    AgentRegistered {
        agent_id: String,
    },
    /// An agent left the pool, explicitly or by going silent.
    AgentUnregistered {
        agent_id: String,
    },
    /// Overloaded agents sit next to idle, underused ones.
    LoadImbalance {
        overloaded: Vec<String>,
        underloaded: Vec<String>,
    },
    /// A vote was opened.
    ConsensusRequested {
        request_id: String,
        topic: String,
    },
    /// A vote reached a terminal status.
    ConsensusResolved {
        request_id: String,
        status: ConsensusStatus,
        result: Option<bool>,
    },
}
