//! Workflow orchestration for agent fleets.
//!
//! Workflows are DAGs of tasks. The engine hands ready tasks to agents picked
//! by a pluggable strategy, recovers from failures by retrying or reassigning,
//! and lets agents settle proposals by vote. Agents are reached through the
//! A2A protocol from [`fleet_a2a`].
//!
//! # Main types
//!
//! - [`Orchestrator`] — One node: A2A client, engine, consensus and maintenance wired over a bus.
//! - [`WorkflowEngine`] — Task graph scheduling, failure policy and the agent pool.
//! - [`OrchestrationStrategy`] — Agent selection and failure handling, by name.
//! - [`ConsensusCoordinator`] — Majority, unanimous, weighted and byzantine votes.
//! - [`TaskDispatcher`] — Seam between the engine and whatever runs tasks.

/// Timers and defaults.
pub mod config;
/// Vote-based group decisions.
pub mod consensus;
/// Handing assigned tasks to agents.
pub mod dispatch;
/// Workflow execution and the agent pool.
pub mod engine;
/// Notifications emitted by the orchestrator.
pub mod events;
/// Dependency graph of a workflow's tasks.
pub mod graph;
/// Periodic health checks and cleanup.
pub mod maintenance;
/// Agents known to the engine.
pub mod pool;
/// The orchestrator facade and its bus bridges.
pub mod service;
/// Built-in strategies and the strategy registry.
pub mod strategy;
/// Agents, tasks, workflows and metrics.
pub mod types;

pub use config::OrchestratorConfig;
pub use consensus::{
    ConsensusConfig, ConsensusCoordinator, ConsensusKind, ConsensusRequest, ConsensusStatus,
    Vote, VoteMessage, CONSENSUS_REQUEST_ACTION, CONSENSUS_VOTE_ACTION,
    MAX_VOTE_RETRIES,
};
pub use dispatch::{A2aDispatcher, TaskDispatcher};
pub use engine::{HealthReport, WorkflowEngine};
pub use events::OrchestratorEvent;
pub use graph::TaskGraph;
pub use maintenance::spawn_orchestration_loop;
pub use pool::{AgentPool, LoadImbalance};
pub use service::{
    Orchestrator, AGENT_JOINED_ACTION, AGENT_LEFT_ACTION, CAPABILITY_UPDATE_ACTION,
    STATUS_UPDATE_ACTION,
};
pub use strategy::{
    CapabilityBasedStrategy, FailureAction, LoadBalancedStrategy, OrchestrationStrategy,
    RoundRobinStrategy, StrategyInfo, StrategyRegistry,
};
pub use types::{
    Agent, AgentStatus, OrchestratorMetrics, TaskPriority, TaskSpec, TaskStatus, Workflow,
    WorkflowStatus, WorkflowTask,
};
