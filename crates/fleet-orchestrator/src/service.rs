use crate::config::OrchestratorConfig;
use crate::consensus::{
    ConsensusConfig, ConsensusCoordinator, ConsensusRequest, CONSENSUS_VOTE_ACTION,
};
use crate::dispatch::{A2aDispatcher, TaskDispatcher};
use crate::engine::WorkflowEngine;
use crate::events::OrchestratorEvent;
use crate::maintenance::spawn_orchestration_loop;
use crate::strategy::{OrchestrationStrategy, StrategyInfo};
use crate::types::{
    Agent, AgentStatus, OrchestratorMetrics, TaskSpec, Workflow, WorkflowStatus,
};
use fleet_a2a::{A2aClient, A2aEvent, CardStatus, DelegatedTask};
use fleet_core::{BusMessage, BusMessageKind, EventBus, FleetError, FleetResult, MessageBus};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bus command announcing an agent to the pool.
pub const AGENT_JOINED_ACTION: &str = "agent-joined";
/// Bus command removing an agent from the pool.
pub const AGENT_LEFT_ACTION: &str = "agent-left";
/// Bus command carrying `{status, load?}` for the sender.
pub const STATUS_UPDATE_ACTION: &str = "status-update";
/// Bus command carrying `{capabilities}` for the sender.
pub const CAPABILITY_UPDATE_ACTION: &str = "capability-update";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentJoined {
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentLeft {
    #[serde(default)]
    agent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusUpdate {
    status: AgentStatus,
    #[serde(default)]
    load: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CapabilityUpdate {
    capabilities: Vec<String>,
}

/// One orchestrator node: the A2A client, the workflow engine, the consensus
/// coordinator and the maintenance loop, wired over a single bus.
///
/// Construct it, call [`start`](Self::start) once, and [`shutdown`](Self::shutdown)
/// when done. Every accessor returns an owned snapshot.
pub struct Orchestrator {
    a2a: Arc<A2aClient>,
    bus: Arc<dyn MessageBus>,
    engine: WorkflowEngine,
    consensus: ConsensusCoordinator,
    events: EventBus<OrchestratorEvent>,
    config: OrchestratorConfig,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Orchestrator that dispatches tasks as A2A delegations through `a2a`.
    pub fn new(a2a: Arc<A2aClient>, bus: Arc<dyn MessageBus>, config: OrchestratorConfig) -> Self {
        let dispatcher = Arc::new(A2aDispatcher::new(Arc::clone(&a2a)));
        Self::with_dispatcher(a2a, bus, dispatcher, config)
    }

    /// Orchestrator that hands tasks to `dispatcher` instead of the A2A client.
    pub fn with_dispatcher(
        a2a: Arc<A2aClient>,
        bus: Arc<dyn MessageBus>,
        dispatcher: Arc<dyn TaskDispatcher>,
        config: OrchestratorConfig,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        let engine = WorkflowEngine::new(dispatcher, events.clone(), config.clone());
        let consensus =
            ConsensusCoordinator::new(a2a.agent_id(), Arc::clone(&bus), events.clone());
        Self {
            a2a,
            bus,
            engine,
            consensus,
            events,
            config,
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Id of the local agent.
    pub fn agent_id(&self) -> &str {
        self.a2a.agent_id()
    }

    /// The A2A client.
    pub fn a2a(&self) -> &Arc<A2aClient> {
        &self.a2a
    }

    /// The workflow engine.
    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// The consensus coordinator.
    pub fn consensus(&self) -> &ConsensusCoordinator {
        &self.consensus
    }

    /// Start the A2A client, the A2A and bus-command bridges and the
    /// maintenance loop.
    pub fn start(self: &Arc<Self>) {
        self.a2a.start();

        let a2a_bridge = {
            let orchestrator = Arc::clone(self);
            let mut rx = self.a2a.subscribe();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => orchestrator.on_a2a_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "A2A event bridge lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        let command_bridge = {
            let orchestrator = Arc::clone(self);
            let mut rx = self.bus.subscribe();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(envelope) => {
                            if let Err(e) = orchestrator.handle_command(&envelope).await {
                                warn!(
                                    source = %envelope.source,
                                    action = ?envelope.action,
                                    error = %e,
                                    "Bus command dropped"
                                );
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Command listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        let ticker = spawn_orchestration_loop(
            self.engine.clone(),
            self.consensus.clone(),
            self.config.tick_interval(),
        );

        self.handles
            .lock()
            .extend([a2a_bridge, command_bridge, ticker]);
        info!(agent_id = %self.agent_id(), "Orchestrator started");
    }

    /// Stop background work, release consensus waiters and stop the A2A client.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        self.consensus.shutdown().await;
        self.a2a.shutdown();
        info!(agent_id = %self.agent_id(), "Orchestrator stopped");
    }

    // --- Bridges ---

    async fn on_a2a_event(self: &Arc<Self>, event: A2aEvent) {
        match event {
            A2aEvent::AgentDiscovered(card) => {
                self.engine.register_agent(Agent::from_card(&card)).await;
            }
            A2aEvent::AgentSeen { agent_id, .. } => {
                self.engine.touch_agent(&agent_id).await;
            }
            A2aEvent::AgentStatusChanged { agent_id, status } => {
                let result = match status {
                    CardStatus::Offline => {
                        self.engine
                            .update_agent_status(&agent_id, AgentStatus::Offline, None)
                            .await
                    }
                    CardStatus::Error => {
                        self.engine
                            .update_agent_status(&agent_id, AgentStatus::Error, None)
                            .await
                    }
                    CardStatus::Online | CardStatus::Busy => {
                        self.engine.touch_agent(&agent_id).await;
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    debug!(agent_id = %agent_id, error = %e, "Status change for unknown agent");
                }
            }
            A2aEvent::AgentDeparted { agent_id } => {
                if let Err(e) = self.engine.unregister_agent(&agent_id).await {
                    debug!(agent_id = %agent_id, error = %e, "Departed agent was not in the pool");
                }
            }
            A2aEvent::TaskResponded(task) => match task.error {
                Some(error) => {
                    let error = FleetError::TaskExecution(error).to_string();
                    self.engine.fail_task(&task.id, &error).await;
                }
                None => {
                    self.engine
                        .complete_task(&task.id, task.results.unwrap_or(Value::Null))
                        .await;
                }
            },
            A2aEvent::TaskRequested(task) => {
                if self.config.relay_delegated_tasks {
                    self.relay(task);
                } else {
                    debug!(task_id = %task.id, source = %task.source, "Delegated task left to the host");
                }
            }
        }
    }

    /// Apply a host command addressed to this node. Non-command traffic is
    /// skipped.
    pub async fn handle_command(&self, envelope: &BusMessage) -> FleetResult<()> {
        if envelope.kind != BusMessageKind::Command
            || envelope.source == self.agent_id()
            || !envelope.is_for(self.agent_id())
        {
            return Ok(());
        }
        let Some(action) = envelope.action.as_deref() else {
            return Ok(());
        };
        let sender = envelope.source.as_str();

        match action {
            AGENT_JOINED_ACTION => {
                let joined: AgentJoined = serde_json::from_value(envelope.payload.clone())?;
                let id = joined.agent_id.unwrap_or_else(|| sender.to_string());
                let name = joined.name.unwrap_or_else(|| id.clone());
                self.engine
                    .register_agent(Agent::new(id, name, joined.capabilities))
                    .await;
            }
            AGENT_LEFT_ACTION => {
                let left: AgentLeft = if envelope.payload.is_null() {
                    AgentLeft::default()
                } else {
                    serde_json::from_value(envelope.payload.clone())?
                };
                let id = left.agent_id.unwrap_or_else(|| sender.to_string());
                self.engine.unregister_agent(&id).await?;
            }
            STATUS_UPDATE_ACTION => {
                let update: StatusUpdate = serde_json::from_value(envelope.payload.clone())?;
                self.engine
                    .update_agent_status(sender, update.status, update.load)
                    .await?;
            }
            CAPABILITY_UPDATE_ACTION => {
                let update: CapabilityUpdate = serde_json::from_value(envelope.payload.clone())?;
                self.engine
                    .update_agent_capabilities(sender, update.capabilities)
                    .await?;
            }
            CONSENSUS_VOTE_ACTION => {
                self.consensus.handle_vote_message(envelope).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Run a task another agent delegated to us as a single-task workflow on
    /// the fleet and answer with its outcome.
    fn relay(self: &Arc<Self>, task: DelegatedTask) {
        let orchestrator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let (results, error) = match orchestrator.run_delegated(&task).await {
                Ok(output) => (output, None),
                Err(e) => (Value::Null, Some(e.to_string())),
            };
            if let Err(e) = orchestrator.a2a.respond_to_task(&task.id, results, error).await {
                warn!(task_id = %task.id, error = %e, "Relay response not sent");
            }
        });
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    async fn run_delegated(&self, task: &DelegatedTask) -> FleetResult<Value> {
        let mut metadata = Map::new();
        metadata.insert("external".into(), Value::Bool(true));
        metadata.insert("sourceAgent".into(), Value::from(task.source.as_str()));
        let mut spec = TaskSpec::new("delegated", &task.capability)
            .with_input(task.payload.clone())
            .with_max_retries(3)
            .with_timeout_ms(task.timeout_ms);
        spec.metadata = metadata;

        let workflow = self
            .engine
            .create_workflow(
                &format!("Delegated: {}", task.capability),
                &format!("Task delegated by {}", task.source),
                vec![spec],
            )
            .await?;
        info!(task_id = %task.id, workflow_id = %workflow.id, "Relaying delegated task");
        self.engine.start_workflow(&workflow.id, None).await?;

        let finished = self
            .engine
            .wait_for_workflow(&workflow.id, Duration::from_millis(task.timeout_ms))
            .await?;
        let outcome = finished.tasks.iter().next();
        match finished.status {
            WorkflowStatus::Completed => {
                Ok(outcome.and_then(|t| t.output.clone()).unwrap_or(Value::Null))
            }
            status => Err(FleetError::TaskExecution(
                outcome
                    .and_then(|t| t.last_error.clone())
                    .unwrap_or_else(|| format!("workflow {status:?}")),
            )),
        }
    }

    // --- Workflows ---

    /// See [`WorkflowEngine::create_workflow`].
    pub async fn create_workflow(
        &self,
        name: &str,
        description: &str,
        tasks: Vec<TaskSpec>,
    ) -> FleetResult<Workflow> {
        self.engine.create_workflow(name, description, tasks).await
    }

    /// See [`WorkflowEngine::start_workflow`].
    pub async fn start_workflow(&self, workflow_id: &str, strategy: Option<&str>) -> FleetResult<()> {
        self.engine.start_workflow(workflow_id, strategy).await
    }

    /// See [`WorkflowEngine::cancel_workflow`].
    pub async fn cancel_workflow(&self, workflow_id: &str) -> FleetResult<()> {
        self.engine.cancel_workflow(workflow_id).await
    }

    /// See [`WorkflowEngine::wait_for_workflow`].
    pub async fn wait_for_workflow(&self, workflow_id: &str, timeout: Duration) -> FleetResult<Workflow> {
        self.engine.wait_for_workflow(workflow_id, timeout).await
    }

    /// All workflows, oldest first.
    pub async fn workflows(&self) -> Vec<Workflow> {
        self.engine.workflows().await
    }

    /// One workflow.
    pub async fn workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.engine.workflow(workflow_id).await
    }

    // --- Consensus ---

    /// See [`ConsensusCoordinator::request_consensus`].
    pub async fn request_consensus(
        &self,
        topic: &str,
        proposal: Value,
        participants: &[String],
        config: ConsensusConfig,
    ) -> FleetResult<ConsensusRequest> {
        self.consensus
            .request_consensus(topic, proposal, participants, config)
            .await
    }

    /// See [`ConsensusCoordinator::submit_vote`].
    pub async fn submit_vote(
        &self,
        request_id: &str,
        agent_id: &str,
        vote: bool,
        weight: Option<f64>,
        reason: Option<String>,
    ) -> FleetResult<bool> {
        self.consensus
            .submit_vote(request_id, agent_id, vote, weight, reason)
            .await
    }

    /// See [`ConsensusCoordinator::wait_for_resolution`].
    pub async fn wait_for_consensus(&self, request_id: &str) -> FleetResult<ConsensusRequest> {
        self.consensus.wait_for_resolution(request_id).await
    }

    // --- Agents ---

    /// Add an agent to the pool by hand. Returns `true` for new agents.
    pub async fn register_agent(&self, agent: Agent) -> bool {
        self.engine.register_agent(agent).await
    }

    /// See [`WorkflowEngine::unregister_agent`].
    pub async fn unregister_agent(&self, agent_id: &str) -> FleetResult<()> {
        self.engine.unregister_agent(agent_id).await
    }

    /// Pool snapshot sorted by id.
    pub async fn agents(&self) -> Vec<Agent> {
        self.engine.agents().await
    }

    // --- Strategies and metrics ---

    /// Registered strategies sorted by name.
    pub async fn strategies(&self) -> Vec<StrategyInfo> {
        self.engine.strategies().await
    }

    /// Register a custom strategy.
    pub async fn add_strategy(&self, strategy: Arc<dyn OrchestrationStrategy>) {
        self.engine.add_strategy(strategy).await;
    }

    /// Engine counters merged with consensus counters.
    pub async fn metrics(&self) -> OrchestratorMetrics {
        let mut metrics = self.engine.metrics().await;
        let (requested, successful) = self.consensus.counters().await;
        metrics.consensus_requests = requested;
        metrics.consensus_successful = successful;
        metrics
    }

    /// Receive every [`OrchestratorEvent`] emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}
