use crate::config::OrchestratorConfig;
use crate::dispatch::TaskDispatcher;
use crate::events::OrchestratorEvent;
use crate::graph::TaskGraph;
use crate::pool::{AgentPool, LoadImbalance};
use crate::strategy::{FailureAction, OrchestrationStrategy, StrategyInfo, StrategyRegistry};
use crate::types::{
    Agent, AgentStatus, OrchestratorMetrics, TaskSpec, TaskStatus, Workflow, WorkflowStatus,
    WorkflowTask,
};
use chrono::{DateTime, Utc};
use fleet_core::{EventBus, FleetError, FleetResult};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs workflows: assigns ready tasks to agents, tracks outcomes and applies
/// the workflow strategy's failure policy.
///
/// Workflows, tasks and the agent pool live behind a single lock. Dispatch to
/// agents always happens after the lock is released.
#[derive(Clone)]
pub struct WorkflowEngine {
    state: Arc<Mutex<EngineState>>,
    dispatcher: Arc<dyn TaskDispatcher>,
    events: EventBus<OrchestratorEvent>,
    config: Arc<OrchestratorConfig>,
}

/// What maintenance found during one health check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthReport {
    /// Agents dropped for silence.
    pub stale_agents: Vec<String>,
    /// Running tasks failed for exceeding their timeout.
    pub timed_out_tasks: Vec<String>,
}

#[derive(Debug, Default)]
struct Counters {
    workflows_total: u64,
    workflows_completed: u64,
    workflows_failed: u64,
    workflows_cancelled: u64,
    tasks_total: u64,
    tasks_completed: u64,
    tasks_failed: u64,
    duration_total_ms: u64,
    duration_samples: u64,
}

struct EngineState {
    pool: AgentPool,
    workflows: HashMap<String, Workflow>,
    /// delegation id -> (workflow id, task id) for every running task.
    delegations: HashMap<String, (String, String)>,
    strategies: StrategyRegistry,
    counters: Counters,
}

struct Assignment {
    workflow_id: String,
    agent_id: String,
    delegation_id: String,
    task: WorkflowTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowUp {
    ScheduleNow,
    ScheduleAfterBackoff,
}

impl EngineState {
    fn running_workflow_ids(&self) -> Vec<String> {
        let mut running: Vec<&Workflow> = self
            .workflows
            .values()
            .filter(|w| w.status == WorkflowStatus::Running)
            .collect();
        running.sort_by_key(|w| w.started_at);
        running.into_iter().map(|w| w.id.clone()).collect()
    }

    fn plan(&mut self, now: DateTime<Utc>, events: &EventBus<OrchestratorEvent>) -> Vec<Assignment> {
        let mut assignments = Vec::new();
        for workflow_id in self.running_workflow_ids() {
            assignments.extend(self.plan_workflow(&workflow_id, now, events));
        }
        assignments
    }

    fn plan_workflow(
        &mut self,
        workflow_id: &str,
        now: DateTime<Utc>,
        events: &EventBus<OrchestratorEvent>,
    ) -> Vec<Assignment> {
        let Some(workflow) = self.workflows.get_mut(workflow_id) else {
            return Vec::new();
        };
        let Some(strategy) = workflow
            .strategy
            .as_deref()
            .and_then(|name| self.strategies.get(name))
        else {
            warn!(workflow_id, strategy = ?workflow.strategy, "Workflow strategy is not registered");
            return Vec::new();
        };

        let mut assignments = Vec::new();
        for task_id in workflow.tasks.ready_ids() {
            let idle = self.pool.idle();
            if idle.is_empty() {
                break;
            }
            let Some(task) = workflow.tasks.get_mut(&task_id) else {
                continue;
            };
            let Some(agent_id) = strategy.select_agent(&idle, task) else {
                debug!(workflow_id, task_id = %task_id, task_type = %task.task_type, "No agent available");
                continue;
            };

            let delegation_id = format!("dlg_{}", Uuid::new_v4().simple());
            task.status = TaskStatus::Running;
            task.assigned_agent = Some(agent_id.clone());
            task.started_at = Some(now);
            task.ended_at = None;
            task.delegation_id = Some(delegation_id.clone());
            self.pool.assign(&agent_id);
            self.delegations.insert(
                delegation_id.clone(),
                (workflow_id.to_string(), task_id.clone()),
            );

            info!(
                workflow_id,
                task_id = %task_id,
                agent_id = %agent_id,
                strategy = strategy.name(),
                "Task assigned"
            );
            events.emit(OrchestratorEvent::TaskAssigned {
                workflow_id: workflow_id.to_string(),
                task_id: task_id.clone(),
                agent_id: agent_id.clone(),
            });
            assignments.push(Assignment {
                workflow_id: workflow_id.to_string(),
                agent_id,
                delegation_id,
                task: task.clone(),
            });
        }
        assignments
    }

    fn complete(
        &mut self,
        delegation_id: &str,
        output: Value,
        now: DateTime<Utc>,
        events: &EventBus<OrchestratorEvent>,
    ) -> bool {
        let Some((workflow_id, task_id)) = self.delegations.remove(delegation_id) else {
            debug!(delegation_id, "Completion for unknown delegation ignored");
            return false;
        };
        let Some(workflow) = self.workflows.get_mut(&workflow_id) else {
            return false;
        };
        let Some(task) = workflow.tasks.get_mut(&task_id) else {
            return false;
        };
        if task.status != TaskStatus::Running {
            return false;
        }

        task.status = TaskStatus::Completed;
        task.output = Some(output);
        task.ended_at = Some(now);
        task.delegation_id = None;
        if let Some(ms) = task.duration_ms() {
            self.counters.duration_total_ms += ms;
            self.counters.duration_samples += 1;
        }
        self.counters.tasks_completed += 1;

        let agent_id = task.assigned_agent.clone().unwrap_or_default();
        self.pool.release(&agent_id);
        info!(workflow_id = %workflow_id, task_id = %task_id, agent_id = %agent_id, "Task completed");
        events.emit(OrchestratorEvent::TaskCompleted {
            workflow_id: workflow_id.clone(),
            task_id,
            agent_id,
        });
        settle(&mut self.counters, workflow, now, events);
        true
    }

    fn fail(
        &mut self,
        delegation_id: &str,
        error: &str,
        now: DateTime<Utc>,
        events: &EventBus<OrchestratorEvent>,
    ) -> Option<FollowUp> {
        let Some((workflow_id, task_id)) = self.delegations.remove(delegation_id) else {
            debug!(delegation_id, "Failure for unknown delegation ignored");
            return None;
        };
        let workflow = self.workflows.get_mut(&workflow_id)?;
        let strategy = workflow
            .strategy
            .as_deref()
            .and_then(|name| self.strategies.get(name));
        let task = workflow.tasks.get_mut(&task_id)?;
        if task.status != TaskStatus::Running {
            return None;
        }

        task.retry_count += 1;
        task.last_error = Some(error.to_string());
        task.delegation_id = None;
        let agent_id = task.assigned_agent.take();

        let agent = agent_id.as_deref().and_then(|id| self.pool.get_mut(id));
        let mut action = match (strategy, agent) {
            (Some(strategy), Some(agent)) => strategy.handle_failure(task, agent, error),
            _ => FailureAction::Reassign,
        };
        if let Some(id) = &agent_id {
            self.pool.release(id);
        }
        if action != FailureAction::Fail && task.retry_count > task.max_retries {
            action = FailureAction::Fail;
        }

        match action {
            FailureAction::Retry | FailureAction::Reassign => {
                task.status = TaskStatus::Pending;
                task.started_at = None;
                warn!(
                    workflow_id = %workflow_id,
                    task_id = %task_id,
                    agent_id = ?agent_id,
                    attempt = task.retry_count,
                    action = ?action,
                    error,
                    "Task attempt failed"
                );
                events.emit(OrchestratorEvent::TaskRetrying {
                    workflow_id,
                    task_id,
                    attempt: task.retry_count,
                    action,
                });
                Some(if action == FailureAction::Retry {
                    FollowUp::ScheduleAfterBackoff
                } else {
                    FollowUp::ScheduleNow
                })
            }
            FailureAction::Fail => {
                fail_permanently(&mut self.counters, workflow, &task_id, error, now, events);
                Some(FollowUp::ScheduleNow)
            }
        }
    }

    /// Remove an agent and put its running tasks back to pending.
    fn unregister(&mut self, agent_id: &str, events: &EventBus<OrchestratorEvent>) -> bool {
        if self.pool.remove(agent_id).is_none() {
            return false;
        }
        for workflow in self
            .workflows
            .values_mut()
            .filter(|w| w.status == WorkflowStatus::Running)
        {
            for task_id in workflow.tasks.running_on(agent_id) {
                let Some(task) = workflow.tasks.get_mut(&task_id) else {
                    continue;
                };
                if let Some(delegation) = task.delegation_id.take() {
                    self.delegations.remove(&delegation);
                }
                task.status = TaskStatus::Pending;
                task.assigned_agent = None;
                task.started_at = None;
                info!(workflow_id = %workflow.id, task_id = %task_id, agent_id, "Task returned to pending");
            }
        }
        info!(agent_id, "Agent unregistered");
        events.emit(OrchestratorEvent::AgentUnregistered {
            agent_id: agent_id.to_string(),
        });
        true
    }
}

/// Recompute progress and record the outcome if the workflow just finished.
fn settle(
    counters: &mut Counters,
    workflow: &mut Workflow,
    now: DateTime<Utc>,
    events: &EventBus<OrchestratorEvent>,
) {
    if !workflow.refresh(now) {
        return;
    }
    match workflow.status {
        WorkflowStatus::Completed => counters.workflows_completed += 1,
        WorkflowStatus::Failed => counters.workflows_failed += 1,
        _ => {}
    }
    info!(
        workflow_id = %workflow.id,
        name = %workflow.name,
        status = ?workflow.status,
        "Workflow finished"
    );
    events.emit(OrchestratorEvent::WorkflowFinished {
        workflow_id: workflow.id.clone(),
        status: workflow.status,
    });
}

/// Fail `task_id` for good, along with every pending task that depends on it.
fn fail_permanently(
    counters: &mut Counters,
    workflow: &mut Workflow,
    task_id: &str,
    error: &str,
    now: DateTime<Utc>,
    events: &EventBus<OrchestratorEvent>,
) {
    let mut failed = vec![(task_id.to_string(), error.to_string())];
    for dependent in workflow.tasks.dependents_of(task_id) {
        failed.push((dependent, "dependency failed".to_string()));
    }

    for (id, reason) in failed {
        let Some(task) = workflow.tasks.get_mut(&id) else {
            continue;
        };
        if task.status.is_terminal() {
            continue;
        }
        task.status = TaskStatus::Failed;
        task.ended_at = Some(now);
        task.last_error = Some(reason.clone());
        counters.tasks_failed += 1;
        warn!(workflow_id = %workflow.id, task_id = %id, error = %reason, "Task failed");
        events.emit(OrchestratorEvent::TaskFailed {
            workflow_id: workflow.id.clone(),
            task_id: id,
            error: reason,
        });
    }
    settle(counters, workflow, now, events);
}

impl WorkflowEngine {
    /// Engine with the built-in strategies and an empty pool.
    pub fn new(
        dispatcher: Arc<dyn TaskDispatcher>,
        events: EventBus<OrchestratorEvent>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState {
                pool: AgentPool::new(),
                workflows: HashMap::new(),
                delegations: HashMap::new(),
                strategies: StrategyRegistry::with_defaults(),
                counters: Counters::default(),
            })),
            dispatcher,
            events,
            config: Arc::new(config),
        }
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // --- Workflows ---

    /// Build a pending workflow from task specs. Dependency keys are resolved
    /// to task ids; unknown keys and cycles are rejected.
    pub async fn create_workflow(
        &self,
        name: &str,
        description: &str,
        specs: Vec<TaskSpec>,
    ) -> FleetResult<Workflow> {
        let workflow_id = format!("wf_{}", Uuid::new_v4().simple());

        let keyed: Vec<(String, TaskSpec)> = specs
            .into_iter()
            .enumerate()
            .map(|(i, spec)| {
                let key = if spec.key.is_empty() {
                    i.to_string()
                } else {
                    spec.key.clone()
                };
                (key, spec)
            })
            .collect();

        let mut ids: HashMap<String, String> = HashMap::new();
        for (key, _) in &keyed {
            let id = format!("task_{}", Uuid::new_v4().simple());
            if ids.insert(key.clone(), id).is_some() {
                return Err(FleetError::Config(format!(
                    "Duplicate task key '{key}' in workflow '{name}'"
                )));
            }
        }

        let mut graph = TaskGraph::new();
        for (key, spec) in keyed {
            let mut dependencies = Vec::with_capacity(spec.depends_on.len());
            let mut seen = HashSet::new();
            for dep in &spec.depends_on {
                let id = ids.get(dep).ok_or_else(|| {
                    FleetError::Config(format!("Task '{key}' depends on unknown task '{dep}'"))
                })?;
                if seen.insert(id.clone()) {
                    dependencies.push(id.clone());
                }
            }
            graph.add(WorkflowTask {
                id: ids[&key].clone(),
                key,
                task_type: spec.task_type,
                description: spec.description,
                input: spec.input,
                output: None,
                status: TaskStatus::Pending,
                assigned_agent: None,
                dependencies,
                retry_count: 0,
                max_retries: spec.max_retries,
                timeout_ms: spec.timeout_ms,
                priority: spec.priority,
                required_capabilities: spec.required_capabilities,
                metadata: spec.metadata,
                started_at: None,
                ended_at: None,
                last_error: None,
                delegation_id: None,
            });
        }
        if graph.has_cycle() {
            return Err(FleetError::Config(format!(
                "Dependency cycle detected in workflow '{name}'"
            )));
        }

        let workflow = Workflow {
            id: workflow_id.clone(),
            name: name.to_string(),
            description: description.to_string(),
            tasks: graph,
            status: WorkflowStatus::Pending,
            progress: 0,
            strategy: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            metadata: Map::new(),
        };

        {
            let mut state = self.state.lock().await;
            state.counters.workflows_total += 1;
            state.counters.tasks_total += workflow.tasks.len() as u64;
            state.workflows.insert(workflow_id.clone(), workflow.clone());
        }
        info!(workflow_id = %workflow_id, name, tasks = workflow.tasks.len(), "Workflow created");
        self.events
            .emit(OrchestratorEvent::WorkflowCreated { workflow_id });
        Ok(workflow)
    }

    /// Start a pending workflow under `strategy`, or the configured default.
    pub async fn start_workflow(&self, workflow_id: &str, strategy: Option<&str>) -> FleetResult<()> {
        let strategy = strategy
            .unwrap_or(&self.config.default_strategy)
            .to_string();
        {
            let mut state = self.state.lock().await;
            if !state.strategies.contains(&strategy) {
                return Err(FleetError::NotFound(format!("Strategy {strategy}")));
            }
            let EngineState {
                workflows,
                counters,
                ..
            } = &mut *state;
            let workflow = workflows
                .get_mut(workflow_id)
                .ok_or_else(|| FleetError::NotFound(format!("Workflow {workflow_id}")))?;
            if workflow.status != WorkflowStatus::Pending {
                return Err(FleetError::Config(format!(
                    "Workflow {workflow_id} is {:?}; only pending workflows can start",
                    workflow.status
                )));
            }

            let now = Utc::now();
            workflow.status = WorkflowStatus::Running;
            workflow.started_at = Some(now);
            workflow.strategy = Some(strategy.clone());
            info!(workflow_id, strategy = %strategy, "Workflow started");
            self.events.emit(OrchestratorEvent::WorkflowStarted {
                workflow_id: workflow_id.to_string(),
                strategy,
            });
            settle(counters, workflow, now, &self.events);
        }
        self.schedule().await;
        Ok(())
    }

    /// Stop a pending or running workflow. Remote work already handed out is
    /// not interrupted; its late results are ignored.
    pub async fn cancel_workflow(&self, workflow_id: &str) -> FleetResult<()> {
        {
            let mut state = self.state.lock().await;
            let EngineState {
                pool,
                workflows,
                delegations,
                counters,
                ..
            } = &mut *state;
            let workflow = workflows
                .get_mut(workflow_id)
                .ok_or_else(|| FleetError::NotFound(format!("Workflow {workflow_id}")))?;
            if workflow.is_terminal() {
                return Err(FleetError::Config(format!(
                    "Workflow {workflow_id} already finished as {:?}",
                    workflow.status
                )));
            }

            let now = Utc::now();
            for task in workflow.tasks.iter_mut() {
                match task.status {
                    TaskStatus::Running => {
                        if let Some(agent_id) = &task.assigned_agent {
                            pool.release(agent_id);
                        }
                        if let Some(delegation) = task.delegation_id.take() {
                            delegations.remove(&delegation);
                        }
                    }
                    TaskStatus::Pending => {}
                    _ => continue,
                }
                task.status = TaskStatus::Cancelled;
                task.ended_at = Some(now);
            }
            workflow.status = WorkflowStatus::Cancelled;
            workflow.ended_at = Some(now);
            counters.workflows_cancelled += 1;
            info!(workflow_id, "Workflow cancelled");
            self.events.emit(OrchestratorEvent::WorkflowFinished {
                workflow_id: workflow_id.to_string(),
                status: WorkflowStatus::Cancelled,
            });
        }
        // released agents may serve other workflows
        self.schedule().await;
        Ok(())
    }

    /// Wait until the workflow reaches a terminal status.
    pub async fn wait_for_workflow(&self, workflow_id: &str, timeout: Duration) -> FleetResult<Workflow> {
        let mut rx = self.events.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let workflow = self
                .workflow(workflow_id)
                .await
                .ok_or_else(|| FleetError::NotFound(format!("Workflow {workflow_id}")))?;
            if workflow.is_terminal() {
                return Ok(workflow);
            }
            if tokio::time::timeout_at(deadline, rx.recv()).await.is_err() {
                return Err(FleetError::Timeout(format!(
                    "Workflow {workflow_id} still {:?} at {}% after {}ms",
                    workflow.status,
                    workflow.progress,
                    timeout.as_millis()
                )));
            }
        }
    }

    // --- Scheduling ---

    /// Assign every ready task that has an agent, then dispatch outside the lock.
    pub async fn schedule(&self) {
        loop {
            let assignments = {
                let mut state = self.state.lock().await;
                state.plan(Utc::now(), &self.events)
            };
            if assignments.is_empty() {
                return;
            }

            let mut replan = false;
            for assignment in assignments {
                let result = self
                    .dispatcher
                    .dispatch(
                        &assignment.agent_id,
                        &assignment.workflow_id,
                        &assignment.task,
                        &assignment.delegation_id,
                    )
                    .await;
                let Err(e) = result else {
                    continue;
                };
                warn!(
                    workflow_id = %assignment.workflow_id,
                    task_id = %assignment.task.id,
                    agent_id = %assignment.agent_id,
                    error = %e,
                    "Dispatch failed"
                );
                let follow_up = {
                    let mut state = self.state.lock().await;
                    state.fail(&assignment.delegation_id, &e.to_string(), Utc::now(), &self.events)
                };
                match follow_up {
                    Some(FollowUp::ScheduleNow) => replan = true,
                    Some(FollowUp::ScheduleAfterBackoff) => self.schedule_after_backoff(),
                    None => {}
                }
            }
            if !replan {
                return;
            }
        }
    }

    fn schedule_after_backoff(&self) {
        let engine = self.clone();
        let delay = self.config.retry_backoff();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.schedule().await;
        });
    }

    fn follow(&self, follow_ups: impl IntoIterator<Item = FollowUp>) -> bool {
        let mut now = false;
        for follow_up in follow_ups {
            match follow_up {
                FollowUp::ScheduleNow => now = true,
                FollowUp::ScheduleAfterBackoff => self.schedule_after_backoff(),
            }
        }
        now
    }

    /// Record a successful result for the delegation. Unknown or stale
    /// delegation ids are ignored and return `false`.
    pub async fn complete_task(&self, delegation_id: &str, output: Value) -> bool {
        let completed = {
            let mut state = self.state.lock().await;
            state.complete(delegation_id, output, Utc::now(), &self.events)
        };
        if completed {
            self.schedule().await;
        }
        completed
    }

    /// Record a failed attempt for the delegation and apply the failure policy.
    pub async fn fail_task(&self, delegation_id: &str, error: &str) -> bool {
        let follow_up = {
            let mut state = self.state.lock().await;
            state.fail(delegation_id, error, Utc::now(), &self.events)
        };
        let handled = follow_up.is_some();
        if self.follow(follow_up) {
            self.schedule().await;
        }
        handled
    }

    // --- Agents ---

    /// Add an agent to the pool, or refresh a known agent's description while
    /// keeping its load and status. Returns `true` for new agents.
    pub async fn register_agent(&self, agent: Agent) -> bool {
        let agent_id = agent.id.clone();
        let added = self.state.lock().await.pool.register(agent);
        if added {
            info!(agent_id = %agent_id, "Agent registered");
            self.events
                .emit(OrchestratorEvent::AgentRegistered { agent_id });
        }
        self.schedule().await;
        added
    }

    /// Remove an agent. Its running tasks go back to pending and are scheduled
    /// again.
    pub async fn unregister_agent(&self, agent_id: &str) -> FleetResult<()> {
        let removed = self.state.lock().await.unregister(agent_id, &self.events);
        if !removed {
            return Err(FleetError::NotFound(format!("Agent {agent_id}")));
        }
        self.schedule().await;
        Ok(())
    }

    /// Record a status report. An agent going idle triggers scheduling.
    pub async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        load: Option<u32>,
    ) -> FleetResult<()> {
        {
            let mut state = self.state.lock().await;
            let agent = state
                .pool
                .get_mut(agent_id)
                .ok_or_else(|| FleetError::NotFound(format!("Agent {agent_id}")))?;
            agent.status = status;
            agent.last_seen = Utc::now();
            if let Some(load) = load {
                agent.load = load.min(100);
            }
            debug!(agent_id, status = ?status, load = agent.load, "Agent status updated");
        }
        if status == AgentStatus::Idle {
            self.schedule().await;
        }
        Ok(())
    }

    /// Replace the capability list of a known agent.
    pub async fn update_agent_capabilities(
        &self,
        agent_id: &str,
        capabilities: Vec<String>,
    ) -> FleetResult<()> {
        {
            let mut state = self.state.lock().await;
            let agent = state
                .pool
                .get_mut(agent_id)
                .ok_or_else(|| FleetError::NotFound(format!("Agent {agent_id}")))?;
            agent.capabilities = capabilities;
            agent.last_seen = Utc::now();
        }
        self.schedule().await;
        Ok(())
    }

    /// Mark an agent as alive. Returns `false` for unknown agents.
    pub async fn touch_agent(&self, agent_id: &str) -> bool {
        let (known, revived) = {
            let mut state = self.state.lock().await;
            let known = state.pool.contains(agent_id);
            (known, state.pool.touch(agent_id, Utc::now()))
        };
        if revived {
            info!(agent_id, "Agent back online");
            self.schedule().await;
        }
        known
    }

    // --- Maintenance ---

    /// Drop stale agents and fail tasks that overran their timeout.
    pub async fn check_health(&self, now: DateTime<Utc>) -> HealthReport {
        let mut report = HealthReport::default();
        let follow_ups = {
            let mut state = self.state.lock().await;
            report.stale_agents = state.pool.stale(now, self.config.agent_stale_after());
            for agent_id in &report.stale_agents {
                warn!(agent_id = %agent_id, "Agent went stale");
                state.unregister(agent_id, &self.events);
            }

            let overdue: Vec<(String, String, u64)> = state
                .workflows
                .values()
                .filter(|w| w.status == WorkflowStatus::Running)
                .flat_map(|w| w.tasks.iter())
                .filter(|t| t.timed_out(now))
                .filter_map(|t| {
                    t.delegation_id
                        .clone()
                        .map(|d| (d, t.id.clone(), t.timeout_ms))
                })
                .collect();

            let mut follow_ups = Vec::new();
            for (delegation_id, task_id, timeout_ms) in overdue {
                let error =
                    FleetError::WorkflowTimeout(format!("Task {task_id} exceeded {timeout_ms}ms"));
                if let Some(follow_up) = state.fail(&delegation_id, &error.to_string(), now, &self.events) {
                    follow_ups.push(follow_up);
                }
                report.timed_out_tasks.push(task_id);
            }
            follow_ups
        };

        let schedule_now = self.follow(follow_ups);
        if schedule_now || !report.stale_agents.is_empty() {
            self.schedule().await;
        }
        report
    }

    /// Emit [`OrchestratorEvent::LoadImbalance`] when overloaded agents
    /// coexist with idle, underused ones.
    pub async fn detect_load_imbalance(&self) -> Option<LoadImbalance> {
        let imbalance = self.state.lock().await.pool.imbalance()?;
        warn!(
            overloaded = ?imbalance.overloaded,
            underloaded = ?imbalance.underloaded,
            "Load imbalance detected"
        );
        self.events.emit(OrchestratorEvent::LoadImbalance {
            overloaded: imbalance.overloaded.clone(),
            underloaded: imbalance.underloaded.clone(),
        });
        Some(imbalance)
    }

    /// Forget terminal workflows that ended before the retention window.
    pub async fn collect_garbage(&self, now: DateTime<Utc>) -> usize {
        let retention = self.config.workflow_retention();
        let mut state = self.state.lock().await;
        let before = state.workflows.len();
        state.workflows.retain(|_, w| match (w.is_terminal(), w.ended_at) {
            (true, Some(ended)) => now - ended < retention,
            _ => true,
        });
        let removed = before - state.workflows.len();
        if removed > 0 {
            debug!(removed, "Collected finished workflows");
        }
        removed
    }

    /// One maintenance pass: health, load imbalance, garbage collection.
    pub async fn maintenance_tick(&self, now: DateTime<Utc>) {
        self.check_health(now).await;
        self.detect_load_imbalance().await;
        self.collect_garbage(now).await;
    }

    // --- Strategies ---

    /// Register a strategy, replacing any with the same name.
    pub async fn add_strategy(&self, strategy: Arc<dyn OrchestrationStrategy>) {
        info!(strategy = strategy.name(), "Strategy registered");
        self.state.lock().await.strategies.register(strategy);
    }

    /// Registered strategies sorted by name.
    pub async fn strategies(&self) -> Vec<StrategyInfo> {
        self.state.lock().await.strategies.list()
    }

    /// How the workflow's strategy would spread its ready tasks over the idle
    /// agents right now. Nothing is assigned.
    pub async fn balance_preview(&self, workflow_id: &str) -> FleetResult<HashMap<String, Vec<String>>> {
        let state = self.state.lock().await;
        let workflow = state
            .workflows
            .get(workflow_id)
            .ok_or_else(|| FleetError::NotFound(format!("Workflow {workflow_id}")))?;
        let name = workflow
            .strategy
            .clone()
            .unwrap_or_else(|| self.config.default_strategy.clone());
        let strategy = state
            .strategies
            .get(&name)
            .ok_or_else(|| FleetError::NotFound(format!("Strategy {name}")))?;
        Ok(strategy.balance_load(&state.pool.list(), &workflow.tasks.ready_tasks()))
    }

    // --- Snapshots ---

    /// Registered agents sorted by id.
    pub async fn agents(&self) -> Vec<Agent> {
        self.state.lock().await.pool.list()
    }

    /// One registered agent.
    pub async fn agent(&self, agent_id: &str) -> Option<Agent> {
        self.state.lock().await.pool.get(agent_id).cloned()
    }

    /// All workflows, oldest first.
    pub async fn workflows(&self) -> Vec<Workflow> {
        let mut workflows: Vec<Workflow> =
            self.state.lock().await.workflows.values().cloned().collect();
        workflows.sort_by_key(|w| w.created_at);
        workflows
    }

    /// One workflow.
    pub async fn workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.state.lock().await.workflows.get(workflow_id).cloned()
    }

    /// Engine counters. Consensus fields are left at zero.
    pub async fn metrics(&self) -> OrchestratorMetrics {
        let state = self.state.lock().await;
        let c = &state.counters;
        OrchestratorMetrics {
            workflows_total: c.workflows_total,
            workflows_completed: c.workflows_completed,
            workflows_failed: c.workflows_failed,
            workflows_cancelled: c.workflows_cancelled,
            tasks_total: c.tasks_total,
            tasks_completed: c.tasks_completed,
            tasks_failed: c.tasks_failed,
            agents_active: state.pool.active_count() as u64,
            average_task_duration_ms: if c.duration_samples == 0 {
                0.0
            } else {
                c.duration_total_ms as f64 / c.duration_samples as f64
            },
            consensus_requests: 0,
            consensus_successful: 0,
        }
    }
}
