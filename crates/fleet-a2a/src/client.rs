//! The A2A protocol client owned by each agent.

use crate::config::A2aConfig;
use crate::directory::AgentDirectory;
use crate::protocol::{
    A2aMessage, A2aMessageType, AgentCard, Capability, CapabilityQueryPayload,
    CapabilityResponsePayload, CardStatus, DelegatedTask, DelegationKind, DelegationPriority,
    DiscoveryPayload, HeartbeatPayload, StatusUpdatePayload, TaskLifecycle, TaskRequestPayload,
    TaskResponsePayload, PROTOCOL_VERSION,
};
use chrono::{DateTime, Utc};
use fleet_core::{BusMessage, EventBus, FleetError, FleetResult, MessageBus};
use fleet_security::{signer_from_secret, MessageSigner};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Notifications emitted by an [`A2aClient`].
#[derive(Debug, Clone)]
pub enum A2aEvent {
    /// A discovery message announced a new agent or refreshed a known one.
    AgentDiscovered(AgentCard),
    /// A valid message arrived from a known agent.
    AgentSeen { agent_id: String, at: DateTime<Utc> },
    /// A known agent reported a new status.
    AgentStatusChanged { agent_id: String, status: CardStatus },
    /// An agent was dropped from the directory after going silent.
    AgentDeparted { agent_id: String },
    /// Another agent asked us to run a task we can serve.
    TaskRequested(DelegatedTask),
    /// An agent answered a task we delegated.
    TaskResponded(DelegatedTask),
}

/// Per-delegation knobs for [`A2aClient::delegate_task`].
#[derive(Debug, Clone, Default)]
pub struct DelegationOptions {
    /// Record id; a fresh one is generated when unset.
    pub id: Option<String>,
    /// Wire priority of the request.
    pub priority: DelegationPriority,
    /// Milliseconds to wait for the response; the configured default when unset.
    pub timeout_ms: Option<u64>,
    /// Context forwarded to the target.
    pub context: Map<String, Value>,
}

struct ClientState {
    local: AgentCard,
    directory: AgentDirectory,
    tasks: HashMap<String, DelegatedTask>,
    pending_queries: HashMap<String, oneshot::Sender<Vec<Capability>>>,
    task_waiters: HashMap<String, Vec<oneshot::Sender<DelegatedTask>>>,
}

/// Speaks the A2A protocol on behalf of one local agent.
///
/// Owns the local agent card, the directory of remote agents and every
/// delegation record this agent sent or received. All of it sits behind a
/// single lock; no other component mutates it.
pub struct A2aClient {
    agent_id: String,
    state: Mutex<ClientState>,
    bus: Arc<dyn MessageBus>,
    signer: Arc<dyn MessageSigner>,
    events: EventBus<A2aEvent>,
    config: A2aConfig,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl A2aClient {
    /// Build a client whose signer follows `config.signing_secret`.
    pub fn new(local: AgentCard, bus: Arc<dyn MessageBus>, config: A2aConfig) -> FleetResult<Self> {
        let signer = signer_from_secret(config.signing_secret.as_deref())?;
        Ok(Self::with_signer(local, bus, signer, config))
    }

    /// Build a client that signs and verifies with `signer`.
    pub fn with_signer(
        local: AgentCard,
        bus: Arc<dyn MessageBus>,
        signer: Arc<dyn MessageSigner>,
        config: A2aConfig,
    ) -> Self {
        info!(agent_id = %local.id, scheme = signer.scheme(), "A2A client created");
        Self {
            agent_id: local.id.clone(),
            state: Mutex::new(ClientState {
                local,
                directory: AgentDirectory::new(),
                tasks: HashMap::new(),
                pending_queries: HashMap::new(),
                task_waiters: HashMap::new(),
            }),
            bus,
            signer,
            events: EventBus::new(config.event_capacity),
            config,
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Id of the local agent.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Configuration the client was built with.
    pub fn config(&self) -> &A2aConfig {
        &self.config
    }

    /// Receive every [`A2aEvent`] emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<A2aEvent> {
        self.events.subscribe()
    }

    // --- Outbound ---

    /// Sign `message` and publish it on the bus.
    pub async fn send(&self, mut message: A2aMessage) -> FleetResult<()> {
        let bytes = message.signing_bytes()?;
        message.signature = Some(self.signer.sign(&bytes));
        debug!(
            id = %message.id,
            message_type = %message.message_type,
            target = ?message.target,
            "A2A send"
        );
        self.bus.send_message(message.to_bus_message()?).await
    }

    /// Announce the local card to everyone and return the agents known so far.
    ///
    /// Does not wait for replies; they populate the directory as they arrive.
    pub async fn discover_agents(&self) -> FleetResult<Vec<AgentCard>> {
        let (card, known) = {
            let mut state = self.state.lock().await;
            state.local.last_seen = Utc::now();
            (state.local.clone(), state.directory.list())
        };
        let payload = serde_json::to_value(DiscoveryPayload::announce(card))?;
        self.send(A2aMessage::new(A2aMessageType::Discovery, &self.agent_id, payload))
            .await?;
        Ok(known)
    }

    /// Ask `agent_id` for its capabilities, or for a single one by name.
    pub async fn query_capabilities(
        &self,
        agent_id: &str,
        capability: Option<&str>,
    ) -> FleetResult<Vec<Capability>> {
        let payload = serde_json::to_value(CapabilityQueryPayload {
            capability: capability.unwrap_or("*").to_string(),
        })?;
        let message = A2aMessage::new(A2aMessageType::CapabilityQuery, &self.agent_id, payload)
            .to(agent_id);
        let query_id = message.id.clone();

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            if !state.directory.contains(agent_id) {
                return Err(FleetError::NotFound(format!("Agent {agent_id}")));
            }
            state.pending_queries.insert(query_id.clone(), tx);
        }

        if let Err(e) = self.send(message).await {
            self.state.lock().await.pending_queries.remove(&query_id);
            return Err(e);
        }

        match tokio::time::timeout(self.config.capability_query_timeout(), rx).await {
            Ok(Ok(capabilities)) => Ok(capabilities),
            Ok(Err(_)) => Err(FleetError::Protocol(format!(
                "Capability query {query_id} was abandoned"
            ))),
            Err(_) => {
                self.state.lock().await.pending_queries.remove(&query_id);
                Err(FleetError::Timeout(format!(
                    "Capability query to {agent_id} after {}ms",
                    self.config.capability_query_timeout_ms
                )))
            }
        }
    }

    /// Hand a task to `target`. Returns the delegation record as soon as the
    /// request is sent; the answer arrives later as a task response.
    pub async fn delegate_task(
        &self,
        target: &str,
        capability: &str,
        payload: Value,
        options: DelegationOptions,
    ) -> FleetResult<DelegatedTask> {
        let id = options
            .id
            .unwrap_or_else(|| format!("task_{}", Uuid::new_v4().simple()));
        let record = DelegatedTask {
            id: id.clone(),
            kind: DelegationKind::Request,
            source: self.agent_id.clone(),
            target: Some(target.to_string()),
            capability: capability.to_string(),
            payload,
            context: options.context,
            priority: options.priority,
            timeout_ms: options.timeout_ms.unwrap_or(self.config.default_task_timeout_ms),
            lifecycle: TaskLifecycle {
                created: Some(Utc::now()),
                ..Default::default()
            },
            dependencies: Vec::new(),
            results: None,
            error: None,
        };

        self.state
            .lock()
            .await
            .tasks
            .insert(id.clone(), record.clone());

        let request = serde_json::to_value(TaskRequestPayload { task: record })?;
        let message =
            A2aMessage::new(A2aMessageType::TaskRequest, &self.agent_id, request).to(target);
        if let Err(e) = self.send(message).await {
            self.state.lock().await.tasks.remove(&id);
            return Err(e);
        }

        let mut state = self.state.lock().await;
        let record = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| FleetError::NotFound(format!("Delegation {id}")))?;
        if record.lifecycle.started.is_none() {
            record.lifecycle.started = Some(Utc::now());
        }
        info!(task_id = %id, target, capability, "Task delegated");
        Ok(record.clone())
    }

    /// Wait until the delegation `task_id` is answered, up to its timeout.
    pub async fn wait_for_response(&self, task_id: &str) -> FleetResult<DelegatedTask> {
        let (rx, timeout_ms) = {
            let mut state = self.state.lock().await;
            let record = state
                .tasks
                .get(task_id)
                .ok_or_else(|| FleetError::NotFound(format!("Delegation {task_id}")))?;
            if record.is_settled() {
                return Ok(record.clone());
            }
            let timeout_ms = record.timeout_ms;
            let (tx, rx) = oneshot::channel();
            state
                .task_waiters
                .entry(task_id.to_string())
                .or_default()
                .push(tx);
            (rx, timeout_ms)
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(_)) => Err(FleetError::Protocol(format!(
                "Delegation {task_id} was abandoned"
            ))),
            Err(_) => {
                let mut state = self.state.lock().await;
                if let Some(waiters) = state.task_waiters.get_mut(task_id) {
                    waiters.retain(|tx| !tx.is_closed());
                    if waiters.is_empty() {
                        state.task_waiters.remove(task_id);
                    }
                }
                Err(FleetError::Timeout(format!(
                    "No response to delegation {task_id} within {timeout_ms}ms"
                )))
            }
        }
    }

    /// Answer a task request we received.
    pub async fn respond_to_task(
        &self,
        task_id: &str,
        results: Value,
        error: Option<String>,
    ) -> FleetResult<()> {
        let (originator, payload) = {
            let mut state = self.state.lock().await;
            let record = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| FleetError::NotFound(format!("Task {task_id}")))?;
            let now = Utc::now();
            record.results = Some(results.clone());
            record.lifecycle.completed = Some(now);
            if error.is_some() {
                record.lifecycle.failed = Some(now);
            }
            record.error.clone_from(&error);
            (
                record.source.clone(),
                TaskResponsePayload {
                    task_id: task_id.to_string(),
                    results,
                    error,
                    lifecycle: record.lifecycle.clone(),
                },
            )
        };

        let message = A2aMessage::new(
            A2aMessageType::TaskResponse,
            &self.agent_id,
            serde_json::to_value(payload)?,
        )
        .to(originator);
        self.send(message).await
    }

    /// Change the local status and broadcast it.
    pub async fn set_status(&self, status: CardStatus) -> FleetResult<()> {
        self.state.lock().await.local.status = status;
        let payload = serde_json::to_value(StatusUpdatePayload {
            agent_id: self.agent_id.clone(),
            status,
        })?;
        self.send(A2aMessage::new(A2aMessageType::StatusUpdate, &self.agent_id, payload))
            .await
    }

    /// Broadcast the local status and capability count.
    pub async fn send_heartbeat(&self) -> FleetResult<()> {
        let payload = {
            let state = self.state.lock().await;
            HeartbeatPayload {
                status: state.local.status,
                capabilities: state.local.capabilities.len(),
            }
        };
        self.send(A2aMessage::new(
            A2aMessageType::Heartbeat,
            &self.agent_id,
            serde_json::to_value(payload)?,
        ))
        .await
    }

    // --- Inbound ---

    /// Feed one bus envelope to the client. Non-A2A traffic is ignored and
    /// protocol errors are logged and dropped.
    pub async fn handle_bus_message(&self, envelope: &BusMessage) {
        let message = match A2aMessage::from_bus_message(envelope) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                warn!(agent_id = %self.agent_id, error = %e, "Dropping A2A envelope");
                return;
            }
        };
        let id = message.id.clone();
        if let Err(e) = self.handle_message(message).await {
            warn!(agent_id = %self.agent_id, message_id = %id, error = %e, "Dropping A2A message");
        }
    }

    /// Validate and dispatch one inbound message.
    pub async fn handle_message(&self, message: A2aMessage) -> FleetResult<()> {
        if message.source == self.agent_id {
            return Ok(());
        }
        if let Some(target) = &message.target {
            if target != &self.agent_id {
                return Ok(());
            }
        }
        if message.version != PROTOCOL_VERSION {
            return Err(FleetError::Protocol(format!(
                "Unsupported protocol version {} from {}",
                message.version, message.source
            )));
        }
        let bytes = message.signing_bytes()?;
        let signature = message.signature.as_deref().unwrap_or_default();
        if !self.signer.verify(&bytes, signature) {
            return Err(FleetError::Protocol(format!(
                "Invalid signature on {} from {}",
                message.id, message.source
            )));
        }

        let now = Utc::now();
        let known = self.state.lock().await.directory.touch(&message.source, now);
        if known {
            self.events.emit(A2aEvent::AgentSeen {
                agent_id: message.source.clone(),
                at: now,
            });
        }

        debug!(
            agent_id = %self.agent_id,
            source = %message.source,
            message_type = %message.message_type,
            "A2A receive"
        );
        match message.message_type {
            A2aMessageType::Discovery => self.on_discovery(&message).await,
            A2aMessageType::CapabilityQuery => self.on_capability_query(&message).await,
            A2aMessageType::TaskRequest => self.on_task_request(&message).await,
            A2aMessageType::TaskResponse => self.on_task_response(&message).await,
            A2aMessageType::StatusUpdate => self.on_status_update(&message).await,
            A2aMessageType::Heartbeat => self.on_heartbeat(&message).await,
        }
    }

    async fn on_discovery(&self, message: &A2aMessage) -> FleetResult<()> {
        let payload: DiscoveryPayload = message.payload_as()?;
        if payload.agent.id != message.source {
            return Err(FleetError::Protocol(format!(
                "Discovery card {} sent by {}",
                payload.agent.id, message.source
            )));
        }
        let mut card = payload.agent.clone();
        card.last_seen = Utc::now();

        let (is_new, local) = {
            let mut state = self.state.lock().await;
            (state.directory.upsert(card.clone()), state.local.clone())
        };
        if is_new {
            info!(
                agent_id = %self.agent_id,
                discovered = %card.id,
                capabilities = ?card.capability_names(),
                "Agent discovered"
            );
        }
        self.events.emit(A2aEvent::AgentDiscovered(card));

        if payload.is_reply() {
            return Ok(());
        }
        let reply = serde_json::to_value(DiscoveryPayload::reply(local))?;
        self.send(A2aMessage::new(A2aMessageType::Discovery, &self.agent_id, reply).to(&message.source))
            .await
    }

    async fn on_capability_query(&self, message: &A2aMessage) -> FleetResult<()> {
        if message.payload.get("queryId").is_some() {
            let response: CapabilityResponsePayload = message.payload_as()?;
            let waiter = self
                .state
                .lock()
                .await
                .pending_queries
                .remove(&response.query_id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(response.capabilities);
                }
                None => debug!(query_id = %response.query_id, "Late capability response ignored"),
            }
            return Ok(());
        }

        let query: CapabilityQueryPayload = message.payload_as()?;
        let capabilities: Vec<Capability> = {
            let state = self.state.lock().await;
            state
                .local
                .capabilities
                .iter()
                .filter(|c| query.capability == "*" || c.name == query.capability)
                .cloned()
                .collect()
        };
        let response = serde_json::to_value(CapabilityResponsePayload {
            capabilities,
            query_id: message.id.clone(),
        })?;
        self.send(
            A2aMessage::new(A2aMessageType::CapabilityQuery, &self.agent_id, response)
                .to(&message.source),
        )
        .await
    }

    async fn on_task_request(&self, message: &A2aMessage) -> FleetResult<()> {
        let TaskRequestPayload { mut task } = message.payload_as()?;
        let capable = {
            let state = self.state.lock().await;
            state
                .local
                .capabilities
                .iter()
                .any(|c| c.name == task.capability)
        };

        if !capable {
            let err = FleetError::CapabilityUnavailable(task.capability.clone());
            warn!(agent_id = %self.agent_id, task_id = %task.id, error = %err, "Rejecting task request");
            let now = Utc::now();
            let reason = format!("Capability {} not available", task.capability);
            task.error = Some(reason.clone());
            task.lifecycle.completed = Some(now);
            task.lifecycle.failed = Some(now);
            let lifecycle = task.lifecycle.clone();
            let task_id = task.id.clone();
            self.state.lock().await.tasks.insert(task_id.clone(), task);

            let response = serde_json::to_value(TaskResponsePayload {
                task_id,
                results: Value::Null,
                error: Some(reason),
                lifecycle,
            })?;
            return self
                .send(
                    A2aMessage::new(A2aMessageType::TaskResponse, &self.agent_id, response)
                        .to(&message.source),
                )
                .await;
        }

        task.source.clone_from(&message.source);
        if task.lifecycle.started.is_none() {
            task.lifecycle.started = Some(Utc::now());
        }
        info!(agent_id = %self.agent_id, task_id = %task.id, capability = %task.capability, "Task requested");
        self.state
            .lock()
            .await
            .tasks
            .insert(task.id.clone(), task.clone());
        self.events.emit(A2aEvent::TaskRequested(task));
        Ok(())
    }

    async fn on_task_response(&self, message: &A2aMessage) -> FleetResult<()> {
        let response: TaskResponsePayload = message.payload_as()?;
        let (record, waiters) = {
            let mut state = self.state.lock().await;
            let Some(record) = state.tasks.get_mut(&response.task_id) else {
                debug!(task_id = %response.task_id, "Response for unknown delegation ignored");
                return Ok(());
            };
            if record.target.as_deref() != Some(message.source.as_str()) {
                return Err(FleetError::Protocol(format!(
                    "Response for {} from {} which was not asked",
                    response.task_id, message.source
                )));
            }
            if record.is_settled() {
                debug!(task_id = %response.task_id, "Duplicate response ignored");
                return Ok(());
            }
            let now = Utc::now();
            record.results = Some(response.results);
            record.error = response.error;
            record.lifecycle.started = record.lifecycle.started.or(response.lifecycle.started);
            record.lifecycle.completed = Some(response.lifecycle.completed.unwrap_or(now));
            record.lifecycle.failed = match record.error {
                Some(_) => Some(response.lifecycle.failed.unwrap_or(now)),
                None => None,
            };
            let record = record.clone();
            let waiters = state
                .task_waiters
                .remove(&response.task_id)
                .unwrap_or_default();
            (record, waiters)
        };

        info!(
            agent_id = %self.agent_id,
            task_id = %record.id,
            failed = record.is_failed(),
            "Task response received"
        );
        for tx in waiters {
            let _ = tx.send(record.clone());
        }
        self.events.emit(A2aEvent::TaskResponded(record));
        Ok(())
    }

    async fn on_status_update(&self, message: &A2aMessage) -> FleetResult<()> {
        let update: StatusUpdatePayload = message.payload_as()?;
        if update.agent_id != message.source {
            return Err(FleetError::Protocol(format!(
                "Status for {} sent by {}",
                update.agent_id, message.source
            )));
        }
        let changed = self
            .state
            .lock()
            .await
            .directory
            .set_status(&update.agent_id, update.status, Utc::now());
        if changed.is_some() {
            self.events.emit(A2aEvent::AgentStatusChanged {
                agent_id: update.agent_id,
                status: update.status,
            });
        }
        Ok(())
    }

    async fn on_heartbeat(&self, message: &A2aMessage) -> FleetResult<()> {
        let heartbeat: HeartbeatPayload = message.payload_as()?;
        self.state
            .lock()
            .await
            .directory
            .set_status(&message.source, heartbeat.status, Utc::now());
        Ok(())
    }

    // --- Maintenance ---

    /// Drop delegations past retention and directory entries that went
    /// silent. Returns the ids of departed agents.
    ///
    /// A settled delegation expires `retention` after it completed; one that
    /// was never answered expires `retention` after its timeout elapsed, and
    /// its waiters are released.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Vec<String> {
        let retention = chrono::Duration::seconds(self.config.delegation_retention_secs as i64);
        let stale_after = chrono::Duration::seconds(self.config.directory_stale_secs as i64);

        let (expired, departed) = {
            let mut state = self.state.lock().await;
            let ClientState {
                directory,
                tasks,
                pending_queries,
                task_waiters,
                ..
            } = &mut *state;
            let before = tasks.len();
            tasks.retain(|_, task| match task.lifecycle.completed {
                Some(completed) => now - completed < retention,
                None => !unanswered_expired(task, now, retention),
            });
            task_waiters.retain(|id, _| tasks.contains_key(id));
            pending_queries.retain(|_, tx| !tx.is_closed());
            let expired = before - tasks.len();
            (expired, directory.prune_stale(now, stale_after))
        };

        for agent_id in &departed {
            info!(agent_id = %self.agent_id, departed = %agent_id, "Agent went silent");
            self.events.emit(A2aEvent::AgentDeparted {
                agent_id: agent_id.clone(),
            });
        }
        if expired > 0 {
            debug!(agent_id = %self.agent_id, expired, "Expired delegation records");
        }
        departed
    }

    /// Spawn the bus listener and the heartbeat, discovery and cleanup loops.
    pub fn start(self: &Arc<Self>) {
        let mut rx = self.bus.subscribe();
        let listener = {
            let client = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(envelope) => client.handle_bus_message(&envelope).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(agent_id = %client.agent_id, skipped, "A2A listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        let heartbeat = {
            let client = Arc::clone(self);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(client.config.heartbeat_interval());
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if let Err(e) = client.send_heartbeat().await {
                        warn!(agent_id = %client.agent_id, error = %e, "Heartbeat failed");
                    }
                }
            })
        };

        let discovery = {
            let client = Arc::clone(self);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(client.config.discovery_interval());
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if let Err(e) = client.discover_agents().await {
                        warn!(agent_id = %client.agent_id, error = %e, "Discovery sweep failed");
                    }
                }
            })
        };

        let cleanup = {
            let client = Arc::clone(self);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(client.config.cleanup_interval());
                interval.tick().await;
                loop {
                    interval.tick().await;
                    client.cleanup(Utc::now()).await;
                }
            })
        };

        self.handles
            .lock()
            .extend([listener, heartbeat, discovery, cleanup]);
        info!(agent_id = %self.agent_id, "A2A client started");
    }

    /// Stop every background loop. Outstanding waits fail with Timeout as
    /// their deadlines pass.
    pub fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        if !handles.is_empty() {
            info!(agent_id = %self.agent_id, "A2A client stopped");
        }
    }

    // --- Snapshots ---

    /// Every known remote agent.
    pub async fn agents(&self) -> Vec<AgentCard> {
        self.state.lock().await.directory.list()
    }

    /// Card of one remote agent.
    pub async fn agent(&self, agent_id: &str) -> Option<AgentCard> {
        self.state.lock().await.directory.get(agent_id).cloned()
    }

    /// Card of the local agent.
    pub async fn local_agent(&self) -> AgentCard {
        self.state.lock().await.local.clone()
    }

    /// Every delegation record, sent or received.
    pub async fn tasks(&self) -> Vec<DelegatedTask> {
        let mut tasks: Vec<DelegatedTask> =
            self.state.lock().await.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.lifecycle.created.cmp(&b.lifecycle.created));
        tasks
    }

    /// One delegation record.
    pub async fn task(&self, task_id: &str) -> Option<DelegatedTask> {
        self.state.lock().await.tasks.get(task_id).cloned()
    }

    /// Capabilities the local agent advertises.
    pub async fn capabilities(&self) -> Vec<Capability> {
        self.state.lock().await.local.capabilities.clone()
    }
}

fn unanswered_expired(task: &DelegatedTask, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
    let Some(created) = task.lifecycle.created.or(task.lifecycle.started) else {
        return false;
    };
    let timeout = chrono::Duration::milliseconds(i64::try_from(task.timeout_ms).unwrap_or(i64::MAX));
    created
        .checked_add_signed(timeout)
        .and_then(|deadline| deadline.checked_add_signed(retention))
        .is_some_and(|expiry| now >= expiry)
}

impl Drop for A2aClient {
    fn drop(&mut self) {
        for handle in self.handles.get_mut().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use fleet_core::InMemoryBus;
    use fleet_security::NoopSigner;

    fn client(id: &str, caps: &[&str]) -> A2aClient {
        let mut card = AgentCard::new(id, id.to_uppercase());
        for cap in caps {
            card = card.with_capability(Capability::new(*cap, ""));
        }
        A2aClient::with_signer(
            card,
            Arc::new(InMemoryBus::default()),
            Arc::new(NoopSigner),
            A2aConfig::default(),
        )
    }

    fn discovery_from(card: AgentCard) -> A2aMessage {
        A2aMessage::new(
            A2aMessageType::Discovery,
            card.id.clone(),
            serde_json::to_value(DiscoveryPayload::reply(card)).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_ignores_own_and_foreign_messages() {
        let c = client("a", &[]);
        let own = discovery_from(AgentCard::new("a", "A"));
        c.handle_message(own).await.unwrap();
        let foreign = discovery_from(AgentCard::new("b", "B")).to("c");
        c.handle_message(foreign).await.unwrap();
        assert!(c.agents().await.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_version_dropped() {
        let c = client("a", &[]);
        let mut msg = discovery_from(AgentCard::new("b", "B"));
        msg.version = "2.0".into();
        assert!(matches!(
            c.handle_message(msg).await,
            Err(FleetError::Protocol(_))
        ));
        assert!(c.agents().await.is_empty());
    }

    #[tokio::test]
    async fn test_discovery_card_must_match_sender() {
        let c = client("a", &[]);
        let mut msg = discovery_from(AgentCard::new("b", "B"));
        msg.source = "mallory".into();
        assert!(c.handle_message(msg).await.is_err());
        assert!(c.agents().await.is_empty());
    }

    #[tokio::test]
    async fn test_status_update_emits_event() {
        let c = client("a", &[]);
        let mut events = c.subscribe();
        c.handle_message(discovery_from(AgentCard::new("b", "B")))
            .await
            .unwrap();

        let status = A2aMessage::new(
            A2aMessageType::StatusUpdate,
            "b",
            serde_json::to_value(StatusUpdatePayload {
                agent_id: "b".into(),
                status: CardStatus::Busy,
            })
            .unwrap(),
        );
        c.handle_message(status).await.unwrap();
        assert_eq!(c.agent("b").await.unwrap().status, CardStatus::Busy);

        let mut saw_change = false;
        while let Ok(event) = events.try_recv() {
            if let A2aEvent::AgentStatusChanged { agent_id, status } = event {
                assert_eq!(agent_id, "b");
                assert_eq!(status, CardStatus::Busy);
                saw_change = true;
            }
        }
        assert!(saw_change);
    }

    #[tokio::test]
    async fn test_task_request_recorded_and_emitted() {
        let c = client("worker", &["summarize"]);
        let mut events = c.subscribe();
        let task = DelegatedTask {
            id: "t1".into(),
            kind: DelegationKind::Request,
            source: "boss".into(),
            target: Some("worker".into()),
            capability: "summarize".into(),
            payload: serde_json::json!({"text": "hello"}),
            context: Map::new(),
            priority: DelegationPriority::Normal,
            timeout_ms: 1000,
            lifecycle: TaskLifecycle {
                created: Some(Utc::now()),
                ..Default::default()
            },
            dependencies: vec![],
            results: None,
            error: None,
        };
        let msg = A2aMessage::new(
            A2aMessageType::TaskRequest,
            "boss",
            serde_json::to_value(TaskRequestPayload { task }).unwrap(),
        )
        .to("worker");
        c.handle_message(msg).await.unwrap();

        let stored = c.task("t1").await.unwrap();
        assert!(stored.lifecycle.started.is_some());
        assert!(matches!(events.try_recv().unwrap(), A2aEvent::TaskRequested(t) if t.id == "t1"));
    }

    #[tokio::test]
    async fn test_unknown_response_ignored() {
        let c = client("a", &[]);
        let msg = A2aMessage::new(
            A2aMessageType::TaskResponse,
            "b",
            serde_json::to_value(TaskResponsePayload {
                task_id: "nope".into(),
                results: Value::Null,
                error: None,
                lifecycle: TaskLifecycle::default(),
            })
            .unwrap(),
        )
        .to("a");
        c.handle_message(msg).await.unwrap();
        assert!(c.tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_query_unknown_agent_not_found() {
        let c = client("a", &[]);
        assert!(matches!(
            c.query_capabilities("ghost", None).await,
            Err(FleetError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_respond_to_unknown_task() {
        let c = client("a", &[]);
        assert!(matches!(
            c.respond_to_task("nope", Value::Null, None).await,
            Err(FleetError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_prunes_silent_agents_and_old_records() {
        let c = client("a", &[]);
        let mut events = c.subscribe();
        c.handle_message(discovery_from(AgentCard::new("b", "B")))
            .await
            .unwrap();
        let record = c
            .delegate_task("b", "x", Value::Null, DelegationOptions::default())
            .await
            .unwrap();
        {
            let mut state = c.state.lock().await;
            state.tasks.get_mut(&record.id).unwrap().lifecycle.completed = Some(Utc::now());
        }

        let later = Utc::now() + chrono::Duration::hours(2);
        let departed = c.cleanup(later).await;
        assert_eq!(departed, vec!["b".to_string()]);
        assert!(c.agents().await.is_empty());
        assert!(c.tasks().await.is_empty());

        let mut saw_departure = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, A2aEvent::AgentDeparted { ref agent_id } if agent_id == "b") {
                saw_departure = true;
            }
        }
        assert!(saw_departure);
    }

    #[tokio::test]
    async fn test_cleanup_expires_unanswered_delegations() {
        let c = client("a", &[]);
        let record = c
            .delegate_task(
                "b",
                "x",
                Value::Null,
                DelegationOptions {
                    timeout_ms: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let (tx, rx) = oneshot::channel();
        c.state
            .lock()
            .await
            .task_waiters
            .entry(record.id.clone())
            .or_default()
            .push(tx);

        // still inside timeout plus retention
        c.cleanup(Utc::now()).await;
        assert!(c.task(&record.id).await.is_some());

        c.cleanup(Utc::now() + chrono::Duration::days(30)).await;
        assert!(c.tasks().await.is_empty());
        assert!(c.state.lock().await.task_waiters.is_empty());
        assert!(rx.await.is_err());
    }

    #[test]
    fn test_huge_timeout_never_expires_early() {
        let mut task = DelegatedTask {
            id: "t".into(),
            kind: DelegationKind::Request,
            source: "a".into(),
            target: None,
            capability: "x".into(),
            payload: Value::Null,
            context: Map::new(),
            priority: DelegationPriority::default(),
            timeout_ms: u64::MAX,
            lifecycle: TaskLifecycle {
                created: Some(Utc::now()),
                ..Default::default()
            },
            dependencies: Vec::new(),
            results: None,
            error: None,
        };
        let later = Utc::now() + chrono::Duration::days(365);
        assert!(!unanswered_expired(&task, later, chrono::Duration::hours(1)));
        task.timeout_ms = 10;
        assert!(unanswered_expired(&task, later, chrono::Duration::hours(1)));
    }
}
