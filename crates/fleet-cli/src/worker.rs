use crate::config::WorkerConfig;
use fleet_a2a::{A2aClient, A2aConfig, A2aEvent, AgentCard, Capability};
use fleet_core::{BusMessage, FleetResult, MessageBus};
use fleet_orchestrator::{CONSENSUS_REQUEST_ACTION, CONSENSUS_VOTE_ACTION};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// An in-process agent that answers delegated tasks and vote requests.
pub struct SimulatedWorker {
    client: Arc<A2aClient>,
    handles: Vec<JoinHandle<()>>,
}

impl SimulatedWorker {
    /// Start the worker's A2A client plus its task and vote responders.
    pub fn spawn(
        bus: &Arc<dyn MessageBus>,
        config: &WorkerConfig,
        a2a: A2aConfig,
        approves: bool,
    ) -> FleetResult<Self> {
        let card = config.capabilities.iter().fold(
            AgentCard::new(&config.id, config.name.clone().unwrap_or_else(|| config.id.clone())),
            |card, cap| card.with_capability(Capability::new(cap, format!("Simulated {cap}"))),
        );
        let client = Arc::new(A2aClient::new(card, Arc::clone(bus), a2a)?);
        client.start();

        // Subscribe before spawning so nothing sent right after `spawn` is missed.
        let task_events = client.subscribe();
        let vote_requests = bus.subscribe();
        let tasks = tokio::spawn(answer_tasks(
            Arc::clone(&client),
            task_events,
            config.latency_ms,
            config.fail_every,
        ));
        let votes = tokio::spawn(answer_votes(
            Arc::clone(bus),
            vote_requests,
            config.id.clone(),
            approves,
        ));
        info!(worker = %config.id, capabilities = ?config.capabilities, "Simulated worker started");
        Ok(Self {
            client,
            handles: vec![tasks, votes],
        })
    }

    pub fn id(&self) -> &str {
        self.client.agent_id()
    }

    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.abort();
        }
        self.client.shutdown();
    }
}

async fn answer_tasks(
    client: Arc<A2aClient>,
    mut rx: broadcast::Receiver<A2aEvent>,
    latency_ms: u64,
    fail_every: u32,
) {
    let mut handled: u32 = 0;
    loop {
        let task = match rx.recv().await {
            Ok(A2aEvent::TaskRequested(task)) => task,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(worker = %client.agent_id(), skipped, "Worker lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }
        handled += 1;
        let (results, error) = if fail_every > 0 && handled % fail_every == 0 {
            (serde_json::Value::Null, Some("simulated failure".to_string()))
        } else {
            (
                json!({
                    "worker": client.agent_id(),
                    "capability": task.capability,
                    "echo": task.payload,
                }),
                None,
            )
        };
        debug!(worker = %client.agent_id(), task_id = %task.id, failed = error.is_some(), "Answering task");
        if let Err(e) = client.respond_to_task(&task.id, results, error).await {
            warn!(worker = %client.agent_id(), task_id = %task.id, error = %e, "Task response not sent");
        }
    }
}

async fn answer_votes(
    bus: Arc<dyn MessageBus>,
    mut rx: broadcast::Receiver<BusMessage>,
    id: String,
    approves: bool,
) {
    loop {
        let envelope = match rx.recv().await {
            Ok(envelope) => envelope,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if envelope.action.as_deref() != Some(CONSENSUS_REQUEST_ACTION)
            || envelope.recipient.as_deref() != Some(id.as_str())
        {
            continue;
        }
        let vote = BusMessage::command(
            &id,
            CONSENSUS_VOTE_ACTION,
            json!({
                "requestId": envelope.payload["requestId"],
                "vote": approves,
                "reason": if approves { "looks good" } else { "rejected by configuration" },
            }),
        )
        .with_recipient(&envelope.source);
        if let Err(e) = bus.send_message(vote).await {
            warn!(worker = %id, error = %e, "Vote not sent");
        }
    }
}
