//! Vote-based group decisions among agents.

use crate::events::OrchestratorEvent;
use chrono::{DateTime, Utc};
use fleet_core::{BusMessage, EventBus, FleetError, FleetResult, MessageBus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bus action used to ask participants for a vote.
pub const CONSENSUS_REQUEST_ACTION: &str = "consensus-request";

/// Bus action participants answer with.
pub const CONSENSUS_VOTE_ACTION: &str = "consensus-vote";

/// Upper bound on vote re-requests per consensus round.
pub const MAX_VOTE_RETRIES: u32 = 16;

/// Decision rule of a consensus round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusKind {
    /// More than half vote yes.
    Majority,
    /// Everyone votes yes.
    Unanimous,
    /// Weighted yes reaches `threshold` percent of the total weight.
    Weighted,
    /// At least floor(2n/3) + 1 yes votes.
    Byzantine,
}

/// How a consensus round is decided and how long it may take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Decision rule.
    #[serde(rename = "type")]
    pub kind: ConsensusKind,
    /// Percent, used by weighted consensus.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Deadline after which the round times out (default: 30000).
    #[serde(default = "default_consensus_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra vote requests sent to non-voters before the deadline, capped at
    /// [`MAX_VOTE_RETRIES`].
    #[serde(default)]
    pub retries: u32,
}

fn default_threshold() -> f64 {
    50.0
}

fn default_consensus_timeout_ms() -> u64 {
    30_000
}

impl ConsensusConfig {
    /// Config for `kind` with default threshold and timeout.
    pub fn new(kind: ConsensusKind) -> Self {
        Self {
            kind,
            threshold: default_threshold(),
            timeout_ms: default_consensus_timeout_ms(),
            retries: 0,
        }
    }

    /// Set the deadline.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the weighted threshold, in percent.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the number of re-requests, capped at [`MAX_VOTE_RETRIES`].
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// State of a consensus request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusStatus {
    /// Waiting for votes.
    Pending,
    /// Every participant voted and the rule passed.
    Reached,
    /// Every participant voted and the rule did not pass.
    Failed,
    /// The deadline passed before every participant voted.
    Timeout,
}

/// One participant's ballot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// Yes or no.
    pub vote: bool,
    /// Weight for weighted consensus; 1 when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Optional explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the vote was recorded.
    pub at: DateTime<Utc>,
}

impl Vote {
    fn weight(&self) -> f64 {
        self.weight.unwrap_or(1.0)
    }
}

/// One consensus round and its votes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusRequest {
    /// Request id, `consensus_` prefixed.
    pub id: String,
    /// What is being decided.
    pub topic: String,
    /// Proposal sent to every participant.
    pub proposal: Value,
    /// Deduplicated participant ids.
    pub participants: Vec<String>,
    /// Decision rule and timing.
    pub config: ConsensusConfig,
    /// Latest vote per participant.
    pub votes: BTreeMap<String, Vote>,
    /// Current state.
    pub status: ConsensusStatus,
    /// Outcome once every participant voted.
    pub result: Option<bool>,
    /// When the request was opened.
    pub created_at: DateTime<Utc>,
    /// When the request reached a terminal status.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConsensusRequest {
    /// Whether votes are still accepted.
    pub fn is_pending(&self) -> bool {
        self.status == ConsensusStatus::Pending
    }

    fn non_voters(&self) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| !self.votes.contains_key(*p))
            .cloned()
            .collect()
    }
}

/// Apply the decision rule of `config` to a full set of votes.
pub fn evaluate(config: &ConsensusConfig, participants: usize, votes: &BTreeMap<String, Vote>) -> bool {
    let yes = votes.values().filter(|v| v.vote).count();
    match config.kind {
        ConsensusKind::Majority => yes * 2 > participants,
        ConsensusKind::Unanimous => participants > 0 && yes == participants,
        ConsensusKind::Weighted => {
            let total: f64 = votes.values().map(Vote::weight).sum();
            let weighted_yes: f64 = votes.values().filter(|v| v.vote).map(Vote::weight).sum();
            total > 0.0 && weighted_yes >= total * config.threshold / 100.0
        }
        ConsensusKind::Byzantine => yes >= (2 * participants) / 3 + 1,
    }
}

/// Body of a `consensus-vote` bus command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteMessage {
    /// Request being voted on.
    pub request_id: String,
    /// Yes or no.
    pub vote: bool,
    /// Weight for weighted consensus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Optional explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct ConsensusState {
    requests: HashMap<String, ConsensusRequest>,
    waiters: HashMap<String, Vec<oneshot::Sender<ConsensusRequest>>>,
    timers: HashMap<String, JoinHandle<()>>,
    requested: u64,
    successful: u64,
}

/// Owns every consensus request and drives it to a terminal status.
#[derive(Clone)]
pub struct ConsensusCoordinator {
    agent_id: String,
    state: Arc<Mutex<ConsensusState>>,
    bus: Arc<dyn MessageBus>,
    events: EventBus<OrchestratorEvent>,
}

impl ConsensusCoordinator {
    /// Coordinator that asks for votes on `bus` as `agent_id`.
    pub fn new(
        agent_id: impl Into<String>,
        bus: Arc<dyn MessageBus>,
        events: EventBus<OrchestratorEvent>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            state: Arc::new(Mutex::new(ConsensusState::default())),
            bus,
            events,
        }
    }

    /// Open a vote among `participants` and ask each of them over the bus.
    pub async fn request_consensus(
        &self,
        topic: &str,
        proposal: Value,
        participants: &[String],
        config: ConsensusConfig,
    ) -> FleetResult<ConsensusRequest> {
        let mut seen = HashSet::new();
        let participants: Vec<String> = participants
            .iter()
            .filter(|p| seen.insert(p.as_str()))
            .cloned()
            .collect();
        if participants.is_empty() {
            return Err(FleetError::Consensus(format!(
                "Consensus on '{topic}' needs at least one participant"
            )));
        }

        let request = ConsensusRequest {
            id: format!("consensus_{}", Uuid::new_v4().simple()),
            topic: topic.to_string(),
            proposal,
            participants,
            config,
            votes: BTreeMap::new(),
            status: ConsensusStatus::Pending,
            result: None,
            created_at: Utc::now(),
            resolved_at: None,
        };

        {
            let mut state = self.state.lock().await;
            state.requests.insert(request.id.clone(), request.clone());
            state.requested += 1;
            let timer = self.spawn_timer(request.id.clone(), &request.config);
            state.timers.insert(request.id.clone(), timer);
        }

        info!(
            request_id = %request.id,
            topic,
            kind = ?request.config.kind,
            participants = request.participants.len(),
            "Consensus requested"
        );
        self.events.emit(OrchestratorEvent::ConsensusRequested {
            request_id: request.id.clone(),
            topic: request.topic.clone(),
        });
        self.ask(&request, &request.participants).await;
        Ok(request)
    }

    async fn ask(&self, request: &ConsensusRequest, participants: &[String]) {
        let payload = serde_json::json!({
            "requestId": request.id,
            "topic": request.topic,
            "proposal": request.proposal,
            "config": {
                "type": request.config.kind,
                "timeout": request.config.timeout_ms,
            },
        });
        for participant in participants {
            let message =
                BusMessage::command(&self.agent_id, CONSENSUS_REQUEST_ACTION, payload.clone())
                    .with_recipient(participant);
            if let Err(e) = self.bus.send_message(message).await {
                warn!(request_id = %request.id, participant, error = %e, "Vote request not sent");
            }
        }
    }

    fn spawn_timer(&self, request_id: String, config: &ConsensusConfig) -> JoinHandle<()> {
        let coordinator = self.clone();
        let deadline = Duration::from_millis(config.timeout_ms);
        let retries = config.retries.min(MAX_VOTE_RETRIES);
        tokio::spawn(async move {
            let step = deadline / (retries + 1);
            for _ in 0..retries {
                tokio::time::sleep(step).await;
                let pending = {
                    let state = coordinator.state.lock().await;
                    match state.requests.get(&request_id) {
                        Some(r) if r.is_pending() => Some((r.clone(), r.non_voters())),
                        _ => None,
                    }
                };
                let Some((request, non_voters)) = pending else {
                    return;
                };
                debug!(request_id = %request_id, missing = non_voters.len(), "Re-sending vote request");
                coordinator.ask(&request, &non_voters).await;
            }
            tokio::time::sleep(deadline.saturating_sub(step * retries)).await;
            coordinator.expire(&request_id).await;
        })
    }

    async fn expire(&self, request_id: &str) {
        let mut state = self.state.lock().await;
        state.timers.remove(request_id);
        let Some(request) = state.requests.get_mut(request_id) else {
            return;
        };
        if !request.is_pending() {
            return;
        }
        request.status = ConsensusStatus::Timeout;
        request.resolved_at = Some(Utc::now());
        let snapshot = request.clone();
        let waiters = state.waiters.remove(request_id).unwrap_or_default();
        drop(state);

        warn!(
            request_id,
            votes = snapshot.votes.len(),
            participants = snapshot.participants.len(),
            "Consensus timed out"
        );
        for tx in waiters {
            let _ = tx.send(snapshot.clone());
        }
        self.events.emit(OrchestratorEvent::ConsensusResolved {
            request_id: snapshot.id,
            status: ConsensusStatus::Timeout,
            result: None,
        });
    }

    /// Record a vote. Returns `Ok(false)` when the vote was ignored because the
    /// request is no longer pending or the agent is not a participant.
    pub async fn submit_vote(
        &self,
        request_id: &str,
        agent_id: &str,
        vote: bool,
        weight: Option<f64>,
        reason: Option<String>,
    ) -> FleetResult<bool> {
        let mut state = self.state.lock().await;
        let request = state
            .requests
            .get_mut(request_id)
            .ok_or_else(|| FleetError::NotFound(format!("Consensus request {request_id}")))?;

        if !request.is_pending() {
            debug!(request_id, agent_id, "Late vote ignored");
            return Ok(false);
        }
        if !request.participants.iter().any(|p| p == agent_id) {
            warn!(request_id, agent_id, "Vote from non-participant ignored");
            return Ok(false);
        }

        request.votes.insert(
            agent_id.to_string(),
            Vote {
                vote,
                weight,
                reason,
                at: Utc::now(),
            },
        );
        debug!(request_id, agent_id, vote, "Vote recorded");
        if request.votes.len() < request.participants.len() {
            return Ok(true);
        }

        let result = evaluate(&request.config, request.participants.len(), &request.votes);
        request.result = Some(result);
        request.status = if result {
            ConsensusStatus::Reached
        } else {
            ConsensusStatus::Failed
        };
        request.resolved_at = Some(Utc::now());
        let snapshot = request.clone();

        if result {
            state.successful += 1;
        }
        if let Some(timer) = state.timers.remove(request_id) {
            timer.abort();
        }
        let waiters = state.waiters.remove(request_id).unwrap_or_default();
        drop(state);

        info!(request_id, status = ?snapshot.status, "Consensus resolved");
        for tx in waiters {
            let _ = tx.send(snapshot.clone());
        }
        self.events.emit(OrchestratorEvent::ConsensusResolved {
            request_id: snapshot.id,
            status: snapshot.status,
            result: snapshot.result,
        });
        Ok(true)
    }

    /// Apply a `consensus-vote` bus command; the voter is the envelope source.
    pub async fn handle_vote_message(&self, envelope: &BusMessage) -> FleetResult<bool> {
        let vote: VoteMessage = serde_json::from_value(envelope.payload.clone())
            .map_err(|e| FleetError::Protocol(format!("Malformed vote from {}: {e}", envelope.source)))?;
        self.submit_vote(&vote.request_id, &envelope.source, vote.vote, vote.weight, vote.reason)
            .await
    }

    /// Wait until the request is terminal. A timed-out request is an error.
    pub async fn wait_for_resolution(&self, request_id: &str) -> FleetResult<ConsensusRequest> {
        let rx = {
            let mut state = self.state.lock().await;
            let request = state
                .requests
                .get(request_id)
                .ok_or_else(|| FleetError::NotFound(format!("Consensus request {request_id}")))?;
            if !request.is_pending() {
                return Self::outcome(request.clone());
            }
            let (tx, rx) = oneshot::channel();
            state
                .waiters
                .entry(request_id.to_string())
                .or_default()
                .push(tx);
            rx
        };
        match rx.await {
            Ok(request) => Self::outcome(request),
            Err(_) => Err(FleetError::Consensus(format!(
                "Consensus request {request_id} was abandoned"
            ))),
        }
    }

    fn outcome(request: ConsensusRequest) -> FleetResult<ConsensusRequest> {
        match request.status {
            ConsensusStatus::Timeout => Err(FleetError::Timeout(format!(
                "Consensus request {} ({}) received {} of {} votes",
                request.id,
                request.topic,
                request.votes.len(),
                request.participants.len()
            ))),
            _ => Ok(request),
        }
    }

    /// Snapshot of one request.
    pub async fn request(&self, request_id: &str) -> Option<ConsensusRequest> {
        self.state.lock().await.requests.get(request_id).cloned()
    }

    /// All requests, oldest first.
    pub async fn requests(&self) -> Vec<ConsensusRequest> {
        let mut requests: Vec<ConsensusRequest> =
            self.state.lock().await.requests.values().cloned().collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        requests
    }

    /// `(requested, reached)` counters.
    pub async fn counters(&self) -> (u64, u64) {
        let state = self.state.lock().await;
        (state.requested, state.successful)
    }

    /// Drop resolved requests that ended more than `retention` before `now`.
    /// Pending requests are kept until their timer settles them.
    pub async fn prune(&self, now: DateTime<Utc>, retention: chrono::Duration) -> usize {
        let mut state = self.state.lock().await;
        let before = state.requests.len();
        state.requests.retain(|_, r| match (r.is_pending(), r.resolved_at) {
            (false, Some(resolved)) => now - resolved < retention,
            _ => true,
        });
        let ConsensusState {
            requests, waiters, ..
        } = &mut *state;
        waiters.retain(|id, _| requests.contains_key(id));
        let removed = before - state.requests.len();
        if removed > 0 {
            debug!(removed, "Pruned resolved consensus requests");
        }
        removed
    }

    /// Abort every timer and release waiters.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        for (_, timer) in state.timers.drain() {
            timer.abort();
        }
        state.waiters.clear();
    }
}
