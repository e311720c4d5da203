//! A2A wire message types.
//!
//! Every A2A message travels inside a [`BusMessage`] whose action is
//! [`A2A_ACTION`]. Field names on the wire are camelCase.

use chrono::{DateTime, Utc};
use fleet_core::{BusMessage, BusMessageKind, FleetError, FleetResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Protocol version stamped on every message.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Bus action carrying A2A traffic.
pub const A2A_ACTION: &str = "a2a";

/// Kind of A2A message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum A2aMessageType {
    /// Announce an agent card or reply to an announcement.
    Discovery,
    /// Ask an agent what it can do, or carry the answer.
    CapabilityQuery,
    /// Hand a task to another agent.
    TaskRequest,
    /// Result or error for an earlier task request.
    TaskResponse,
    /// Explicit change of an agent's status.
    StatusUpdate,
    /// Periodic liveness signal.
    Heartbeat,
}

impl A2aMessageType {
    /// Bus routing category for this message type.
    pub fn bus_kind(self) -> BusMessageKind {
        match self {
            A2aMessageType::Discovery => BusMessageKind::System,
            A2aMessageType::CapabilityQuery | A2aMessageType::TaskRequest => BusMessageKind::Command,
            A2aMessageType::TaskResponse => BusMessageKind::Response,
            A2aMessageType::StatusUpdate | A2aMessageType::Heartbeat => BusMessageKind::StatusUpdate,
        }
    }

    /// Wire name, as used in the `type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            A2aMessageType::Discovery => "discovery",
            A2aMessageType::CapabilityQuery => "capability_query",
            A2aMessageType::TaskRequest => "task_request",
            A2aMessageType::TaskResponse => "task_response",
            A2aMessageType::StatusUpdate => "status_update",
            A2aMessageType::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for A2aMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single A2A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A2aMessage {
    /// Unique message id, `a2a_` prefixed.
    pub id: String,
    /// Protocol version of the sender.
    pub version: String,
    /// What the payload carries.
    #[serde(rename = "type")]
    pub message_type: A2aMessageType,
    /// Sending agent.
    pub source: String,
    /// Recipient agent; `None` is a broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Creation time at the sender.
    pub timestamp: DateTime<Utc>,
    /// Type-specific body; see the `*Payload` structs.
    pub payload: Value,
    /// Free-form context forwarded with the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
    /// Hex signature over [`signing_bytes`](Self::signing_bytes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl A2aMessage {
    /// Broadcast message of `message_type` with a fresh id.
    pub fn new(message_type: A2aMessageType, source: impl Into<String>, payload: Value) -> Self {
        Self {
            id: format!("a2a_{}", Uuid::new_v4().simple()),
            version: PROTOCOL_VERSION.to_string(),
            message_type,
            source: source.into(),
            target: None,
            timestamp: Utc::now(),
            payload,
            context: None,
            signature: None,
        }
    }

    /// Address the message to a single agent.
    pub fn to(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Canonical bytes covered by the signature: the JSON encoding of the
    /// message with the signature field removed.
    pub fn signing_bytes(&self) -> FleetResult<Vec<u8>> {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        Ok(serde_json::to_vec(&unsigned)?)
    }

    /// Decode the payload into its typed shape.
    pub fn payload_as<T: DeserializeOwned>(&self) -> FleetResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            FleetError::Protocol(format!(
                "Malformed {} payload from {}: {e}",
                self.message_type, self.source
            ))
        })
    }

    /// Wrap into a bus envelope.
    pub fn to_bus_message(&self) -> FleetResult<BusMessage> {
        let mut envelope = BusMessage::new(
            self.message_type.bus_kind(),
            self.source.clone(),
            serde_json::to_value(self)?,
        )
        .with_action(A2A_ACTION)
        .with_metadata("protocol", Value::from("a2a"))
        .with_metadata("version", Value::from(self.version.clone()))
        .with_metadata("originalType", Value::from(self.message_type.as_str()));
        envelope.id = self.id.clone();
        envelope.timestamp = self.timestamp;
        envelope.recipient = self.target.clone();
        Ok(envelope)
    }

    /// Unwrap a bus envelope. Returns `Ok(None)` for non-A2A traffic and a
    /// protocol error for A2A envelopes that do not decode.
    pub fn from_bus_message(envelope: &BusMessage) -> FleetResult<Option<Self>> {
        if envelope.action.as_deref() != Some(A2A_ACTION) {
            return Ok(None);
        }
        serde_json::from_value(envelope.payload.clone())
            .map(Some)
            .map_err(|e| {
                FleetError::Protocol(format!(
                    "Malformed A2A envelope {} from {}: {e}",
                    envelope.id, envelope.source
                ))
            })
    }
}

// --- Agent cards ---

/// A named function an agent advertises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    /// Capability name, matched exactly by task routing.
    pub name: String,
    /// Capability version (default `1.0`).
    #[serde(default = "default_capability_version")]
    pub version: String,
    /// What the capability does.
    #[serde(default)]
    pub description: String,
    /// JSON description of accepted input.
    #[serde(default)]
    pub parameters: Value,
    /// Whether peers must support this capability to interoperate.
    #[serde(default)]
    pub required: bool,
}

fn default_capability_version() -> String {
    "1.0".to_string()
}

impl Capability {
    /// Capability with an empty parameter schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_capability_version(),
            description: description.into(),
            parameters: Value::Object(Map::new()),
            required: false,
        }
    }
}

/// Liveness status advertised on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    /// Reachable and accepting work.
    Online,
    /// Announced its departure.
    Offline,
    /// Reachable but at capacity.
    Busy,
    /// Reachable but unhealthy.
    Error,
}

/// Transport endpoints an agent advertises. Informational on an in-process bus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentEndpoints {
    /// Where discovery requests go.
    #[serde(default)]
    pub discovery: String,
    /// Where protocol messages go.
    #[serde(default)]
    pub communication: String,
    /// Liveness probe.
    #[serde(default)]
    pub health: String,
}

/// Wire description of an agent, exchanged during discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    /// Agent id; unique on the bus.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Agent software version.
    #[serde(default = "default_capability_version")]
    pub version: String,
    /// Advertised capabilities.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Advertised endpoints.
    #[serde(default)]
    pub endpoints: AgentEndpoints,
    /// Free-form attributes.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Last advertised status.
    pub status: CardStatus,
    /// When the receiving agent last heard from this one.
    pub last_seen: DateTime<Utc>,
}

impl AgentCard {
    /// Online card with no capabilities.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: default_capability_version(),
            capabilities: Vec::new(),
            endpoints: AgentEndpoints::default(),
            metadata: Map::new(),
            status: CardStatus::Online,
            last_seen: Utc::now(),
        }
    }

    /// Add an advertised capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Names of every advertised capability.
    pub fn capability_names(&self) -> Vec<String> {
        self.capabilities.iter().map(|c| c.name.clone()).collect()
    }
}

// --- Task delegation ---

/// Role of a delegation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationKind {
    /// Sent by the originator.
    Request,
    /// Answer from the target.
    Response,
    /// Offered to every agent.
    Broadcast,
    /// Forwarded on behalf of another agent.
    Delegation,
}

/// Wire priority of a delegated task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationPriority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Ahead of normal work.
    High,
    /// Ahead of everything else.
    Urgent,
}

/// Timestamps of a delegated task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskLifecycle {
    /// Set by the originator.
    pub created: Option<DateTime<Utc>>,
    /// Set once the request went out, or on receipt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    /// Set when a response is recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    /// Set alongside `completed` when the response carries an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<DateTime<Utc>>,
}

/// A task handed from one agent to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatedTask {
    /// Delegation id, shared by both sides.
    pub id: String,
    /// Role of this record.
    #[serde(rename = "type")]
    pub kind: DelegationKind,
    /// Originating agent.
    pub source: String,
    /// Agent expected to do the work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Capability the target should use.
    pub capability: String,
    /// Input for the target.
    #[serde(default)]
    pub payload: Value,
    /// Originator context, e.g. the owning workflow.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Scheduling hint for the target.
    #[serde(default)]
    pub priority: DelegationPriority,
    /// Milliseconds the originator waits for a response.
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    /// When the task was created, started and answered.
    pub lifecycle: TaskLifecycle,
    /// Ids of delegations this one waits on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Output recorded from the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    /// Failure reason recorded from the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DelegatedTask {
    /// Whether a response has been recorded.
    pub fn is_settled(&self) -> bool {
        self.lifecycle.completed.is_some()
    }

    /// Whether the recorded response carries an error.
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

// --- Payload shapes ---

/// Body of a discovery message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryPayload {
    /// Card of the sender.
    pub agent: AgentCard,
    /// Set on unsolicited announcements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    /// Set on replies to an announcement; replies are never answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl DiscoveryPayload {
    /// Unsolicited announcement; receivers reply with their own card.
    pub fn announce(agent: AgentCard) -> Self {
        Self {
            agent,
            request: Some("agent_discovery".to_string()),
            response: None,
        }
    }

    /// Reply to an announcement.
    pub fn reply(agent: AgentCard) -> Self {
        Self {
            agent,
            request: None,
            response: Some("agent_info".to_string()),
        }
    }

    /// Whether this answers an announcement.
    pub fn is_reply(&self) -> bool {
        self.response.is_some()
    }
}

/// Capability query; `*` asks for everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityQueryPayload {
    /// Capability name to look up.
    pub capability: String,
}

/// Answer to a capability query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityResponsePayload {
    /// Matching capabilities; empty when none match.
    pub capabilities: Vec<Capability>,
    /// Id of the query being answered.
    pub query_id: String,
}

/// Body of a task request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequestPayload {
    /// The delegated task as recorded by the originator.
    pub task: DelegatedTask,
}

/// Body of a task response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponsePayload {
    /// Delegation being answered.
    pub task_id: String,
    /// Output of the task; `null` on failure.
    #[serde(default)]
    pub results: Value,
    /// Failure reason, when the task failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Lifecycle as seen by the responder.
    pub lifecycle: TaskLifecycle,
}

/// Body of a status update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdatePayload {
    /// Agent whose status changed.
    pub agent_id: String,
    /// New status.
    pub status: CardStatus,
}

/// Body of a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    /// Current status of the sender.
    pub status: CardStatus,
    /// Number of capabilities the sender offers.
    pub capabilities: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let msg = A2aMessage::new(
            A2aMessageType::StatusUpdate,
            "agent-a",
            serde_json::to_value(StatusUpdatePayload {
                agent_id: "agent-a".into(),
                status: CardStatus::Busy,
            })
            .unwrap(),
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "status_update");
        assert_eq!(json["version"], "1.0");
        assert_eq!(json["payload"]["agentId"], "agent-a");
        assert_eq!(json["payload"]["status"], "busy");
        assert!(json.get("target").is_none());
        assert!(json.get("signature").is_none());
    }

    #[test]
    fn test_signing_bytes_ignore_signature() {
        let mut msg = A2aMessage::new(A2aMessageType::Heartbeat, "a", serde_json::json!({"x": 1}));
        let before = msg.signing_bytes().unwrap();
        msg.signature = Some("abc".into());
        assert_eq!(before, msg.signing_bytes().unwrap());
    }

    #[test]
    fn test_signing_bytes_survive_bus_transit() {
        let mut ctx = Map::new();
        ctx.insert("zeta".into(), Value::from(1));
        ctx.insert("alpha".into(), Value::from(2));
        let mut msg = A2aMessage::new(
            A2aMessageType::TaskRequest,
            "a",
            serde_json::json!({"b": 1, "a": [1, 2, 3]}),
        )
        .to("b");
        msg.context = Some(ctx);

        let bytes = msg.signing_bytes().unwrap();
        let envelope = msg.to_bus_message().unwrap();
        let decoded = A2aMessage::from_bus_message(&envelope).unwrap().unwrap();
        assert_eq!(decoded.signing_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_envelope_metadata_and_routing() {
        let msg = A2aMessage::new(A2aMessageType::TaskResponse, "a", Value::Null).to("b");
        let envelope = msg.to_bus_message().unwrap();
        assert_eq!(envelope.id, msg.id);
        assert_eq!(envelope.kind, BusMessageKind::Response);
        assert_eq!(envelope.recipient.as_deref(), Some("b"));
        assert_eq!(envelope.metadata["protocol"], "a2a");
        assert_eq!(envelope.metadata["originalType"], "task_response");
    }

    #[test]
    fn test_from_bus_message_ignores_other_actions() {
        let envelope = BusMessage::command("a", "consensus-vote", serde_json::json!({}));
        assert!(A2aMessage::from_bus_message(&envelope).unwrap().is_none());
    }

    #[test]
    fn test_from_bus_message_rejects_garbage() {
        let envelope = BusMessage::command("a", A2A_ACTION, serde_json::json!({"nope": true}));
        let err = A2aMessage::from_bus_message(&envelope).unwrap_err();
        assert!(matches!(err, FleetError::Protocol(_)));
    }

    #[test]
    fn test_delegated_task_wire_shape() {
        let task = DelegatedTask {
            id: "t1".into(),
            kind: DelegationKind::Request,
            source: "a".into(),
            target: Some("b".into()),
            capability: "summarize".into(),
            payload: serde_json::json!({"text": "hi"}),
            context: Map::new(),
            priority: DelegationPriority::Urgent,
            timeout_ms: 5000,
            lifecycle: TaskLifecycle {
                created: Some(Utc::now()),
                ..Default::default()
            },
            dependencies: vec![],
            results: None,
            error: None,
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "request");
        assert_eq!(json["timeout"], 5000);
        assert_eq!(json["priority"], "urgent");
        assert!(!task.is_settled());
    }

    #[test]
    fn test_discovery_reply_marker() {
        let card = AgentCard::new("a", "Agent A");
        assert!(!DiscoveryPayload::announce(card.clone()).is_reply());
        assert!(DiscoveryPayload::reply(card).is_reply());
    }
}
