use crate::FleetResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Coarse category of a [`BusMessage`], used by hosts for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusMessageKind {
    /// Discovery and other infrastructure traffic.
    System,
    /// A request that expects the recipient to act.
    Command,
    /// An answer to an earlier command.
    Response,
    /// Liveness and status traffic.
    StatusUpdate,
}

/// Envelope exchanged over the [`MessageBus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    /// Unique identifier for this message.
    pub id: String,
    /// Routing category.
    pub kind: BusMessageKind,
    /// Agent id of the sender.
    pub source: String,
    /// Agent id of the recipient; `None` means broadcast.
    pub recipient: Option<String>,
    /// Application-level action name (e.g. `consensus-vote`).
    pub action: Option<String>,
    /// Message body.
    pub payload: serde_json::Value,
    /// Arbitrary key-value metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// UTC timestamp of when the message was created.
    pub timestamp: DateTime<Utc>,
}

impl BusMessage {
    /// Creates a broadcast message with a fresh id.
    pub fn new(kind: BusMessageKind, source: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            source: source.into(),
            recipient: None,
            action: None,
            payload,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a [`BusMessageKind::Command`] carrying `action`.
    pub fn command(
        source: impl Into<String>,
        action: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(BusMessageKind::Command, source, payload).with_action(action)
    }

    /// Address the message to a single agent.
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// Set the application-level action name.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the agent `agent_id` should process this message.
    pub fn is_for(&self, agent_id: &str) -> bool {
        self.recipient.as_deref().map_or(true, |r| r == agent_id)
    }
}

/// Outbound/inbound message channel shared by every component.
///
/// Delivery is ordered per sender and at-most-once. There is no ordering
/// guarantee across senders. Subscribers receive every message and filter by
/// recipient themselves.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message.
    async fn send_message(&self, message: BusMessage) -> FleetResult<()>;

    /// Subscribe to all subsequent messages.
    fn subscribe(&self) -> broadcast::Receiver<BusMessage>;
}

/// Single-process [`MessageBus`] backed by a tokio broadcast channel.
pub struct InMemoryBus {
    tx: broadcast::Sender<BusMessage>,
}

impl InMemoryBus {
    /// Bus that buffers up to `capacity` messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn send_message(&self, message: BusMessage) -> FleetResult<()> {
        debug!(id = %message.id, source = %message.source, action = ?message.action, "bus send");
        // broadcast only rejects a send when nobody is subscribed
        let _ = self.tx.send(message);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}
