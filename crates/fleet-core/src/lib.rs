//! Core types and error definitions for the Fleet orchestrator.
//!
//! This crate provides the foundational pieces shared by every Fleet crate:
//! the unified error type, the message-bus abstraction agents talk over, and
//! a small typed event bus used for lifecycle notifications.
//!
//! # Main types
//!
//! - [`FleetError`] — Unified error enum for all Fleet subsystems.
//! - [`FleetResult`] — Convenience alias for `Result<T, FleetError>`.
//! - [`MessageBus`] — Transport-agnostic outbound/inbound message channel.
//! - [`BusMessage`] — Envelope carried by the bus.
//! - [`InMemoryBus`] — Single-process bus used by tests and the CLI.
//! - [`EventBus`] — Typed multi-subscriber notification channel.

/// Message bus trait, envelope and in-memory implementation.
pub mod bus;
/// Typed lifecycle event fan-out.
pub mod event;

pub use bus::{BusMessage, BusMessageKind, InMemoryBus, MessageBus};
pub use event::EventBus;

// --- Error types ---

/// Top-level error type for the Fleet orchestrator.
///
/// Variants follow the failure taxonomy of the system: protocol problems are
/// dropped at the edge, timeouts surface as failed operations, and task-level
/// failures feed the strategy failure policy.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Invalid signature or malformed protocol message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A correlated operation (capability query, delegation, consensus) did not settle in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The requested capability is not offered by the local agent.
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// An agent reported a failure while executing a task.
    #[error("Task execution error: {0}")]
    TaskExecution(String),

    /// A running task exceeded its declared timeout.
    #[error("Workflow timeout: {0}")]
    WorkflowTimeout(String),

    /// A workflow, agent, strategy, task or request id is unknown.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration or invalid input to an operation.
    #[error("Config error: {0}")]
    Config(String),

    /// The message bus rejected or lost a message.
    #[error("Bus error: {0}")]
    Bus(String),

    /// A consensus request could not be created or resolved.
    #[error("Consensus error: {0}")]
    Consensus(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`FleetError`].
pub type FleetResult<T> = Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FleetError::Timeout("capability query".into());
        assert_eq!(err.to_string(), "Timeout: capability query");

        let err = FleetError::CapabilityUnavailable("translate".into());
        assert!(err.to_string().contains("translate"));
    }

    #[test]
    fn test_json_error_conversion() {
        let parsed: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: FleetError = parsed.unwrap_err().into();
        assert!(matches!(err, FleetError::Json(_)));
    }
}
