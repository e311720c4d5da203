//! Agent-to-agent (A2A) protocol for Fleet.
//!
//! Agents announce themselves with [`AgentCard`]s, ask each other for
//! capabilities, delegate tasks and exchange heartbeats. Every message is
//! signed and carried over a [`fleet_core::MessageBus`].
//!
//! # Main types
//!
//! - [`A2aClient`] — Per-agent protocol endpoint: directory, delegations, timers.
//! - [`A2aMessage`] — Wire message wrapped inside a bus envelope.
//! - [`AgentCard`] — Wire description of an agent and its capabilities.
//! - [`DelegatedTask`] — Record of a task handed from one agent to another.
//! - [`A2aEvent`] — Notifications emitted by the client.

/// The protocol client.
pub mod client;
/// Timers and limits.
pub mod config;
/// Directory of remote agents.
pub mod directory;
/// Wire types.
pub mod protocol;

pub use client::{A2aClient, A2aEvent, DelegationOptions};
pub use config::A2aConfig;
pub use directory::AgentDirectory;
pub use protocol::{
    A2aMessage, A2aMessageType, AgentCard, AgentEndpoints, Capability, CardStatus,
    DelegatedTask, DelegationKind, DelegationPriority, TaskLifecycle, A2A_ACTION,
    PROTOCOL_VERSION,
};
