use serde::Deserialize;
use std::time::Duration;

/// Timers and defaults for the orchestrator.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Maintenance tick in seconds (default: 5).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Agents unseen for this long are dropped from the pool (default: 90).
    #[serde(default = "default_agent_stale")]
    pub agent_stale_secs: u64,
    /// Finished workflows are kept this long (default: 300).
    #[serde(default = "default_workflow_retention")]
    pub workflow_retention_secs: u64,
    /// Resolved consensus requests are kept this long (default: 300).
    #[serde(default = "default_consensus_retention")]
    pub consensus_retention_secs: u64,
    /// Delay before a retried task is scheduled again (default: 1000 ms).
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// Strategy used when a workflow is started without one.
    #[serde(default = "default_strategy")]
    pub default_strategy: String,
    /// Run incoming A2A task requests as single-task workflows on the fleet.
    #[serde(default)]
    pub relay_delegated_tasks: bool,
    /// Buffered events per subscriber (default: 256).
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_tick_interval() -> u64 {
    5
}
fn default_agent_stale() -> u64 {
    90
}
fn default_workflow_retention() -> u64 {
    300
}
fn default_consensus_retention() -> u64 {
    300
}
fn default_retry_backoff() -> u64 {
    1000
}
fn default_strategy() -> String {
    "load-balanced".to_string()
}
fn default_event_capacity() -> usize {
    256
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            agent_stale_secs: default_agent_stale(),
            workflow_retention_secs: default_workflow_retention(),
            consensus_retention_secs: default_consensus_retention(),
            retry_backoff_ms: default_retry_backoff(),
            default_strategy: default_strategy(),
            relay_delegated_tasks: false,
            event_capacity: default_event_capacity(),
        }
    }
}

impl OrchestratorConfig {
    /// Maintenance period, at least one second.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    /// Delay before a retried task is scheduled again.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Silence after which an agent is dropped.
    pub fn agent_stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.agent_stale_secs as i64)
    }

    /// How long finished workflows are kept.
    pub fn workflow_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.workflow_retention_secs as i64)
    }

    /// How long resolved consensus requests are kept.
    pub fn consensus_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.consensus_retention_secs as i64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: OrchestratorConfig = toml::from_str("").unwrap();
        assert_eq!(config.tick_interval(), Duration::from_secs(5));
        assert_eq!(config.agent_stale_secs, 90);
        assert_eq!(config.workflow_retention_secs, 300);
        assert_eq!(config.consensus_retention(), chrono::Duration::seconds(300));
        assert_eq!(config.retry_backoff(), Duration::from_secs(1));
        assert_eq!(config.default_strategy, "load-balanced");
        assert!(!config.relay_delegated_tasks);
    }

    #[test]
    fn test_override() {
        let config: OrchestratorConfig =
            toml::from_str("default_strategy = \"round-robin\"\nretry_backoff_ms = 10").unwrap();
        assert_eq!(config.default_strategy, "round-robin");
        assert_eq!(config.retry_backoff_ms, 10);
    }
}
