use serde::Deserialize;
use std::time::Duration;

/// Timers and limits for an [`A2aClient`](crate::A2aClient).
#[derive(Debug, Clone, Deserialize)]
pub struct A2aConfig {
    /// Heartbeat broadcast interval in seconds (default: 30).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Discovery re-broadcast interval in seconds (default: 300).
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,
    /// Cleanup sweep interval in seconds (default: 3600).
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// How long to wait for a capability query answer (default: 10 000 ms).
    #[serde(default = "default_query_timeout")]
    pub capability_query_timeout_ms: u64,
    /// Timeout stamped on delegations that do not set one (default: 30 000 ms).
    #[serde(default = "default_task_timeout")]
    pub default_task_timeout_ms: u64,
    /// Settled delegation records are kept this long (default: 3600 s).
    #[serde(default = "default_retention")]
    pub delegation_retention_secs: u64,
    /// Directory entries unseen for this long are dropped (default: 900 s).
    #[serde(default = "default_directory_stale")]
    pub directory_stale_secs: u64,
    /// Shared HMAC secret. Without one, messages are not authenticated.
    #[serde(default)]
    pub signing_secret: Option<String>,
    /// Capacity of the A2A event channel (default: 256).
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_heartbeat_interval() -> u64 {
    30
}
fn default_discovery_interval() -> u64 {
    300
}
fn default_cleanup_interval() -> u64 {
    3600
}
fn default_query_timeout() -> u64 {
    10_000
}
fn default_task_timeout() -> u64 {
    30_000
}
fn default_retention() -> u64 {
    3600
}
fn default_directory_stale() -> u64 {
    900
}
fn default_event_capacity() -> usize {
    256
}

impl Default for A2aConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            discovery_interval_secs: default_discovery_interval(),
            cleanup_interval_secs: default_cleanup_interval(),
            capability_query_timeout_ms: default_query_timeout(),
            default_task_timeout_ms: default_task_timeout(),
            delegation_retention_secs: default_retention(),
            directory_stale_secs: default_directory_stale(),
            signing_secret: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl A2aConfig {
    /// Heartbeat period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Period of discovery announcements.
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs.max(1))
    }

    /// Period of [`A2aClient::cleanup`](crate::A2aClient::cleanup).
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    /// How long a capability query waits for an answer.
    pub fn capability_query_timeout(&self) -> Duration {
        Duration::from_millis(self.capability_query_timeout_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: A2aConfig = toml::from_str("").unwrap();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.discovery_interval(), Duration::from_secs(300));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(3600));
        assert_eq!(config.capability_query_timeout(), Duration::from_secs(10));
        assert_eq!(config.default_task_timeout_ms, 30_000);
        assert!(config.signing_secret.is_none());
    }

    #[test]
    fn test_overrides() {
        let config: A2aConfig =
            toml::from_str("heartbeat_interval_secs = 5\nsigning_secret = \"s3cret\"").unwrap();
        assert_eq!(config.heartbeat_interval_secs, 5);
        assert_eq!(config.signing_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.discovery_interval_secs, 300);
    }
}
