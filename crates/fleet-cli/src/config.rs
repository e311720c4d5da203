use anyhow::Context;
use fleet_a2a::A2aConfig;
use fleet_orchestrator::{OrchestratorConfig, TaskSpec};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Contents of `fleet.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub agent: LocalAgentConfig,
    #[serde(default)]
    pub a2a: A2aConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
}

/// Identity of the orchestrator node on the bus.
#[derive(Debug, Deserialize)]
pub struct LocalAgentConfig {
    #[serde(default = "default_agent_id")]
    pub id: String,
    #[serde(default = "default_agent_name")]
    pub name: String,
    /// Capabilities advertised to other agents; relayed tasks must match one.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Default for LocalAgentConfig {
    fn default() -> Self {
        Self {
            id: default_agent_id(),
            name: default_agent_name(),
            capabilities: Vec::new(),
        }
    }
}

/// A simulated worker agent.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Simulated work time per task.
    #[serde(default)]
    pub latency_ms: u64,
    /// Fail every n-th task; 0 never fails.
    #[serde(default)]
    pub fail_every: u32,
}

fn default_agent_id() -> String {
    "orchestrator".to_string()
}
fn default_agent_name() -> String {
    "Fleet Orchestrator".to_string()
}

impl FleetConfig {
    /// Read `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Invalid config file '{}'", path.display()))
    }
}

/// A workflow definition file.
#[derive(Debug, Deserialize)]
pub struct WorkflowFile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Strategy name; the orchestrator default when unset.
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

impl WorkflowFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file '{}'", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Invalid workflow file '{}'", path.display()))
    }
}
