use crate::types::{Agent, AgentStatus, LOAD_CEILING, LOAD_STEP};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Below this load an idle agent counts as underused.
const UNDERLOAD_FLOOR: u32 = 20;

/// Agents known to the engine, keyed and iterated by id.
#[derive(Debug, Default)]
pub struct AgentPool {
    agents: BTreeMap<String, Agent>,
}

/// Agents on either side of a load imbalance.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadImbalance {
    /// Agents whose load is above the ceiling.
    pub overloaded: Vec<String>,
    /// Idle agents below the underload floor.
    pub underloaded: Vec<String>,
}

impl AgentPool {
    /// Empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent, or refresh name, capabilities and metadata of a known
    /// one while keeping its status and load. Returns `true` for new agents.
    pub fn register(&mut self, agent: Agent) -> bool {
        match self.agents.get_mut(&agent.id) {
            Some(existing) => {
                existing.name = agent.name;
                existing.capabilities = agent.capabilities;
                existing.metadata = agent.metadata;
                existing.last_seen = agent.last_seen.max(existing.last_seen);
                false
            }
            None => {
                self.agents.insert(agent.id.clone(), agent);
                true
            }
        }
    }

    /// Drop `agent_id` from the pool.
    pub fn remove(&mut self, agent_id: &str) -> Option<Agent> {
        self.agents.remove(agent_id)
    }

    /// Agent by id.
    pub fn get(&self, agent_id: &str) -> Option<&Agent> {
        self.agents.get(agent_id)
    }

    /// Mutable agent by id.
    pub fn get_mut(&mut self, agent_id: &str) -> Option<&mut Agent> {
        self.agents.get_mut(agent_id)
    }

    /// Whether `agent_id` is registered.
    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    /// Mark an agent as seen. Offline or errored agents come back idle.
    /// Returns `true` if the agent became schedulable again.
    pub fn touch(&mut self, agent_id: &str, at: DateTime<Utc>) -> bool {
        let Some(agent) = self.agents.get_mut(agent_id) else {
            return false;
        };
        agent.last_seen = at;
        if matches!(agent.status, AgentStatus::Offline | AgentStatus::Error) {
            agent.status = AgentStatus::Idle;
            return true;
        }
        false
    }

    /// Mark an agent busy with one more task.
    pub fn assign(&mut self, agent_id: &str) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.status = AgentStatus::Busy;
            agent.adjust_load(LOAD_STEP);
        }
    }

    /// Return an agent to idle after a task settles.
    pub fn release(&mut self, agent_id: &str) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            if agent.status == AgentStatus::Busy {
                agent.status = AgentStatus::Idle;
            }
            agent.adjust_load(-LOAD_STEP);
        }
    }

    /// Snapshot of idle agents in id order.
    pub fn idle(&self) -> Vec<Agent> {
        self.agents.values().filter(|a| a.is_idle()).cloned().collect()
    }

    /// Snapshot of every agent, sorted by id.
    pub fn list(&self) -> Vec<Agent> {
        self.agents.values().cloned().collect()
    }

    /// Ids of agents not seen since `now - max_age`.
    pub fn stale(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<String> {
        let cutoff = now - max_age;
        self.agents
            .values()
            .filter(|a| a.last_seen < cutoff)
            .map(|a| a.id.clone())
            .collect()
    }

    /// Agents that are not offline.
    pub fn active_count(&self) -> usize {
        self.agents
            .values()
            .filter(|a| a.status != AgentStatus::Offline)
            .count()
    }

    /// Overloaded agents alongside idle, underused ones.
    pub fn imbalance(&self) -> Option<LoadImbalance> {
        let overloaded: Vec<String> = self
            .agents
            .values()
            .filter(|a| a.load > LOAD_CEILING)
            .map(|a| a.id.clone())
            .collect();
        let underloaded: Vec<String> = self
            .agents
            .values()
            .filter(|a| a.is_idle() && a.load < UNDERLOAD_FLOOR)
            .map(|a| a.id.clone())
            .collect();
        if overloaded.is_empty() || underloaded.is_empty() {
            return None;
        }
        Some(LoadImbalance {
            overloaded,
            underloaded,
        })
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_register_keeps_runtime_state() {
        let mut pool = AgentPool::new();
        assert!(pool.register(Agent::new("w1", "Worker", ["search"])));
        pool.assign("w1");

        assert!(!pool.register(Agent::new("w1", "Worker v2", ["search", "summarize"])));
        let agent = pool.get("w1").unwrap();
        assert_eq!(agent.name, "Worker v2");
        assert_eq!(agent.capabilities.len(), 2);
        assert_eq!(agent.status, AgentStatus::Busy);
        assert_eq!(agent.load, 20);
    }

    #[test]
    fn test_assign_and_release() {
        let mut pool = AgentPool::new();
        pool.register(Agent::new("w1", "Worker", ["x"]));
        pool.assign("w1");
        assert!(pool.idle().is_empty());
        pool.release("w1");
        let agent = pool.get("w1").unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.load, 0);

        pool.release("w1");
        assert_eq!(pool.get("w1").unwrap().load, 0);
    }

    #[test]
    fn test_touch_revives_offline() {
        let mut pool = AgentPool::new();
        pool.register(Agent::new("w1", "Worker", ["x"]));
        pool.get_mut("w1").unwrap().status = AgentStatus::Offline;
        assert_eq!(pool.active_count(), 0);

        assert!(pool.touch("w1", Utc::now()));
        assert_eq!(pool.get("w1").unwrap().status, AgentStatus::Idle);
        assert!(!pool.touch("w1", Utc::now()));
        assert!(!pool.touch("ghost", Utc::now()));
    }

    #[test]
    fn test_stale() {
        let mut pool = AgentPool::new();
        let now = Utc::now();
        let mut old = Agent::new("old", "Old", ["x"]);
        old.last_seen = now - Duration::seconds(120);
        pool.register(old);
        pool.register(Agent::new("fresh", "Fresh", ["x"]));
        assert_eq!(pool.stale(now, Duration::seconds(90)), vec!["old"]);
    }

    #[test]
    fn test_imbalance() {
        let mut pool = AgentPool::new();
        pool.register(Agent::new("hot", "Hot", ["x"]));
        pool.register(Agent::new("cold", "Cold", ["x"]));
        assert!(pool.imbalance().is_none());

        pool.get_mut("hot").unwrap().load = 100;
        pool.get_mut("hot").unwrap().status = AgentStatus::Busy;
        let imbalance = pool.imbalance().unwrap();
        assert_eq!(imbalance.overloaded, vec!["hot"]);
        assert_eq!(imbalance.underloaded, vec!["cold"]);

        pool.get_mut("cold").unwrap().status = AgentStatus::Busy;
        assert!(pool.imbalance().is_none());
    }
}
