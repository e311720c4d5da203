//! Pluggable agent-selection and failure policies.

use crate::types::{Agent, WorkflowTask, LOAD_CEILING, LOAD_STEP};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// What the engine does with a task after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureAction {
    /// Put the task back after the retry backoff.
    Retry,
    /// Put the task back and schedule it again right away.
    Reassign,
    /// Give up on the task.
    Fail,
}

/// Decides which agent runs a task and how failures are handled.
pub trait OrchestrationStrategy: Send + Sync {
    /// Registry key, e.g. `round-robin`.
    fn name(&self) -> &str;

    /// One-line summary for listings.
    fn description(&self) -> &str;

    /// Pick an agent for `task` among `agents`, or `None` if nobody fits.
    fn select_agent(&self, agents: &[Agent], task: &WorkflowTask) -> Option<String>;

    /// Called after `task.retry_count` was incremented for the failed attempt.
    fn handle_failure(&self, task: &WorkflowTask, agent: &mut Agent, error: &str) -> FailureAction;

    /// Spread `tasks` over `agents` without mutating either.
    fn balance_load(&self, agents: &[Agent], tasks: &[WorkflowTask]) -> HashMap<String, Vec<String>>;
}

/// Retry-or-reassign shared by the non-capability strategies.
fn retry_then_reassign(task: &WorkflowTask) -> FailureAction {
    if task.retry_count < task.max_retries {
        FailureAction::Retry
    } else {
        FailureAction::Reassign
    }
}

fn least_loaded<'a>(agents: impl Iterator<Item = &'a Agent>) -> Option<&'a Agent> {
    agents.min_by_key(|a| a.load)
}

// --- Round robin ---

/// Least-loaded idle agent that can run the task.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundRobinStrategy;

impl OrchestrationStrategy for RoundRobinStrategy {
    fn name(&self) -> &str {
        "round-robin"
    }

    fn description(&self) -> &str {
        "Rotates tasks across idle agents, lowest load first"
    }

    fn select_agent(&self, agents: &[Agent], task: &WorkflowTask) -> Option<String> {
        least_loaded(
            agents
                .iter()
                .filter(|a| a.is_idle() && a.can_run(&task.task_type)),
        )
        .map(|a| a.id.clone())
    }

    fn handle_failure(&self, task: &WorkflowTask, _agent: &mut Agent, _error: &str) -> FailureAction {
        retry_then_reassign(task)
    }

    fn balance_load(&self, agents: &[Agent], tasks: &[WorkflowTask]) -> HashMap<String, Vec<String>> {
        let idle: Vec<&Agent> = agents.iter().filter(|a| a.is_idle()).collect();
        let mut plan: HashMap<String, Vec<String>> = HashMap::new();
        if idle.is_empty() {
            return plan;
        }
        for (i, task) in tasks.iter().enumerate() {
            let agent = idle[i % idle.len()];
            plan.entry(agent.id.clone()).or_default().push(task.id.clone());
        }
        plan
    }
}

// --- Load balanced ---

/// Global least-loaded agent under the load ceiling. Failing agents are
/// penalized so the next pick goes elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadBalancedStrategy;

impl OrchestrationStrategy for LoadBalancedStrategy {
    fn name(&self) -> &str {
        "load-balanced"
    }

    fn description(&self) -> &str {
        "Sends each task to the least-loaded capable agent under 80% load"
    }

    fn select_agent(&self, agents: &[Agent], task: &WorkflowTask) -> Option<String> {
        least_loaded(
            agents
                .iter()
                .filter(|a| a.can_run(&task.task_type) && a.load < LOAD_CEILING),
        )
        .map(|a| a.id.clone())
    }

    fn handle_failure(&self, task: &WorkflowTask, agent: &mut Agent, _error: &str) -> FailureAction {
        agent.adjust_load(LOAD_STEP);
        retry_then_reassign(task)
    }

    fn balance_load(&self, agents: &[Agent], tasks: &[WorkflowTask]) -> HashMap<String, Vec<String>> {
        let mut ordered: Vec<&WorkflowTask> = tasks.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut simulated: HashMap<&str, u32> =
            agents.iter().map(|a| (a.id.as_str(), a.load)).collect();
        let mut plan: HashMap<String, Vec<String>> = HashMap::new();

        for task in ordered {
            let pick = agents
                .iter()
                .filter(|a| a.is_idle() && a.can_run(&task.task_type))
                .filter(|a| simulated[a.id.as_str()] < LOAD_CEILING)
                .min_by_key(|a| simulated[a.id.as_str()]);
            if let Some(agent) = pick {
                plan.entry(agent.id.clone()).or_default().push(task.id.clone());
                if let Some(load) = simulated.get_mut(agent.id.as_str()) {
                    *load = (*load + LOAD_STEP as u32).min(100);
                }
            }
        }
        plan
    }
}

// --- Capability based ---

/// Exact capability match, preferring the agent that covers most of the
/// task's required capabilities.
#[derive(Debug, Default, Clone, Copy)]
pub struct CapabilityBasedStrategy;

impl CapabilityBasedStrategy {
    fn coverage(agent: &Agent, task: &WorkflowTask) -> usize {
        task.required_capabilities
            .iter()
            .filter(|c| agent.has_capability(c))
            .count()
    }
}

impl OrchestrationStrategy for CapabilityBasedStrategy {
    fn name(&self) -> &str {
        "capability-based"
    }

    fn description(&self) -> &str {
        "Matches task type exactly and prefers the best capability coverage"
    }

    fn select_agent(&self, agents: &[Agent], task: &WorkflowTask) -> Option<String> {
        let mut best: Option<(&Agent, usize)> = None;
        for agent in agents.iter().filter(|a| a.has_capability(&task.task_type)) {
            let score = Self::coverage(agent, task);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((agent, score));
            }
        }
        best.map(|(agent, _)| agent.id.clone())
    }

    fn handle_failure(&self, _task: &WorkflowTask, _agent: &mut Agent, _error: &str) -> FailureAction {
        FailureAction::Reassign
    }

    fn balance_load(&self, agents: &[Agent], tasks: &[WorkflowTask]) -> HashMap<String, Vec<String>> {
        let mut plan: HashMap<String, Vec<String>> = HashMap::new();
        for task in tasks {
            let pick = least_loaded(
                agents
                    .iter()
                    .filter(|a| a.is_idle() && a.has_capability(&task.task_type)),
            );
            if let Some(agent) = pick {
                plan.entry(agent.id.clone()).or_default().push(task.id.clone());
            }
        }
        plan
    }
}

// --- Registry ---

/// Name and description of a registered strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyInfo {
    /// Registry key.
    pub name: String,
    /// One-line summary.
    pub description: String,
}

/// Strategies by name.
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn OrchestrationStrategy>>,
}

impl StrategyRegistry {
    /// Registry with no strategies.
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Registry holding the three built-in strategies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(RoundRobinStrategy));
        registry.register(Arc::new(LoadBalancedStrategy));
        registry.register(Arc::new(CapabilityBasedStrategy));
        registry
    }

    /// Add a strategy, replacing any with the same name.
    pub fn register(&mut self, strategy: Arc<dyn OrchestrationStrategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    /// Strategy registered as `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn OrchestrationStrategy>> {
        self.strategies.get(name).cloned()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Registered strategies sorted by name.
    pub fn list(&self) -> Vec<StrategyInfo> {
        let mut infos: Vec<StrategyInfo> = self
            .strategies
            .values()
            .map(|s| StrategyInfo {
                name: s.name().to_string(),
                description: s.description().to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{AgentStatus, TaskPriority, TaskStatus, ANY_TASK_TYPE};
    use serde_json::{Map, Value};

    fn agent(id: &str, caps: &[&str], load: u32) -> Agent {
        let mut agent = Agent::new(id, id, caps.iter().copied());
        agent.load = load;
        agent
    }

    fn task(id: &str, task_type: &str) -> WorkflowTask {
        WorkflowTask {
            id: id.into(),
            key: id.into(),
            task_type: task_type.into(),
            description: String::new(),
            input: Value::Null,
            output: None,
            status: TaskStatus::Pending,
            assigned_agent: None,
            dependencies: vec![],
            retry_count: 0,
            max_retries: 2,
            timeout_ms: 1000,
            priority: TaskPriority::Normal,
            required_capabilities: vec![],
            metadata: Map::new(),
            started_at: None,
            ended_at: None,
            last_error: None,
            delegation_id: None,
        }
    }

    #[test]
    fn test_round_robin_picks_lowest_idle_capable() {
        let mut busy = agent("busy", &["search"], 0);
        busy.status = AgentStatus::Busy;
        let agents = vec![
            agent("a", &["search"], 40),
            busy,
            agent("b", &["search"], 20),
            agent("c", &["write"], 0),
        ];
        let picked = RoundRobinStrategy.select_agent(&agents, &task("t", "search"));
        assert_eq!(picked.as_deref(), Some("b"));
    }

    #[test]
    fn test_any_type_matches_everyone() {
        let agents = vec![agent("a", &["search"], 40), agent("b", &["write"], 10)];
        let t = task("t", ANY_TASK_TYPE);
        assert_eq!(RoundRobinStrategy.select_agent(&agents, &t).as_deref(), Some("b"));
        assert_eq!(LoadBalancedStrategy.select_agent(&agents, &t).as_deref(), Some("b"));
        assert!(CapabilityBasedStrategy.select_agent(&agents, &t).is_none());
    }

    #[test]
    fn test_load_balanced_respects_ceiling() {
        let agents = vec![agent("a", &["x"], 80), agent("b", &["x"], 90)];
        assert!(LoadBalancedStrategy
            .select_agent(&agents, &task("t", "x"))
            .is_none());

        let agents = vec![agent("a", &["x"], 60), agent("b", &["x"], 20)];
        assert_eq!(
            LoadBalancedStrategy
                .select_agent(&agents, &task("t", "x"))
                .as_deref(),
            Some("b")
        );
    }

    #[test]
    fn test_capability_based_prefers_coverage() {
        let agents = vec![
            agent("a", &["code"], 0),
            agent("b", &["code", "rust", "tests"], 50),
            agent("c", &["code", "rust", "tests"], 0),
        ];
        let mut t = task("t", "code");
        t.required_capabilities = vec!["rust".into(), "tests".into()];
        assert_eq!(
            CapabilityBasedStrategy.select_agent(&agents, &t).as_deref(),
            Some("b")
        );

        t.required_capabilities.clear();
        assert_eq!(
            CapabilityBasedStrategy.select_agent(&agents, &t).as_deref(),
            Some("a")
        );
    }

    #[test]
    fn test_failure_policies() {
        let mut a = agent("a", &["x"], 0);
        let mut t = task("t", "x");
        t.retry_count = 1;
        assert_eq!(RoundRobinStrategy.handle_failure(&t, &mut a, "boom"), FailureAction::Retry);
        t.retry_count = 2;
        assert_eq!(
            RoundRobinStrategy.handle_failure(&t, &mut a, "boom"),
            FailureAction::Reassign
        );
        assert_eq!(a.load, 0);

        t.retry_count = 1;
        assert_eq!(LoadBalancedStrategy.handle_failure(&t, &mut a, "boom"), FailureAction::Retry);
        assert_eq!(a.load, 20);

        assert_eq!(
            CapabilityBasedStrategy.handle_failure(&t, &mut a, "boom"),
            FailureAction::Reassign
        );
    }

    #[test]
    fn test_load_balanced_penalty_clamps() {
        let mut a = agent("a", &["x"], 95);
        let t = task("t", "x");
        LoadBalancedStrategy.handle_failure(&t, &mut a, "boom");
        assert_eq!(a.load, 100);
    }

    #[test]
    fn test_round_robin_balance_deals_by_index() {
        let agents = vec![agent("a", &["x"], 0), agent("b", &["x"], 0)];
        let tasks: Vec<WorkflowTask> = (0..5).map(|i| task(&format!("t{i}"), "x")).collect();
        let plan = RoundRobinStrategy.balance_load(&agents, &tasks);
        assert_eq!(plan["a"], vec!["t0", "t2", "t4"]);
        assert_eq!(plan["b"], vec!["t1", "t3"]);
    }

    #[test]
    fn test_load_balanced_balance_simulates_load() {
        let agents = vec![agent("a", &["x"], 0), agent("b", &["x"], 30)];
        let mut low = task("low", "x");
        low.priority = TaskPriority::Low;
        let mut crit = task("crit", "x");
        crit.priority = TaskPriority::Critical;
        let tasks = vec![low, task("n1", "x"), crit, task("n2", "x")];

        let plan = LoadBalancedStrategy.balance_load(&agents, &tasks);
        // crit and n1 push a to 40, n2 goes to b (30), low returns to a
        assert_eq!(plan["a"], vec!["crit", "n1", "low"]);
        assert_eq!(plan["b"], vec!["n2"]);
    }

    #[test]
    fn test_capability_balance_uses_exact_match() {
        let agents = vec![agent("a", &["x"], 10), agent("b", &["y"], 0)];
        let tasks = vec![task("t1", "x"), task("t2", "y"), task("t3", "z")];
        let plan = CapabilityBasedStrategy.balance_load(&agents, &tasks);
        assert_eq!(plan["a"], vec!["t1"]);
        assert_eq!(plan["b"], vec!["t2"]);
        assert_eq!(plan.values().map(Vec::len).sum::<usize>(), 2);
    }

    #[test]
    fn test_registry() {
        let registry = StrategyRegistry::with_defaults();
        let names: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["capability-based", "load-balanced", "round-robin"]);
        assert!(registry.get("round-robin").is_some());
        assert!(registry.get("random").is_none());
    }
}
