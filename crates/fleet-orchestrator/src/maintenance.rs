use crate::consensus::ConsensusCoordinator;
use crate::engine::WorkflowEngine;
use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Spawn the periodic maintenance pass: health checks, load-imbalance
/// signalling, workflow garbage collection and pruning of resolved consensus
/// requests. Abort the handle to stop it.
pub fn spawn_orchestration_loop(
    engine: WorkflowEngine,
    consensus: ConsensusCoordinator,
    every: Duration,
) -> JoinHandle<()> {
    info!(interval_ms = every.as_millis() as u64, "Orchestration loop started");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            debug!("Orchestration tick");
            let now = Utc::now();
            engine.maintenance_tick(now).await;
            consensus
                .prune(now, engine.config().consensus_retention())
                .await;
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::consensus::{ConsensusConfig, ConsensusKind};
    use crate::dispatch::TaskDispatcher;
    use crate::types::{Agent, WorkflowTask};
    use async_trait::async_trait;
    use fleet_core::{EventBus, FleetResult, InMemoryBus};
    use std::sync::Arc;

    struct NullDispatcher;

    #[async_trait]
    impl TaskDispatcher for NullDispatcher {
        async fn dispatch(&self, _: &str, _: &str, _: &WorkflowTask, _: &str) -> FleetResult<()> {
            Ok(())
        }
    }

    fn parts(config: OrchestratorConfig) -> (WorkflowEngine, ConsensusCoordinator) {
        let events = EventBus::default();
        let engine = WorkflowEngine::new(Arc::new(NullDispatcher), events.clone(), config);
        let consensus = ConsensusCoordinator::new("orchestrator", Arc::new(InMemoryBus::default()), events);
        (engine, consensus)
    }

    #[tokio::test]
    async fn test_loop_drops_stale_agents() {
        let (engine, consensus) = parts(OrchestratorConfig::default());
        let mut old = Agent::new("old", "Old", ["x"]);
        old.last_seen = Utc::now() - chrono::Duration::seconds(600);
        engine.register_agent(old).await;
        engine.register_agent(Agent::new("fresh", "Fresh", ["x"])).await;

        let handle = spawn_orchestration_loop(engine.clone(), consensus, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        let ids: Vec<String> = engine.agents().await.into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_loop_prunes_resolved_consensus() {
        let (engine, consensus) = parts(OrchestratorConfig {
            consensus_retention_secs: 0,
            ..Default::default()
        });
        let request = consensus
            .request_consensus(
                "deploy",
                serde_json::Value::Null,
                &["a".to_string()],
                ConsensusConfig::new(ConsensusKind::Majority),
            )
            .await
            .unwrap();
        consensus.submit_vote(&request.id, "a", true, None, None).await.unwrap();

        let handle = spawn_orchestration_loop(engine, consensus.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(consensus.request(&request.id).await.is_none());
        assert!(consensus.requests().await.is_empty());
    }
}
