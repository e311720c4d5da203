//! Two A2A clients talking over one in-memory bus.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use fleet_a2a::*;
use fleet_core::{FleetError, InMemoryBus, MessageBus};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn card(id: &str, caps: &[&str]) -> AgentCard {
    caps.iter().fold(AgentCard::new(id, id.to_uppercase()), |card, cap| {
        card.with_capability(Capability::new(*cap, format!("{cap} things")))
    })
}

fn spawn_client(
    bus: &Arc<InMemoryBus>,
    id: &str,
    caps: &[&str],
    config: A2aConfig,
) -> Arc<A2aClient> {
    let bus: Arc<dyn MessageBus> = bus.clone();
    let client = Arc::new(A2aClient::new(card(id, caps), bus, config).unwrap());
    client.start();
    client
}

async fn wait_until_known(client: &A2aClient, other: &str) -> bool {
    for _ in 0..100 {
        if client.agent(other).await.is_some() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn discovered_pair(config: A2aConfig) -> (Arc<A2aClient>, Arc<A2aClient>) {
    let bus = Arc::new(InMemoryBus::default());
    let boss = spawn_client(&bus, "boss", &[], config.clone());
    let worker = spawn_client(&bus, "worker", &["summarize", "search"], config);
    boss.discover_agents().await.unwrap();
    assert!(wait_until_known(&boss, "worker").await);
    assert!(wait_until_known(&worker, "boss").await);
    (boss, worker)
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_mutual_discovery_is_idempotent() {
    let (boss, worker) = discovered_pair(A2aConfig::default()).await;

    boss.discover_agents().await.unwrap();
    worker.discover_agents().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(boss.agents().await.len(), 1);
    assert_eq!(worker.agents().await.len(), 1);
    let seen = boss.agent("worker").await.unwrap();
    assert_eq!(seen.capability_names(), vec!["summarize", "search"]);
    assert_eq!(seen.status, CardStatus::Online);
}

// ---------------------------------------------------------------------------
// Capability queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_capability_query_round_trip() {
    let (boss, _worker) = discovered_pair(A2aConfig::default()).await;

    let all = boss.query_capabilities("worker", None).await.unwrap();
    assert_eq!(all.len(), 2);

    let one = boss
        .query_capabilities("worker", Some("search"))
        .await
        .unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].name, "search");

    let none = boss
        .query_capabilities("worker", Some("translate"))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_capability_query_times_out() {
    let config = A2aConfig {
        capability_query_timeout_ms: 200,
        ..Default::default()
    };
    let (boss, worker) = discovered_pair(config).await;
    worker.shutdown();

    let err = boss.query_capabilities("worker", None).await.unwrap_err();
    assert!(matches!(err, FleetError::Timeout(_)));
}

// ---------------------------------------------------------------------------
// Delegation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_delegation_round_trip() {
    let (boss, worker) = discovered_pair(A2aConfig::default()).await;
    let mut worker_events = worker.subscribe();

    let responder = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move {
            loop {
                if let Ok(A2aEvent::TaskRequested(task)) = worker_events.recv().await {
                    let text = task.payload["text"].as_str().unwrap_or_default().to_string();
                    worker
                        .respond_to_task(&task.id, serde_json::json!({"summary": text.len()}), None)
                        .await
                        .unwrap();
                    return task.id;
                }
            }
        })
    };

    let record = boss
        .delegate_task(
            "worker",
            "summarize",
            serde_json::json!({"text": "hello fleet"}),
            DelegationOptions {
                priority: DelegationPriority::High,
                timeout_ms: Some(2_000),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(record.lifecycle.created.is_some());
    assert!(record.lifecycle.started.is_some());
    assert!(!record.is_settled());

    let answered = boss.wait_for_response(&record.id).await.unwrap();
    assert_eq!(answered.results, Some(serde_json::json!({"summary": 11})));
    assert!(answered.error.is_none());
    assert!(answered.lifecycle.completed.is_some());
    assert_eq!(responder.await.unwrap(), record.id);

    let worker_side = worker.task(&record.id).await.unwrap();
    assert!(worker_side.is_settled());
}

#[tokio::test]
async fn test_missing_capability_gets_error_response() {
    let (boss, _worker) = discovered_pair(A2aConfig::default()).await;

    let record = boss
        .delegate_task(
            "worker",
            "translate",
            serde_json::json!({}),
            DelegationOptions::default(),
        )
        .await
        .unwrap();
    let answered = boss.wait_for_response(&record.id).await.unwrap();
    assert!(answered.is_failed());
    assert_eq!(
        answered.error.as_deref(),
        Some("Capability translate not available")
    );
}

#[tokio::test]
async fn test_unanswered_delegation_times_out() {
    let (boss, _worker) = discovered_pair(A2aConfig::default()).await;

    let record = boss
        .delegate_task(
            "worker",
            "summarize",
            serde_json::json!({}),
            DelegationOptions {
                timeout_ms: Some(100),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let err = boss.wait_for_response(&record.id).await.unwrap_err();
    assert!(matches!(err, FleetError::Timeout(_)));
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_signed_fleet_discovers() {
    let config = A2aConfig {
        signing_secret: Some("shared".into()),
        ..Default::default()
    };
    let (boss, _worker) = discovered_pair(config).await;
    assert_eq!(boss.agents().await.len(), 1);
}

#[tokio::test]
async fn test_mismatched_secret_is_dropped() {
    let bus = Arc::new(InMemoryBus::default());
    let boss = spawn_client(
        &bus,
        "boss",
        &[],
        A2aConfig {
            signing_secret: Some("one".into()),
            ..Default::default()
        },
    );
    let worker = spawn_client(
        &bus,
        "worker",
        &["search"],
        A2aConfig {
            signing_secret: Some("two".into()),
            ..Default::default()
        },
    );
    let mut worker_events = worker.subscribe();

    boss.discover_agents().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(worker.agents().await.is_empty());
    assert!(boss.agents().await.is_empty());
    assert!(worker_events.try_recv().is_err());
}
