//! `fleet`: run workflows and consensus rounds on a simulated agent fleet.

mod config;
mod worker;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use config::{FleetConfig, WorkflowFile};
use fleet_a2a::{A2aClient, AgentCard, Capability};
use fleet_core::{InMemoryBus, MessageBus};
use fleet_orchestrator::{
    ConsensusConfig, ConsensusKind, Orchestrator, StrategyRegistry, WorkflowStatus,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use worker::SimulatedWorker;

#[derive(Parser)]
#[command(name = "fleet", about = "Fleet: workflow orchestration for agent fleets")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "fleet.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file on the simulated fleet and print the final snapshot
    Run {
        /// Workflow definition (TOML)
        workflow: PathBuf,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
    /// List registered strategies
    Strategies,
    /// Run one consensus round among simulated workers
    Vote {
        /// Participants; every configured worker when empty
        #[arg(long, value_delimiter = ',')]
        participants: Vec<String>,
        #[arg(long, value_enum, default_value_t = VoteKind::Majority)]
        kind: VoteKind,
        /// Workers that vote no
        #[arg(long, value_delimiter = ',')]
        reject: Vec<String>,
        #[arg(long, default_value = "proposal")]
        topic: String,
        #[arg(long, default_value_t = 5_000)]
        timeout_ms: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum VoteKind {
    Majority,
    Unanimous,
    Weighted,
    Byzantine,
}

impl From<VoteKind> for ConsensusKind {
    fn from(kind: VoteKind) -> Self {
        match kind {
            VoteKind::Majority => ConsensusKind::Majority,
            VoteKind::Unanimous => ConsensusKind::Unanimous,
            VoteKind::Weighted => ConsensusKind::Weighted,
            VoteKind::Byzantine => ConsensusKind::Byzantine,
        }
    }
}

struct Fleet {
    orchestrator: Arc<Orchestrator>,
    workers: Vec<SimulatedWorker>,
}

impl Fleet {
    /// Start the workers and the orchestrator on one bus and wait until the
    /// orchestrator has discovered every worker.
    async fn launch(config: &FleetConfig, rejecting: &[String]) -> anyhow::Result<Self> {
        let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::default());

        let workers = config
            .workers
            .iter()
            .map(|w| {
                SimulatedWorker::spawn(&bus, w, config.a2a.clone(), !rejecting.contains(&w.id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let card = config.agent.capabilities.iter().fold(
            AgentCard::new(&config.agent.id, &config.agent.name),
            |card, cap| card.with_capability(Capability::new(cap, format!("Relayed {cap}"))),
        );
        let a2a = Arc::new(A2aClient::new(card, Arc::clone(&bus), config.a2a.clone())?);
        let orchestrator = Arc::new(Orchestrator::new(a2a, bus, config.orchestrator.clone()));
        orchestrator.start();

        orchestrator.a2a().discover_agents().await?;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while orchestrator.agents().await.len() < workers.len() {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    expected = workers.len(),
                    found = orchestrator.agents().await.len(),
                    "Not every worker answered discovery"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        info!(workers = workers.len(), "Fleet ready");
        Ok(Self {
            orchestrator,
            workers,
        })
    }

    async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
        for worker in &self.workers {
            worker.shutdown();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = FleetConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run {
            workflow,
            timeout_secs,
        } => {
            let file = WorkflowFile::load(&workflow)?;
            let fleet = Fleet::launch(&config, &[]).await?;
            let orchestrator = &fleet.orchestrator;

            let created = orchestrator
                .create_workflow(&file.name, &file.description, file.tasks)
                .await?;
            orchestrator
                .start_workflow(&created.id, file.strategy.as_deref())
                .await?;
            let finished = orchestrator
                .wait_for_workflow(&created.id, Duration::from_secs(timeout_secs))
                .await;
            fleet.shutdown().await;

            let finished = finished.context("Workflow did not finish")?;
            println!("{}", serde_json::to_string_pretty(&finished)?);
            if finished.status != WorkflowStatus::Completed {
                anyhow::bail!("Workflow '{}' finished as {:?}", finished.name, finished.status);
            }
        }
        Commands::Strategies => {
            let strategies = StrategyRegistry::with_defaults().list();
            println!("Registered strategies:");
            for strategy in &strategies {
                println!("  {}: {}", strategy.name, strategy.description);
            }
            println!("\nDefault: {}", config.orchestrator.default_strategy);
        }
        Commands::Vote {
            participants,
            kind,
            reject,
            topic,
            timeout_ms,
        } => {
            let participants = if participants.is_empty() {
                config.workers.iter().map(|w| w.id.clone()).collect()
            } else {
                participants
            };
            let fleet = Fleet::launch(&config, &reject).await?;
            let orchestrator = &fleet.orchestrator;

            let request = orchestrator
                .request_consensus(
                    &topic,
                    serde_json::Value::Null,
                    &participants,
                    ConsensusConfig::new(kind.into()).with_timeout_ms(timeout_ms),
                )
                .await?;
            let resolved = orchestrator.wait_for_consensus(&request.id).await;
            fleet.shutdown().await;

            println!("{}", serde_json::to_string_pretty(&resolved?)?);
        }
    }

    Ok(())
}
