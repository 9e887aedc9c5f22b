use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use testrollup::config::Settings;
use testrollup::joint::{ChannelNotifier, InMemoryJointStore, JointEvent, SweepReport};
use testrollup::paths::PathResolver;
use testrollup::rates::{compute_status_histogram, StatusShare};
use testrollup::repository::{InMemoryRepository, ReportRepository, Snapshot};
use testrollup::{
    DispatchSummary, ExecutionRequest, InboundEvent, JointCoordinator, JointExecutionRequest,
    RateCalculator, ReportingService,
};

#[derive(Parser)]
#[command(
    name = "testrollup",
    version,
    about = "Roll up test statuses and rates, resolve log record paths, replay joint request events"
)]
struct Cli {
    /// Settings file (TOML). TESTROLLUP__* environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level. RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the rates of an execution request
    Rates {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        request: Uuid,
    },
    /// Print the count and rate of every status of an execution request
    Histogram {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        request: Uuid,
    },
    /// Print the ancestor path of a log record
    Path {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        record: Uuid,
    },
    /// Apply a JSON array of events, run one timeout sweep and print the
    /// resulting state
    Replay {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        events: PathBuf,
    },
}

#[derive(Serialize)]
struct ReplayOutput {
    events: DispatchSummary,
    sweep: SweepReport,
    joint_requests: Vec<JointExecutionRequest>,
    notifications: Vec<JointEvent>,
    execution_requests: Vec<ExecutionRequest>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;

    match cli.command {
        Commands::Rates { snapshot, request } => {
            let repository = load_repository(&snapshot)?;
            let rates = RateCalculator::new(repository)
                .request_rates(request)
                .await
                .with_context(|| format!("failed to compute rates for {}", request))?;
            print_json(&rates)
        }
        Commands::Histogram { snapshot, request } => {
            let repository = load_repository(&snapshot)?;
            let execution_request = repository
                .get_execution_request(request)
                .await?
                .with_context(|| format!("execution request {} not found", request))?;
            let runs = repository.runs_for_request(request).await?;
            let histogram: BTreeMap<&str, StatusShare> =
                compute_status_histogram(&execution_request, &runs)?
                    .into_iter()
                    .map(|(status, share)| (status.as_str(), share))
                    .collect();
            print_json(&histogram)
        }
        Commands::Path { snapshot, record } => {
            let repository = load_repository(&snapshot)?;
            let path = PathResolver::new(repository)
                .with_max_depth(settings.paths.max_depth)
                .resolve_record_path(record)
                .await;
            print_json(&path)
        }
        Commands::Replay { snapshot, events } => {
            let repository = load_repository(&snapshot)?;
            let events = load_events(&events)?;
            let output = replay(&settings, repository, events).await?;
            print_json(&output)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = if verbose > 0 { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_repository(path: &Path) -> Result<Arc<InMemoryRepository>> {
    let snapshot = Snapshot::load(path)?;
    Ok(Arc::new(InMemoryRepository::from_snapshot(snapshot)))
}

fn load_events(path: &Path) -> Result<Vec<InboundEvent>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid events file {}", path.display()))
}

async fn replay(
    settings: &Settings,
    repository: Arc<InMemoryRepository>,
    events: Vec<InboundEvent>,
) -> Result<ReplayOutput> {
    let (notifier, mut notifications) = ChannelNotifier::channel();
    let store = Arc::new(InMemoryJointStore::new());
    let coordinator = Arc::new(JointCoordinator::new(
        Arc::clone(&store),
        Arc::new(notifier),
        settings.joint.clone(),
    ));
    let service = ReportingService::new(
        Arc::clone(&repository),
        Arc::clone(&coordinator),
        settings.priority()?,
    );

    // buffered to the full batch, so queueing never waits on the consumer
    let (sender, receiver) = mpsc::channel(events.len().max(1));
    for event in events {
        sender.send(event).await.context("event channel closed")?;
    }
    drop(sender);
    let summary = service.run(receiver).await;
    let sweep = coordinator.sweep_timeouts().await?;

    let mut emitted = Vec::new();
    while let Ok(event) = notifications.try_recv() {
        emitted.push(event);
    }
    let mut execution_requests = repository.snapshot().await.execution_requests;
    execution_requests.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

    Ok(ReplayOutput {
        events: summary,
        sweep,
        joint_requests: store.all().await,
        notifications: emitted,
        execution_requests,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
