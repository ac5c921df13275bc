use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use scheduler_domain::config::{ConfigSeverity, SchedulerConfig};

use scheduler_runtime::{Bootstrap, BootstrapOptions, EventBus, InMemoryTaskRepository, NoopActionDispatcher, SchedulingEngine, TaskExecutor};

#[derive(Parser, Debug)]
#[command(name = "scheduler", about = "Recurring-action scheduler")]
struct Cli {
    /// Path to a TOML config file. Missing file falls back to defaults.
    #[arg(long, default_value = "scheduler.toml")]
    config: PathBuf,

    /// Emit structured JSON logs instead of the default text format.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(&cli.config)?;
    run(config).await
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,scheduler_runtime=debug"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn load_config(path: &PathBuf) -> anyhow::Result<SchedulerConfig> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(SchedulerConfig::default());
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("reading config at {}", path.display()))?;
    let config: SchedulerConfig = toml::from_str(&text).with_context(|| format!("parsing config at {}", path.display()))?;
    Ok(config)
}

async fn run(config: SchedulerConfig) -> anyhow::Result<()> {
    tracing::info!("scheduler starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if SchedulerConfig::has_errors(&issues) {
        anyhow::bail!("config validation failed with {} error(s)", issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count());
    }
    let config = config.clamped();

    let event_bus = Arc::new(EventBus::default());
    spawn_event_logger(event_bus.clone());

    let repository: Arc<dyn scheduler_runtime::TaskRepository> = Arc::new(InMemoryTaskRepository::new());
    tracing::info!("in-memory task repository ready");

    let dispatcher = Arc::new(NoopActionDispatcher);
    let executor = Arc::new(TaskExecutor::new(config.executor.clone(), dispatcher, event_bus.clone()));
    tracing::info!(max_concurrent_tasks = config.executor.max_concurrent_tasks, "task executor ready");

    let engine = SchedulingEngine::new(config.engine.clone(), repository.clone(), executor.clone(), event_bus.clone());
    tracing::info!(check_interval_secs = config.engine.check_interval_secs, "scheduling engine ready");

    let bootstrap = Bootstrap::new(engine, executor, repository, event_bus);
    bootstrap.initialize(BootstrapOptions { auto_start: true, load_existing: true }).await?;
    tracing::info!("scheduler started");

    // The bootstrap's own signal handler drives graceful shutdown and
    // exits the process; this future simply keeps `main` alive until then.
    std::future::pending::<()>().await;
    Ok(())
}

fn spawn_event_logger(event_bus: Arc<EventBus>) {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => tracing::info!(event = ?event, "scheduler event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event logger lagged behind the event bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
