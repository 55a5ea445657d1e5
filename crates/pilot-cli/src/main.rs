mod config;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pilot_core::backend::{BackendRegistry, StdioBackend};
use pilot_core::dispatcher::Dispatcher;
use pilot_core::hooks::HookGateManager;
use pilot_core::scheduler::Scheduler;
use pilot_store::{queries, Execution, StoreError, Task};

use config::PilotConfig;

#[derive(Parser)]
#[command(name = "pilot", about = "Execution core for an autonomous coding-agent orchestrator")]
struct Cli {
    /// Override the execution store path for this invocation.
    #[arg(long, global = true)]
    store_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file at ~/.config/pilot/config.toml.
    Init,
    /// Run the dispatcher and scheduler until interrupted.
    Serve,
    /// Queue a task for execution and print its execution id.
    Submit {
        #[arg(long)]
        id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        project_path: String,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        create_pr: bool,
        #[arg(long, value_delimiter = ',')]
        labels: Vec<String>,
    },
    /// Print the status of a previously submitted execution.
    Status { exec_id: String },
    /// Print a best-effort, store-derived worker status snapshot.
    ///
    /// Reflects which projects currently have a running execution — not the
    /// live in-memory state of a `Dispatcher` in a separate `serve` process.
    WorkerStatus,
    /// Print a best-effort, store-derived scheduler status snapshot.
    ///
    /// `pending_count` is the number of rate-limited executions not yet
    /// re-queued; `running` and `next_retry` are always `false`/`None` since
    /// they reflect only a live `Scheduler`'s in-memory state, which this
    /// one-shot invocation has no access to.
    SchedulerStatus,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => cmd_init(),
        Commands::Serve => cmd_serve(cli.store_path.as_deref()).await,
        Commands::Submit {
            id,
            title,
            description,
            project_path,
            branch,
            create_pr,
            labels,
        } => {
            cmd_submit(
                cli.store_path.as_deref(),
                id,
                title,
                description,
                project_path,
                branch,
                create_pr,
                labels,
            )
            .await
        }
        Commands::Status { exec_id } => cmd_status(cli.store_path.as_deref(), &exec_id).await,
        Commands::WorkerStatus => cmd_worker_status(cli.store_path.as_deref()).await,
        Commands::SchedulerStatus => cmd_scheduler_status(cli.store_path.as_deref()).await,
    }
}

fn cmd_init() -> Result<()> {
    let path = config::config_path();
    if path.exists() {
        println!("config already exists at {}", path.display());
        return Ok(());
    }

    let default_config = config::ConfigFile {
        store: config::StoreSection {
            path: pilot_store::StoreConfig::default_path()
                .to_string_lossy()
                .into_owned(),
        },
        backend: config::BackendSection {
            command: "claude".to_string(),
            args: Vec::new(),
        },
        hooks: config::HooksSection::default(),
    };

    config::save_config(&default_config)?;
    println!("wrote config to {}", path.display());
    Ok(())
}

async fn open_pool(config: &PilotConfig) -> Result<sqlx::SqlitePool> {
    let pool = pilot_store::pool::create_pool(&config.store)
        .await
        .context("failed to open execution store")?;
    pilot_store::pool::run_migrations(&pool, pilot_store::pool::default_migrations_path())
        .await
        .context("failed to run store migrations")?;
    Ok(pool)
}

async fn cmd_serve(store_path: Option<&str>) -> Result<()> {
    let config = PilotConfig::resolve(store_path)?;
    let pool = open_pool(&config).await?;

    let mut registry = BackendRegistry::new();
    registry.register(
        StdioBackend::new(config.backend_command.clone()).with_args(config.backend_args.clone()),
    );
    let backend = registry
        .get("stdio")
        .context("stdio backend missing from registry immediately after registration")?;

    let mut dispatcher = Dispatcher::new(pool.clone(), backend, config.dispatcher_config.clone());
    if config.hook_config.enabled {
        dispatcher = dispatcher.with_hooks(Arc::new(HookGateManager::new()), config.hook_config);
    }

    let dispatcher = Arc::new(dispatcher);
    let retry_dispatcher = Arc::clone(&dispatcher);
    let on_retry: pilot_core::scheduler::RetryCallback = Arc::new(move |pending| {
        let dispatcher = Arc::clone(&retry_dispatcher);
        Box::pin(async move {
            if let Err(err) = dispatcher.queue_task(&pending.task).await {
                warn!(task_id = %pending.task.id, error = %err, "failed to re-queue retried task");
            }
        })
    });

    let on_expired: pilot_core::scheduler::ExpiredCallback = Arc::new(move |pending| {
        Box::pin(async move {
            warn!(
                task_id = %pending.task.id,
                attempts = pending.attempts,
                "task exhausted retry attempts, abandoning"
            );
        })
    });

    let scheduler = Arc::new(Scheduler::new(
        config.scheduler_config.clone(),
        on_expired,
        on_retry,
    ));

    dispatcher.start().await?;
    scheduler.start().await?;
    info!("pilot serve started");

    let cancel = CancellationToken::new();
    let cancel_signal = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nforce exit.");
                std::process::exit(130);
            }
            eprintln!("\nshutting down gracefully (Ctrl+C again to force)...");
            cancel_signal.cancel();
        }
    });

    cancel.cancelled().await;

    scheduler.stop().await;
    dispatcher.stop().await;
    pool.close().await;

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_submit(
    store_path: Option<&str>,
    id: String,
    title: String,
    description: String,
    project_path: String,
    branch: Option<String>,
    create_pr: bool,
    labels: Vec<String>,
) -> Result<()> {
    let config = PilotConfig::resolve(store_path)?;
    let pool = open_pool(&config).await?;

    let task = Task {
        id,
        title,
        description,
        project_path,
        branch,
        create_pr,
        labels: labels.into_iter().collect::<BTreeSet<_>>(),
    };

    if queries::is_task_queued(&pool, &task.id).await? {
        anyhow::bail!("task {} already has a queued or running execution", task.id);
    }

    let exec_id = format!("{}-{:x}", task.id, rand::random::<u64>());
    let execution = Execution::new_queued(exec_id.clone(), &task);

    match queries::save_execution(&pool, &execution).await {
        Ok(()) => {
            println!("{exec_id}");
            Ok(())
        }
        Err(StoreError::Duplicate(task_id)) => {
            anyhow::bail!("task {task_id} already has a queued or running execution")
        }
        Err(err) => Err(err.into()),
    }
}

async fn cmd_status(store_path: Option<&str>, exec_id: &str) -> Result<()> {
    let config = PilotConfig::resolve(store_path)?;
    let pool = open_pool(&config).await?;

    let execution: Execution = queries::get_execution(&pool, exec_id).await?;
    println!("{}", serde_json::to_string_pretty(&execution)?);
    Ok(())
}

async fn cmd_worker_status(store_path: Option<&str>) -> Result<()> {
    use pilot_core::dispatcher::WorkerStatus;

    let config = PilotConfig::resolve(store_path)?;
    let pool = open_pool(&config).await?;

    let running = queries::get_running_executions(&pool).await?;
    let statuses: Vec<WorkerStatus> = running
        .into_iter()
        .map(|exec| WorkerStatus {
            project_path: exec.project_path,
            is_processing: true,
            current_task_id: Some(exec.task_id),
        })
        .collect();

    println!("{statuses:#?}");
    Ok(())
}

async fn cmd_scheduler_status(store_path: Option<&str>) -> Result<()> {
    use pilot_core::scheduler::SchedulerStatus;

    let config = PilotConfig::resolve(store_path)?;
    let pool = open_pool(&config).await?;

    let pending_count = queries::count_pending_retries(&pool).await?;
    let status = SchedulerStatus {
        running: false,
        pending_count: pending_count as usize,
        next_retry: None,
    };

    println!("{status:#?}");
    Ok(())
}
