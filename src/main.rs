use std::sync::Arc;

use anyhow::{Context, Result};
use bktd::core::events::{ChannelSink, CollectingSink, DomainEvent, EventSink};
use bktd::core::notifications::{Dispatcher, OutboundEmail};
use bktd::core::ssh::shell_for;
use bktd::core::storage::{S3StoreFactory, SimulatedStoreFactory, StoreFactory};
use bktd::core::{DestinationChecker, ServerChecker, SshKeyService, TaskRunner};
use bktd::{config, context, daemon, db, logging};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "bktd")]
#[command(about = "Scheduled Remote Backup Daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    simulation: Option<bool>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler daemon.
    Daemon(DaemonArgs),
    /// Execute one backup task immediately.
    RunTask { task_id: String },
    /// Probe a remote server's SSH connectivity.
    CheckServer { server_id: String },
    /// Probe a backup destination's reachability.
    CheckDestination { destination_id: String },
    /// Install our public key on a server's authorized_keys.
    ProvisionKey { server_id: String },
    /// Remove our public key from every registered server.
    RemoveKey,
}

#[derive(Args, Serialize)]
struct DaemonArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    database_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    poll_interval_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    retry_max_attempts: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    json_logs: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.command {
        Commands::Daemon(args) => config::AppConfig::new(Some(args))?,
        _ => config::AppConfig::new(None::<&DaemonArgs>)?,
    };
    if let Some(simulation) = cli.simulation {
        config.simulation = simulation;
    }

    logging::init(logging::LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
    });

    let db_conn = db::init(&config.database_path).await?;
    let ctx = context::AppContext::new(config, db_conn);

    match &cli.command {
        Commands::Daemon(_) => run_daemon(ctx).await.context("Failed to start daemon")?,
        Commands::RunTask { task_id } => run_task(ctx, task_id).await?,
        Commands::CheckServer { server_id } => check_server(ctx, server_id).await?,
        Commands::CheckDestination { destination_id } => {
            check_destination(ctx, destination_id).await?
        }
        Commands::ProvisionKey { server_id } => provision_key(ctx, server_id).await?,
        Commands::RemoveKey => remove_key(ctx).await?,
    }

    Ok(())
}

fn store_factory(simulation: bool) -> Arc<dyn StoreFactory> {
    if simulation {
        Arc::new(SimulatedStoreFactory::new())
    } else {
        Arc::new(S3StoreFactory)
    }
}

fn build_runner(
    ctx: &context::AppContext,
    events: Arc<dyn EventSink>,
    mail: mpsc::UnboundedSender<OutboundEmail>,
) -> TaskRunner {
    let dispatcher = Arc::new(Dispatcher::new(ctx.db.clone(), mail));
    TaskRunner::new(
        ctx.db.clone(),
        shell_for(ctx.config.simulation),
        store_factory(ctx.config.simulation),
        events,
        dispatcher,
        ctx.config.keypair(),
        ctx.config.connect_timeout(),
    )
}

async fn run_daemon(ctx: context::AppContext) -> Result<()> {
    info!(simulation = ctx.config.simulation, "starting daemon");

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<DomainEvent>();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            info!(?event, "domain event");
        }
    });

    // Delivery transport sits behind this channel; the daemon drains it
    // and hands messages to the local MTA via logging for now.
    let (mail_tx, mut mail_rx) = mpsc::unbounded_channel::<OutboundEmail>();
    tokio::spawn(async move {
        while let Some(email) = mail_rx.recv().await {
            info!(to = %email.to, subject = %email.subject, "outbound email");
        }
    });

    let runner = Arc::new(build_runner(&ctx, Arc::new(ChannelSink::new(event_tx)), mail_tx));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    daemon::run(
        ctx.db.clone(),
        runner,
        ctx.config.retry_policy(),
        ctx.config.poll_interval(),
        shutdown,
    )
    .await
}

async fn run_task(ctx: context::AppContext, task_id: &str) -> Result<()> {
    let (mail_tx, mut mail_rx) = mpsc::unbounded_channel::<OutboundEmail>();
    let events = Arc::new(CollectingSink::new());
    let runner = build_runner(&ctx, events.clone(), mail_tx);

    let report = runner.run(task_id, &CancellationToken::new()).await?;

    println!("run {} finished: {}", report.log_id, report.state.as_str());
    println!("{}", report.log);
    while let Ok(email) = mail_rx.try_recv() {
        println!("email to {}: {}", email.to, email.subject);
    }
    for event in events.take() {
        println!("event: {event:?}");
    }

    Ok(())
}

async fn check_server(ctx: context::AppContext, server_id: &str) -> Result<()> {
    let checker = ServerChecker::new(
        ctx.db.clone(),
        shell_for(ctx.config.simulation),
        ctx.config.keypair(),
        ctx.config.connect_timeout(),
        Arc::new(CollectingSink::new()),
    );
    let status = checker.check(server_id).await?;
    println!("server {server_id}: {}", status.as_str());
    Ok(())
}

async fn check_destination(ctx: context::AppContext, destination_id: &str) -> Result<()> {
    let checker = DestinationChecker::new(
        ctx.db.clone(),
        store_factory(ctx.config.simulation),
        Arc::new(CollectingSink::new()),
    );
    let reachable = checker.check(destination_id).await?;
    println!(
        "destination {destination_id}: {}",
        if reachable { "reachable" } else { "unreachable" }
    );
    Ok(())
}

fn key_service(ctx: &context::AppContext) -> SshKeyService {
    SshKeyService::new(
        shell_for(ctx.config.simulation),
        ctx.config.keypair(),
        ctx.config.connect_timeout(),
    )
}

async fn provision_key(ctx: context::AppContext, server_id: &str) -> Result<()> {
    let server = db::servers::get(&ctx.db, server_id.to_string()).await?;
    key_service(&ctx).provision_on(&server).await?;
    println!("installed key on {}", server.label);
    Ok(())
}

async fn remove_key(ctx: context::AppContext) -> Result<()> {
    let servers = db::servers::list(&ctx.db).await?;
    let removed = key_service(&ctx).remove_from_all(&servers).await;
    println!("removed key from {removed} of {} servers", servers.len());
    Ok(())
}
