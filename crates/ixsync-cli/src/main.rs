//! 🚀 ixsync-cli: the front door, the bouncer, the maitre d' of ixsync.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary loads config, sets up logging, and then lets the orchestrator do the
//! heavy lifting. Like a manager. 🦆
//!
//! 🛑 Ctrl-C during `sync` lets the batch in flight finish, keeps the checkpoint (unless
//! `clear_checkpoint_on_sigint` says otherwise) and exits 130. Run `sync` again to resume.
//!
//! 🛰️ `serve` puts the progress endpoint on the network so a dashboard can watch and steer.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ixsync::checkpoint::{LogLevel, SyncLogEntry, SyncOptions};
use ixsync::orchestrator::{StopRequest, SyncStart};
use ixsync::progress::{SyncProgress, report_table, status_table};
use ixsync::protocol::serve_with_shutdown;
use ixsync::{AppConfig, ExecutionBudget, RunOutcome, SyncOrchestrator};

/// 🔍 Resumable search-index sync.
#[derive(Debug, Parser)]
#[command(name = "ixsync", version, about)]
struct Cli {
    /// 📋 TOML config. If the file is missing we run on IXSYNC_* env vars alone.
    #[arg(short, long, default_value = "ixsync.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 🚀 Resume the CLI's checkpoint, or start a new sync.
    Sync(SyncArgs),
    /// 🔭 What is running, and how did the last run end.
    Status,
    /// ⏸️ Pause at the next batch boundary.
    Pause,
    /// ▶️ Un-pause.
    Resume,
    /// 🛑 Stop at the next batch boundary and forget the checkpoint.
    Stop,
    /// 💣 Stop whatever runs, recreate mappings, sync everything again.
    DeleteAndResync(SyncArgs),
    /// 🧹 Delete the checkpoint. For when a crashed run left one behind.
    Clear,
    /// 🛰️ Serve the progress endpoint (`/token`, `/sync`) until Ctrl-C.
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// 🔌 Address to listen on. Default: `[serve] listen`, else 127.0.0.1:8787.
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// 🚗 Run nothing between requests; the dashboard drives with `continue`.
    #[arg(long)]
    stateless: bool,
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// 🗺️ Recreate each index with its mapping before indexing (deletes the index!).
    #[arg(long)]
    put_mapping: bool,
    /// 🏷️ Comma-separated slugs. Default: every configured indexable.
    #[arg(long, value_delimiter = ',')]
    indexables: Vec<String>,
    #[arg(long)]
    lower_limit_object_id: Option<u64>,
    #[arg(long)]
    upper_limit_object_id: Option<u64>,
    /// ⏭️ Skip this many objects per indexable.
    #[arg(long, default_value_t = 0)]
    offset: u64,
    /// 🎯 Only these object ids.
    #[arg(long, value_delimiter = ',')]
    include: Vec<u64>,
    #[arg(long, value_delimiter = ',')]
    post_type: Vec<String>,
    /// 📦 Objects per batch.
    #[arg(long)]
    per_page: Option<usize>,
    /// 🔄 Throw away any existing checkpoint first.
    #[arg(long)]
    restart: bool,
}

impl SyncArgs {
    fn to_options(&self) -> SyncOptions {
        let mut options = SyncOptions::cli();
        options.put_mapping = self.put_mapping;
        options.indexables = self.indexables.clone();
        options.lower_limit_object_id = self.lower_limit_object_id;
        options.upper_limit_object_id = self.upper_limit_object_id;
        options.offset = self.offset;
        options.include = self.include.clone();
        options.post_type = self.post_type.clone();
        options.per_page = self.per_page;
        options.restart = self.restart;
        options
    }
}

/// 🔒 The config path is optional; a missing file means env vars only.
fn load(path: &std::path::Path) -> Result<AppConfig> {
    let exists = path.try_exists().context(format!(
        "💀 Couldn't check whether the configuration file exists. If it's a relative path, try an absolute one. Was checking here: '{}'",
        path.display()
    ))?;
    ixsync::load_config(exists.then_some(path))
        .context("💀 In ixsync-cli we couldn't load the config. Make sure you didn't forget something obvious, like [engine.Elasticsearch]")
}

fn print_log(entries: &[SyncLogEntry]) {
    for entry in entries {
        let line = format!("[{}] {}", entry.at.format("%H:%M:%S"), entry.message);
        match entry.level {
            LogLevel::Info => info!("{line}"),
            LogLevel::Warning => warn!("{line}"),
            LogLevel::Error => error!("{line}"),
        }
    }
}

/// 🔄 Drive `run_slice` one batch at a time until the run ends or Ctrl-C lands.
async fn drive(orchestrator: &SyncOrchestrator, config: &AppConfig) -> Result<ExitCode> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
            warn!("🛑 Ctrl-C received. Letting the batch in flight land first...");
        }
    });

    let mut progress = SyncProgress::new(0);
    loop {
        if interrupted.load(Ordering::SeqCst) {
            progress.abandon();
            if config.sync.clear_checkpoint_on_sigint {
                orchestrator.force_clear().await?;
                warn!("🧹 Interrupted. Checkpoint cleared as configured; the next sync starts fresh.");
            } else {
                warn!("💾 Interrupted. Checkpoint kept; run `ixsync sync` to pick up where this left off.");
            }
            return Ok(ExitCode::from(130));
        }

        let outcome = orchestrator
            .run_slice(ExecutionBudget::batches(1))
            .await
            .context("💀 The sync could not read or write its checkpoint. Nothing was lost; fix the store and run `ixsync sync` again")?;
        let projection = orchestrator.projection().await?;
        if projection.is_syncing {
            progress.update(&projection);
        }

        match outcome {
            RunOutcome::Yielded => continue,
            RunOutcome::Completed => {
                progress.finish();
                if let Some(report) = orchestrator.last_sync().await? {
                    println!("{}", report_table(&report));
                }
                info!("✅ Sync complete.");
                return Ok(ExitCode::SUCCESS);
            }
            RunOutcome::Paused => {
                progress.abandon();
                info!("⏸️ Paused. Run `ixsync resume` then `ixsync sync` to continue.");
                return Ok(ExitCode::SUCCESS);
            }
            RunOutcome::Stopped => {
                progress.abandon();
                info!("🛑 Stopped. The checkpoint is gone; the next sync starts fresh.");
                return Ok(ExitCode::SUCCESS);
            }
            RunOutcome::Superseded => {
                progress.abandon();
                warn!("🔒 Another run took over this scope. Leaving it alone.");
                return Ok(ExitCode::SUCCESS);
            }
            RunOutcome::Idle => {
                progress.finish();
                info!("💤 Nothing to sync.");
                return Ok(ExitCode::SUCCESS);
            }
            RunOutcome::Failed { reason } => {
                progress.abandon();
                if let Some(report) = orchestrator.last_sync().await? {
                    print_log(&report.log);
                    println!("{}", report_table(&report));
                }
                error!("💀 Sync failed: {reason}");
                return Ok(ExitCode::from(1));
            }
        }
    }
}

/// 🛰️ Serve until Ctrl-C. A background worker's checkpoint survives for the next `resume`.
async fn serve(mut config: AppConfig, orchestrator: SyncOrchestrator, args: ServeArgs) -> Result<ExitCode> {
    if let Some(listen) = args.listen {
        config.serve.listen = listen;
    }
    config.serve.stateless |= args.stateless;

    let endpoint = Arc::new(config.endpoint_for(orchestrator));
    let listener = tokio::net::TcpListener::bind(config.serve.listen)
        .await
        .with_context(|| format!("💀 Could not listen on {}. Is something else already there?", config.serve.listen))?;
    serve_with_shutdown(listener, endpoint, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Ctrl-C received. Closing the front door.");
        }
    })
    .await?;
    Ok(ExitCode::SUCCESS)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load(&cli.config)?;
    let ping = matches!(cli.command, Command::Sync(_) | Command::DeleteAndResync(_) | Command::Serve(_));
    let orchestrator = config.build_orchestrator(ping).await?;

    match cli.command {
        Command::Sync(args) => {
            match orchestrator.resume_or_start(args.to_options()).await? {
                SyncStart::Resumed(checkpoint) => info!(
                    "🔁 Resuming sync {} at {}/{} objects",
                    checkpoint.sync_id,
                    checkpoint.items_processed(),
                    checkpoint.items_total()
                ),
                SyncStart::Fresh(checkpoint) => info!(
                    "🚀 Starting sync {}: {} objects to go",
                    checkpoint.sync_id,
                    checkpoint.items_total()
                ),
            }
            drive(&orchestrator, &config).await
        }
        Command::DeleteAndResync(args) => {
            let checkpoint = orchestrator.delete_and_resync(args.to_options()).await?;
            info!("💣 Indices will be recreated. Sync {} started.", checkpoint.sync_id);
            drive(&orchestrator, &config).await
        }
        Command::Status => {
            let projection = orchestrator.projection().await?;
            println!("{}", status_table(&projection));
            Ok(ExitCode::SUCCESS)
        }
        Command::Pause => {
            orchestrator.request_pause().await?;
            info!("⏸️ Pause requested. The runner stops at its next batch boundary.");
            Ok(ExitCode::SUCCESS)
        }
        Command::Resume => {
            orchestrator.request_resume().await?;
            info!("▶️ Resumed. A CLI-driven sync needs `ixsync sync` to keep going.");
            Ok(ExitCode::SUCCESS)
        }
        Command::Stop => {
            match orchestrator.request_stop().await? {
                StopRequest::Stopped => info!("🛑 Stopped. The paused sync is gone."),
                StopRequest::Requested => info!("🛑 Stop requested. The runner stops at its next batch boundary."),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Clear => {
            if orchestrator.force_clear().await? {
                info!("🧹 Checkpoint cleared.");
            } else {
                info!("🧹 There was no checkpoint to clear.");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve(args) => serve(config, orchestrator, args).await,
    }
}

/// 🚀 main(): where it all begins. The "I pressed F5 and held my breath" moment.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.contains("connection refused")
                    || cause_str.contains("Connection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
            }
            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like Elasticsearch isn't reachable. Check the url in [engine.Elasticsearch] \
                     and that the cluster is running. If you're using Docker, `docker ps` knows. ☕"
                );
            }
            if let Some(ixsync::SyncError::AlreadyRunning { .. }) = err.downcast_ref::<ixsync::SyncError>() {
                error!("🔧 hint: `ixsync status` shows who owns it; `ixsync stop` or `ixsync sync --restart` takes it back.");
            }
            ExitCode::from(1)
        }
    }
}
