use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cloudpush::health::CheckResult;
use cloudpush::ledger::{ItemKind, ItemStatus, Origin, Summary};
use cloudpush::planner::INTERRUPTED_EXIT_CODE;
use cloudpush::{
    shutdown, tui, Config, EntryKind, HealthCheck, LedgerSnapshot, ProcessExecutor, RemoteTool,
    RootMode, RunStatus, ShutdownSignal, SyncError, SyncPlanner, SyncReport, SyncRequest,
};

#[derive(Parser)]
#[command(name = "cloudpush")]
#[command(about = "Mirror a local directory tree into cloud storage through its CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file or directory tree into a remote folder
    Sync {
        /// Local file or directory. A trailing separator merges a directory's
        /// contents into the destination instead of creating a folder for it.
        path: PathBuf,

        /// Remote folder identifier to sync into
        folder_id: String,

        /// Merge directory contents into the destination
        #[arg(long)]
        merge: bool,

        /// Plain log output instead of the interactive progress view
        #[arg(long)]
        no_tui: bool,

        /// Attempts per create/upload operation
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Timeout for a single tool invocation, in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Base delay between attempts, in seconds
        #[arg(long)]
        retry_delay: Option<u64>,

        /// Directory for the error report
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },

    /// List the contents of a remote folder
    List {
        /// Remote folder identifier
        folder_id: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// System health check and diagnostics
    Doctor,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let config = load_config(cli.config.as_deref())?;

    // stdout logging breaks raw mode, so the progress view gets a log file
    let use_tui = matches!(cli.command, Commands::Sync { no_tui: false, .. })
        && std::io::stdout().is_terminal();
    let log_file = use_tui.then(|| PathBuf::from(&config.logging.file));
    init_logging(cli.verbose, &config.logging.level, log_file.as_deref())?;
    info!("Starting cloudpush v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Sync {
            path,
            folder_id,
            merge,
            no_tui: _,
            max_attempts,
            timeout,
            retry_delay,
            report_dir,
        } => {
            let mut config = config;
            if let Some(max_attempts) = max_attempts {
                config.sync.max_attempts = max_attempts;
            }
            if let Some(timeout) = timeout {
                config.sync.command_timeout = timeout;
            }
            if let Some(retry_delay) = retry_delay {
                config.sync.retry_base_delay = retry_delay;
            }
            if let Some(report_dir) = report_dir {
                config.report.directory = Some(report_dir.display().to_string());
            }
            config.validate()?;
            cmd_sync(path, folder_id, merge, use_tui, &config).await
        }
        Commands::List { folder_id, json } => cmd_list(folder_id, json, &config).await,
        Commands::Doctor => cmd_doctor(&config, &config_path).await,
    }
}

/// Initialize logging based on verbosity level. With `log_file`, logs are
/// appended there without ANSI colors instead of going to stderr.
fn init_logging(verbose: bool, level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory: {:?}", parent))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {:?}", path))?;

            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
                .with(filter)
                .init();
        }
        None => {
            // stdout carries reports and `list --json`
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

/// Mirror `path` into the remote folder `folder_id`
async fn cmd_sync(
    path: PathBuf,
    folder_id: String,
    merge: bool,
    use_tui: bool,
    config: &Config,
) -> Result<ExitCode> {
    let (trigger, signal) = shutdown::channel();

    let ctrl_c = trigger.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current command is killed");
            ctrl_c.trigger();
        }
    });

    let request = SyncRequest {
        root_mode: RootMode::from_path_hint(&path, merge),
        report_dir: Some(config.report_directory(&path)),
        destination: folder_id.clone(),
        source: path.clone(),
    };

    let mut planner = SyncPlanner::from_config(config, signal)?;

    let view = if use_tui {
        let (tx, rx) = watch::channel(Arc::new(LedgerSnapshot::default()));
        planner = planner.with_progress(tx);
        let title = format!("cloudpush {} -> {}", path.display(), folder_id);
        let handle = tui::spawn_progress_view(title, rx, trigger.clone())
            .context("Failed to start progress view")?;
        Some(handle)
    } else {
        println!("🔄 Syncing {} into {}", path.display(), folder_id);
        None
    };

    // The planner is consumed here, which also closes the progress channel.
    let result = planner.run(request).await;

    if let Some(handle) = view {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Progress view failed: {:#}", e),
            Err(_) => warn!("Progress view panicked"),
        }
    }

    match result {
        Ok(report) => {
            print_sync_report(&report);
            Ok(ExitCode::from(report.exit_code()))
        }
        Err(SyncError::Interrupted) => {
            println!("🛑 Synchronization interrupted before it started");
            Ok(ExitCode::from(INTERRUPTED_EXIT_CODE))
        }
        Err(e) => {
            println!("❌ {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_sync_report(report: &SyncReport) {
    fn print_kind(icon: &str, label: &str, summary: &Summary, kind: ItemKind) {
        let count = |status| summary.count(kind, Origin::Local, status);
        println!(
            "   {} {}: {} uploaded, {} already present, {} failed, {} not processed",
            icon,
            label,
            count(ItemStatus::Completed),
            count(ItemStatus::AlreadyExists),
            count(ItemStatus::Failed),
            count(ItemStatus::Pending) + count(ItemStatus::InProgress)
        );
    }

    match report.status {
        RunStatus::Finished if report.exit_code() == 0 => {
            println!("\n🎉 Synchronization Complete!")
        }
        RunStatus::Finished => println!("\n⚠️  Synchronization finished with problems"),
        RunStatus::Interrupted => println!("\n🛑 Synchronization interrupted"),
    }

    let summary = &report.summary;
    print_kind("📁", "Folders", summary, ItemKind::Folder);
    print_kind("📄", "Files", summary, ItemKind::File);
    if summary.remote_only() > 0 {
        println!("   ☁️  Remote only: {}", summary.remote_only());
    }
    println!("   ❌ Failed operations: {}", summary.failed_operations);
    println!("   ⏱️  Duration: {:.2}s", report.duration.as_secs_f64());

    if !report.failures.is_empty() {
        println!("\n🔍 Failed Operations:");
        for failure in &report.failures {
            println!(
                "   ❌ {} {}: {}",
                failure.kind,
                failure.path.display(),
                failure.error.lines().next().unwrap_or_default()
            );
        }
    }

    let skipped: Vec<_> = report
        .items
        .iter()
        .filter(|item| item.origin == Origin::Local && item.status == ItemStatus::Failed)
        .filter(|item| !report.failures.iter().any(|f| f.path == item.path))
        .collect();
    for item in skipped {
        println!(
            "   ❌ {}: {}",
            item.path.display(),
            item.last_error.as_deref().unwrap_or("failed")
        );
    }

    if let Some(path) = &report.report_path {
        println!("\n📝 Error report: {}", path.display());
    }
}

/// Print the contents of a remote folder
async fn cmd_list(folder_id: String, json: bool, config: &Config) -> Result<ExitCode> {
    let executor = ProcessExecutor::new(
        config.sync.command_timeout(),
        &config.tool.already_exists_pattern,
        ShutdownSignal::never(),
    )
    .context("Invalid tool.already_exists_pattern")?;
    let tool = RemoteTool::new(config.tool.clone(), Arc::new(executor));

    let mut entries = tool
        .list(&folder_id)
        .await
        .with_context(|| format!("Failed to list folder {}", folder_id))?;
    entries.sort_by_key(|entry| (entry.kind != EntryKind::Folder, entry.name.clone()));

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Folder {} ({} entries):", folder_id, entries.len());
    for entry in &entries {
        let icon = match entry.kind {
            EntryKind::Folder => "📁",
            EntryKind::File => "📄",
        };
        println!("  {} {}  ({})", icon, entry.name, entry.id);
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_doctor(config: &Config, config_path: &Path) -> Result<ExitCode> {
    let health = HealthCheck::run(config, config_path).await;
    print_health_report(&health);
    Ok(if health.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning { "⚠️ " } else { "✅" }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 cloudpush System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    let errors = health.errors();
    let warnings = health.warnings();
    match (errors.len(), warnings.len()) {
        (0, 0) => println!("✅ All checks passed"),
        (0, w) => println!("✅ All checks passed with {} warning(s)", w),
        (e, w) => println!("❌ {} check(s) failed, {} warning(s)", e, w),
    }
}
