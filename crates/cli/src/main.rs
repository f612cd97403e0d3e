use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docreg_registry::{
    FileStatus, Registry, RegistryConfig, RegistryService, RegistryWatcher, Scheduler,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "docreg")]
#[command(about = "Self-healing registry of documentation files and their links", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Root of the watched tree (overrides the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run a full scan before answering a query
    #[arg(long, global = true)]
    rescan: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the registry in sync with the filesystem until interrupted
    Watch,

    /// Scan the whole tree once
    Scan,

    /// Scan, then validate and repair links
    Validate,

    /// Health summary
    Status,

    /// Read a file, repairing the path if it is broken
    Read(PathArgs),

    /// Show the record for a file
    Info(PathArgs),

    /// Search titles, paths and descriptions
    Search(SearchArgs),

    /// List files with a given status
    List(ListArgs),

    /// Most recent access log entries
    Recent(RecentArgs),

    /// Write the periodic JSON report now, or print the Markdown link report
    Report(ReportArgs),

    /// Print the `name : [name](path)` list of tracked files
    #[command(name = "files-list")]
    FilesList(FilesListArgs),
}

#[derive(Args)]
struct PathArgs {
    /// Path relative to the root
    path: String,
}

#[derive(Args)]
struct SearchArgs {
    query: String,
}

#[derive(Args)]
struct ListArgs {
    /// valid, corrupt or deleted
    #[arg(long, default_value = "valid")]
    status: FileStatus,
}

#[derive(Args)]
struct RecentArgs {
    /// Number of entries
    #[arg(short = 'n', long, default_value_t = 20)]
    count: usize,
}

#[derive(Args)]
struct ReportArgs {
    /// Print the Markdown link validation report instead
    #[arg(long)]
    markdown: bool,
}

#[derive(Args)]
struct FilesListArgs {
    /// Write the list to this file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct ValidateOutput<T: Serialize, U: Serialize> {
    scan: T,
    validation: U,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = load_config(&cli)?;
    let registry = Registry::open(config)
        .await
        .context("Failed to open registry")?;
    if cli.rescan && !matches!(cli.command, Commands::Watch | Commands::Scan | Commands::Validate)
    {
        registry.scan_all().await.context("Rescan failed")?;
    }
    let service = RegistryService::new(Arc::clone(&registry));

    match cli.command {
        Commands::Watch => run_watch(registry).await?,
        Commands::Scan => print_json(&service.trigger_scan().await?)?,
        Commands::Validate => {
            let scan = service.trigger_scan().await?;
            let validation = service.trigger_validation().await?;
            print_json(&ValidateOutput { scan, validation })?;
        }
        Commands::Status => print_json(&service.status().await)?,
        Commands::Read(args) => {
            let result = service.read(&args.path).await;
            // The access log entry is written whether or not the read succeeded.
            registry.flush().await.context("Failed to save registry")?;
            print_json(&result?)?;
        }
        Commands::Info(args) => print_json(&service.info(&args.path).await?)?,
        Commands::Search(args) => print_json(&service.search(&args.query).await)?,
        Commands::List(args) => print_json(&service.by_status(args.status).await)?,
        Commands::Recent(args) => print_json(&service.recent_access(args.count).await)?,
        Commands::Report(args) => {
            if args.markdown {
                print!("{}", service.link_report().await);
            } else {
                print_json(&service.report().await?)?;
            }
        }
        Commands::FilesList(args) => {
            let list = service.file_list().await;
            match args.output {
                Some(path) => {
                    std::fs::write(&path, list)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    log::info!("File list written to {}", path.display());
                }
                None => print!("{list}"),
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<RegistryConfig> {
    let mut config = match &cli.config {
        Some(path) => RegistryConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RegistryConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.root.clone_from(root);
    } else if cli.config.is_none() {
        config.root = std::env::current_dir().context("Failed to resolve current directory")?;
    }
    config.root = config
        .root
        .canonicalize()
        .with_context(|| format!("Root {} is not accessible", config.root.display()))?;
    config.validate()?;
    Ok(config)
}

async fn run_watch(registry: Arc<Registry>) -> Result<()> {
    let stats = registry.scan_all().await.context("Initial scan failed")?;
    let validation = registry
        .validate_all()
        .await
        .context("Initial validation failed")?;
    log::info!(
        "Initial pass: {} files processed, {} links repaired, {} broken",
        stats.processed,
        validation.repaired,
        validation.broken
    );

    let watcher = RegistryWatcher::start(Arc::clone(&registry)).context("Failed to start watcher")?;
    if watcher.watch_count() == 0 {
        log::warn!("No directories are being watched; only periodic scans will apply changes");
    }
    let scheduler = Scheduler::spawn(Arc::clone(&registry));

    wait_for_shutdown_signal().await;
    log::info!("Shutting down: draining pending updates");

    scheduler.shutdown().await;
    watcher.shutdown().await.context("Watcher shutdown failed")?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            log::warn!("Failed to install SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
