//! switch-fleet CLI
//!
//! Exit codes: 0 when every device succeeded, 1 when at least one device
//! failed, 2 when the batch could not run at all.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use switch_fleet::backup::BackupService;
use switch_fleet::config::Config;
use switch_fleet::executor::CommandExecutor;
use switch_fleet::fleet::FleetService;
use switch_fleet::inventory::DeviceRegistry;
use switch_fleet::models::BatchReport;
use switch_fleet::orchestrator::BatchOrchestrator;
use switch_fleet::session::{SessionManager, SshConnector};

#[derive(Parser)]
#[command(name = "switch-fleet")]
#[command(about = "Run show, configure and backup operations across a switch fleet.")]
struct CommandLine {
    /// Device inventory (JSON array)
    #[arg(long, global = true, env = "SWITCHFLEET_INVENTORY")]
    inventory: Option<PathBuf>,
    /// Directory for configuration backups
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,
    /// Maximum simultaneous device sessions
    #[arg(long, global = true)]
    concurrency: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the VLAN table of every switch
    Vlans,
    /// Create a VLAN on every switch
    CreateVlan {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// Save running-config afterwards
        #[arg(long)]
        save: bool,
    },
    /// Assign an access port to a VLAN on one switch
    AssignVlan {
        #[arg(long)]
        id: String,
        #[arg(long)]
        port: String,
        #[arg(long)]
        host: String,
        #[arg(long)]
        save: bool,
    },
    /// Back up the running configuration of every switch
    Backup,
    /// List stored backups
    Backups,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switch_fleet=info".into()),
        )
        .init();

    let cli = CommandLine::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: CommandLine) -> anyhow::Result<ExitCode> {
    let mut config = Config::load()?;
    if let Some(path) = cli.inventory {
        config.inventory.path = path;
    }
    if let Some(dir) = cli.backup_dir {
        config.backup.directory = dir;
    }
    if let Some(concurrency) = cli.concurrency {
        config.orchestrator.concurrency = concurrency;
    }
    tracing::debug!("Configuration loaded: {:?}", config);

    let backups = BackupService::new(config.backup.directory.clone());

    let report = match cli.command {
        Commands::Backups => return list_backups(&backups).await,
        Commands::Vlans => build_fleet(&config, backups).await?.list_vlans().await,
        Commands::CreateVlan { id, name, save } => {
            build_fleet(&config, backups)
                .await?
                .create_vlan(&id, &name, save)
                .await?
        }
        Commands::AssignVlan {
            id,
            port,
            host,
            save,
        } => {
            build_fleet(&config, backups)
                .await?
                .assign_vlan(&id, &port, &host, save)
                .await?
        }
        Commands::Backup => build_fleet(&config, backups).await?.backup_all().await,
    };

    Ok(print_report(&report))
}

/// Load the inventory and wire the session stack; Ctrl-C cancels the batch
async fn build_fleet(config: &Config, backups: BackupService) -> anyhow::Result<FleetService> {
    let registry = DeviceRegistry::load(&config.inventory.path).await?;

    let connector = Arc::new(SshConnector::new(config.ssh.settings()));
    let sessions = SessionManager::new(connector, config.device_timeout());
    let orchestrator = BatchOrchestrator::new(
        sessions,
        CommandExecutor::new(config.save_delay()),
        backups,
        config.orchestrator.concurrency,
    );
    let fleet = FleetService::new(
        Arc::new(registry),
        orchestrator,
        config.executor.save_after_configure,
    );

    let shutdown = fleet.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, closing open sessions");
            shutdown.cancel();
        }
    });

    Ok(fleet)
}

async fn list_backups(backups: &BackupService) -> anyhow::Result<ExitCode> {
    let files = backups.list_backups().await?;
    for file in &files {
        println!(
            "{}\t{}\t{}",
            file.filename,
            file.size_bytes,
            file.modified.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &BatchReport) -> ExitCode {
    for result in &report.results {
        if result.is_success() {
            println!("===== {} =====", result.host);
            if !result.output.is_empty() {
                println!("{}", result.output);
            }
        }
    }

    let failures: Vec<_> = report.failures().collect();
    for failure in &failures {
        eprintln!(
            "{}: {}",
            failure.host,
            failure.error_detail.as_deref().unwrap_or("unknown error")
        );
    }

    tracing::info!(
        "Batch {} ({}): {}/{} devices succeeded",
        report.batch_id,
        report.operation,
        report.success_count(),
        report.results.len()
    );

    if failures.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
