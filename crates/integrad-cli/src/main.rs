//! integrad daemon and CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use integrad_config::{DaemonConfig, SystemConfig};
use integrad_core::JobNumber;
use integrad_server::Client;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod commands;

/// System config read when `--config` is not given, if it exists.
const DEFAULT_CONFIG: &str = "/etc/integrad/integrad.kdl";

#[derive(Parser)]
#[command(name = "integrad")]
#[command(about = "Minimal continuous integration daemon", long_about = None)]
struct Cli {
    /// Daemon socket path
    #[arg(long, global = true, env = "INTEGRAD_SOCKET")]
    socket: Option<PathBuf>,

    /// System configuration file
    #[arg(long, global = true, env = "INTEGRAD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Server {
        /// Job store path
        #[arg(long, env = "INTEGRAD_DB")]
        db: Option<PathBuf>,
        /// Shell used for build and post commands
        #[arg(long, env = "INTEGRAD_SHELL")]
        shell: Option<String>,
        /// Directory for job checkouts
        #[arg(long, env = "INTEGRAD_WORK_DIR")]
        work_dir: Option<PathBuf>,
        /// Number of jobs run concurrently
        #[arg(long, env = "INTEGRAD_WORKERS")]
        workers: Option<usize>,
    },
    /// Queue a deploy of a repository
    Deploy {
        /// Repository to clone
        source: PathBuf,
        /// Branch or commit to deploy
        #[arg(short, long)]
        git: String,
    },
    /// Queue a job again with the arguments of an earlier one
    Restart {
        /// Job number
        job: JobNumber,
    },
    /// Show job statuses
    Status {
        /// Only this job
        #[arg(short, long)]
        job: Option<JobNumber>,
    },
    /// Print the log of a job
    Logs {
        /// Job number
        job: JobNumber,
    },
    /// Stop the daemon once running jobs are done
    Shutdown,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let file = load_system_config(cli.config.as_deref())?;
    let flags = SystemConfig {
        socket: cli.socket,
        ..Default::default()
    };

    match cli.command {
        Commands::Server {
            db,
            shell,
            work_dir,
            workers,
        } => {
            let flags = SystemConfig {
                database: db,
                shell,
                work_dir,
                workers,
                ..flags
            };
            commands::server(DaemonConfig::resolve(flags.or(file))?).await?;
        }
        Commands::Deploy { source, git } => {
            commands::deploy(&client(flags, file)?, &source, git).await?
        }
        Commands::Restart { job } => commands::restart(&client(flags, file)?, job).await?,
        Commands::Status { job } => commands::status(&client(flags, file)?, job).await?,
        Commands::Logs { job } => commands::logs(&client(flags, file)?, job).await?,
        Commands::Shutdown => commands::shutdown(&client(flags, file)?).await?,
    }

    Ok(())
}

fn client(flags: SystemConfig, file: SystemConfig) -> anyhow::Result<Client> {
    let config = DaemonConfig::resolve(flags.or(file))?;
    Ok(Client::new(config.socket))
}

/// The explicitly given config file, or the default one if present.
fn load_system_config(path: Option<&Path>) -> anyhow::Result<SystemConfig> {
    match path {
        Some(path) => SystemConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => SystemConfig::load(Path::new(DEFAULT_CONFIG))
            .with_context(|| format!("failed to load config {DEFAULT_CONFIG}")),
        None => Ok(SystemConfig::default()),
    }
}
