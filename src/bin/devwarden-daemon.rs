use anyhow::Context;
use clap::Parser;
use devwarden::config::DaemonConfig;
use devwarden::daemon::Daemon;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Background supervisor for local development servers
#[derive(Parser, Debug)]
#[command(name = "devwarden-daemon")]
#[command(version, about)]
struct Args {
    /// Daemon configuration file (.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the IPC socket path
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Override the PID file path
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Mirror process output into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn setup_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid RUST_LOG filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<DaemonConfig> {
    let mut config = match &args.config {
        Some(path) => DaemonConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => DaemonConfig::default(),
    };

    if let Some(socket) = &args.socket {
        config.socket_path = socket.clone();
    }
    if let Some(pid_file) = &args.pid_file {
        config.pid_file = pid_file.clone();
    }
    if let Some(log_dir) = &args.log_dir {
        config.supervisor.log_dir = Some(log_dir.clone());
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging()?;

    let config = load_config(&args)?;
    tracing::info!(
        socket = %config.socket_path.display(),
        apps = config.apps.len(),
        "Configuration loaded"
    );

    Daemon::new(config).run().await.context("daemon exited with an error")?;
    Ok(())
}
