//! Frontend server binary

use clap::Parser;
use kvfront::supervisor::{shutdown_signal, Supervisor};
use kvfront::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log filter used until the configured level is known.
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Parser)]
#[command(name = "kvfront-server")]
#[command(about = "kvfront gRPC key-value server")]
#[command(version)]
struct Cli {
    /// The server port (overrides PORT / config file; default 5051)
    #[arg(long)]
    port: Option<u16>,
}

/// Install the global subscriber. Returns false if one is already set.
fn init_tracing(default_level: &str) -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

fn load_config(cli: &Cli) -> kvfront::Result<Config> {
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(DEFAULT_LOG_LEVEL);
            tracing::error!(error = %e, "failed to start");
            return Err(e.into());
        }
    };
    init_tracing(&config.log_level);

    let started = match Supervisor::new(config).start().await {
        Ok(started) => started,
        Err(e) => {
            tracing::error!(error = %e, "failed to start");
            return Err(e.into());
        }
    };

    started.serve_until(shutdown_signal()).await?;
    Ok(())
}
