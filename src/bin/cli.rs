//! CLI for talking to a running server

use clap::{Parser, Subcommand};
use kvfront::client::{FrontendClient, DEFAULT_TARGET};

#[derive(Parser)]
#[command(name = "kvfront")]
#[command(about = "kvfront key-value store CLI")]
#[command(version)]
struct Cli {
    /// Server URL
    #[arg(long, default_value = DEFAULT_TARGET)]
    target: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a value
    Put {
        /// Key
        #[arg(allow_negative_numbers = true)]
        key: i64,

        /// Value
        value: String,
    },

    /// Fetch a value
    Get {
        /// Key
        #[arg(allow_negative_numbers = true)]
        key: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut client = FrontendClient::connect(cli.target).await?;

    match cli.command {
        Commands::Put { key, value } => {
            client.put(key, value).await?;
            println!("OK");
        }

        Commands::Get { key } => {
            let value = client.get(key).await?;
            println!("{}", value);
        }
    }

    Ok(())
}
