//! playout-cli - Command-line console for AMCP playout servers
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use playout_client::{Client, ClientError, ConnectionConfig};
use playout_protocol::{Target, DEFAULT_PORT};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "playout-cli")]
#[command(about = "Command-line console for AMCP playout servers")]
#[command(version)]
struct Cli {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "PLAYOUT_HOST")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PLAYOUT_PORT")]
    port: u16,

    /// Print responses as JSON
    #[arg(long)]
    json: bool,

    /// Seconds to wait for a response
    #[arg(long, default_value = "10")]
    timeout: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive REPL
    Repl,

    /// Show the server version
    Version,

    /// Show channel information
    Info {
        /// Channel or channel-layer, e.g. 1 or 1-10
        target: Option<Target>,
    },

    /// List media files
    Cls,

    /// List templates
    Tls,

    /// Load a clip paused on a layer
    Load {
        /// Channel-layer, e.g. 1-10
        target: Target,

        /// Clip name
        clip: String,
    },

    /// Play a clip, or what is loaded on the layer
    Play {
        /// Channel-layer, e.g. 1-10
        target: Target,

        /// Clip name
        clip: Option<String>,

        /// Loop the clip
        #[arg(long = "loop")]
        looping: bool,
    },

    /// Stop a layer
    Stop {
        /// Channel-layer, e.g. 1-10
        target: Target,
    },

    /// Clear a layer or a whole channel
    Clear {
        /// Channel or channel-layer
        target: Target,
    },

    /// Send a raw AMCP command line
    Raw {
        /// The command line, e.g. INFO 1
        #[arg(trailing_var_arg = true, required = true)]
        line: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = ConnectionConfig::new().with_request_timeout(Duration::from_secs(cli.timeout));
    let client = Client::new(config);

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, &cli.host, cli.port, cli.json).await?;
        }
        Some(cmd) => {
            // Connect for one-shot command
            client.connect(cli.host.as_str(), cli.port).await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            let result = commands::execute(&client, cmd, cli.json).await;
            client.disconnect().await;

            match result {
                Ok(output) => {
                    println!("{}", output);
                }
                Err(e) => {
                    match e.downcast_ref::<ClientError>() {
                        Some(err) => eprintln!("{}", commands::format_error(err)),
                        None => eprintln!("{}: {}", "Error".red(), e),
                    }
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
