mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "invoker-cli")]
#[command(about = "Invoker CLI - Run function images locally and inspect registry tags", long_about = None)]
struct Cli {
    /// Registry host prefix (defaults to REGISTRY)
    #[arg(short, long, global = true)]
    registry: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an image once and print its framed response
    Run {
        /// Image name without registry or tag
        image: String,

        /// Image tag; `latest` is resolved through the registry
        #[arg(default_value = "latest")]
        tag: String,

        /// Single container argument, as a GET query string would pass it
        #[arg(short, long, conflicts_with = "data")]
        arg: Option<String>,

        /// Request body, passed to the container as POST_DATA
        #[arg(short, long)]
        data: Option<String>,

        /// Overall timeout in seconds (defaults to INVOCATION_TIMEOUT_SECS)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print response headers as well as the body
        #[arg(long, default_value = "false")]
        headers: bool,
    },

    /// Show which tag `latest` resolves to
    ResolveTag {
        /// Image name without registry or tag
        image: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = invoker_common::config::Config::from_env();
    if let Some(registry) = cli.registry {
        config.registry = registry;
    }

    match cli.command {
        Commands::Run {
            image,
            tag,
            arg,
            data,
            timeout,
            headers,
        } => {
            if let Some(secs) = timeout {
                config.invocation_timeout = std::time::Duration::from_secs(secs);
            }
            commands::run_image(&config, &image, &tag, arg, data, headers).await?;
        }
        Commands::ResolveTag { image } => {
            commands::resolve_tag(&config, &image).await?;
        }
    }

    Ok(())
}
