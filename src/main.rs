use anyhow::Result;
use clap::{Parser, Subcommand};
use locsync::client::RemoteClient;
use locsync::config::Config;
use locsync::sync;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "locsync",
    version,
    about = "Synchronize localization files with a remote translation platform"
)]
struct Cli {
    /// Project root holding the source tree, output tree, and diff artifact
    #[arg(short = 'd', long)]
    root: PathBuf,

    /// Maximum simultaneous outstanding remote calls
    #[arg(short = 'c', long, default_value_t = 8)]
    max_concurrency: usize,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push local changes from the diff artifact to the remote project
    Upload,
    /// Merge remote translations into the local output tree
    Download,
    /// Rewrite remote translations from a reference mapping file
    Replace {
        #[arg(short = 'f', long)]
        reference_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in CI)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("locsync=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env(cli.root, cli.max_concurrency)?;
    let client = Arc::new(RemoteClient::new(&config));

    info!("Starting synchronization run");
    match cli.cmd {
        Command::Upload => sync::run_upload(client, &config).await?,
        Command::Download => sync::run_download(client, &config).await?,
        Command::Replace { reference_file } => {
            sync::run_replace(client, &config, &reference_file).await?
        }
    }
    info!("Synchronization run complete");
    Ok(())
}
