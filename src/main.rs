use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use s3wire::cli::args::S3Path;
use s3wire::cli::commands;
use s3wire::s3::validation::MIN_PART_SIZE;
use s3wire::S3Client;

#[derive(Parser)]
#[command(name = "s3wire")]
#[command(version, about = "S3-compatible object storage client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (environment variables are used when omitted)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Profile to use from config
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Disable SSL certificate verification (like mc --insecure)
    #[arg(long, global = true)]
    insecure: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Make bucket
    Mb {
        /// Bucket (s3://bucket)
        bucket: S3Path,
    },

    /// Remove an empty bucket
    Rb {
        /// Bucket (s3://bucket)
        bucket: S3Path,
    },

    /// List objects (like mc ls)
    Ls {
        /// S3 path (s3://bucket/prefix/)
        path: S3Path,

        /// List recursively
        #[arg(short, long)]
        recursive: bool,
    },

    /// Upload a local file
    Put {
        /// Local file
        source: PathBuf,

        /// Destination (s3://bucket/key, or a prefix ending in /)
        dest: S3Path,

        /// Multipart part size in bytes; larger files upload in parts
        #[arg(long, default_value_t = MIN_PART_SIZE)]
        part_size: u64,
    },

    /// Download an object
    Get {
        /// Source (s3://bucket/key)
        source: S3Path,

        /// Local destination file
        dest: PathBuf,
    },

    /// Remove objects
    Rm {
        /// S3 path to remove
        path: S3Path,

        /// Remove everything under the prefix
        #[arg(short, long)]
        recursive: bool,
    },

    /// Show object info
    Stat {
        /// S3 path
        path: S3Path,
    },

    /// Stream bucket notifications as JSON lines
    Listen {
        /// Bucket and optional key prefix (s3://bucket/prefix)
        path: S3Path,

        /// Event types to watch
        #[arg(long = "event", default_values_t = [
            "s3:ObjectCreated:*".to_string(),
            "s3:ObjectRemoved:*".to_string(),
        ])]
        events: Vec<String>,

        /// Only report keys ending with this suffix
        #[arg(long)]
        suffix: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Sequential CLI work; current_thread keeps startup cheap
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut config = s3wire::config::load_config(cli.config.as_deref(), cli.profile.as_deref())?;
    if cli.insecure {
        config.http.insecure_tls = true;
    }

    let profile = config
        .get_profile(None)
        .context("No profile configured")?;
    debug!(endpoint = %profile.endpoint, region = %profile.region, "client_config");

    let cancel = CancellationToken::new();
    let client = S3Client::from_profile(profile, &config)?.with_cancellation(cancel.clone());

    // Ctrl-C cancels in-flight requests and stops listen streams
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Mb { bucket } => commands::cmd_mb(&client, &bucket).await?,
        Commands::Rb { bucket } => commands::cmd_rb(&client, &bucket).await?,
        Commands::Ls { path, recursive } => commands::cmd_ls(&client, &path, recursive).await?,
        Commands::Put {
            source,
            dest,
            part_size,
        } => commands::cmd_put(&client, &source, &dest, part_size).await?,
        Commands::Get { source, dest } => commands::cmd_get(&client, &source, &dest).await?,
        Commands::Rm { path, recursive } => commands::cmd_rm(&client, &path, recursive).await?,
        Commands::Stat { path } => commands::cmd_stat(&client, &path).await?,
        Commands::Listen {
            path,
            events,
            suffix,
        } => commands::cmd_listen(&client, &path, &events, suffix.as_deref()).await?,
    }

    Ok(())
}
