mod config;
mod server;

use anyhow::Context;
use blobfleet_core::{
    HttpBlobNodeClient, RebalanceOperation, RebalanceOperationRequest, ReplicationPolicy, Topology,
};
use clap::{Parser, Subcommand};
use config::Config;
use server::{ApiServerOptions, BlobServerOptions, run_api_server, run_blob_server};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "blobfleet")]
#[command(about = "Sharded blob storage with failover and on-demand replication")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a blob-server storing uploads beneath a local directory
    BlobServer {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value_t = 3001)]
        port: u16,

        /// Directory holding the blobs
        #[arg(long, default_value = "data")]
        store: PathBuf,
    },

    /// Run the upload and download services in front of the blob-servers
    ApiServer {
        /// Address both services listen on
        #[arg(long, default_value = "0.0.0.0")]
        api_host: String,

        #[arg(long, default_value_t = 9991)]
        upload_port: u16,

        #[arg(long, default_value_t = 9992)]
        download_port: u16,

        /// Comma-separated blob-servers, all placed in the default group
        #[arg(long)]
        blob_server: Option<String>,

        /// Path to configuration file
        #[arg(short, long, default_value = "blobfleet.yaml")]
        config: String,

        /// Print the known blob-servers and exit
        #[arg(long)]
        dump: bool,
    },

    /// Run one replication pass, copying blobs into their home groups
    Replicate {
        /// Comma-separated blob-servers, all placed in the default group
        #[arg(long)]
        blob_server: Option<String>,

        /// Path to configuration file
        #[arg(short, long, default_value = "blobfleet.yaml")]
        config: String,

        /// Copies wanted per home group (default: every server in the group)
        #[arg(long)]
        copies: Option<usize>,

        /// Report what would be copied without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the version
    Version,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blobfleet=info,blobfleet_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::BlobServer { host, port, store } => {
            blob_server(BlobServerOptions { host, port, store }).await
        }
        Commands::ApiServer {
            api_host,
            upload_port,
            download_port,
            blob_server,
            config,
            dump,
        } => {
            api_server(
                ApiServerOptions {
                    host: api_host,
                    upload_port,
                    download_port,
                },
                blob_server.as_deref(),
                &config,
                dump,
            )
            .await
        }
        Commands::Replicate {
            blob_server,
            config,
            copies,
            dry_run,
        } => replicate(blob_server.as_deref(), &config, copies, dry_run).await,
        Commands::Version => {
            println!("blobfleet {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(error) = result {
        tracing::error!("{:#}", error);
        std::process::exit(1);
    }
}

async fn blob_server(options: BlobServerOptions) -> anyhow::Result<()> {
    run_blob_server(options).await.context("blob-server failed")
}

async fn api_server(
    options: ApiServerOptions,
    blob_servers: Option<&str>,
    config_path: &str,
    dump: bool,
) -> anyhow::Result<()> {
    let (config, registry) = Config::load(blob_servers, config_path)
        .with_context(|| format!("failed to load blob-servers (config: {})", config_path))?;
    let topology = registry.snapshot().await;

    if dump {
        print_servers(&topology);
        return Ok(());
    }

    if topology.is_empty() {
        tracing::warn!("No blob-servers configured; every upload will fail");
    }
    for server in topology.servers() {
        tracing::info!("Blob-server {} in group '{}'", server.endpoint, server.group);
    }

    run_api_server(options, Arc::new(registry), &config.client)
        .await
        .context("api-server failed")
}

async fn replicate(
    blob_servers: Option<&str>,
    config_path: &str,
    copies: Option<usize>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let (config, registry) = Config::load(blob_servers, config_path)
        .with_context(|| format!("failed to load blob-servers (config: {})", config_path))?;

    let policy = match copies {
        Some(copies) => ReplicationPolicy {
            copies_per_group: Some(copies),
        },
        None => config.replication,
    };

    let client = HttpBlobNodeClient::new(config.client.timeout(), config.client.connect_timeout())?;
    let operation = RebalanceOperation::new(Arc::new(registry), Arc::new(client));
    let report = operation
        .run(RebalanceOperationRequest { policy, dry_run })
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.failures > 0 {
        tracing::warn!("Replication finished with {} failure(s)", report.failures);
    }
    Ok(())
}

fn print_servers(topology: &Topology) {
    println!("\t{:>10} - {}", "group", "server");
    for server in topology.servers() {
        println!("\t{:>10} - {}", server.group, server.endpoint);
    }
}
