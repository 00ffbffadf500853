//! Shadow CLI - Command-line interface for the Shadow runtime
//!
//! Provides subcommands for initializing the storage root, serving the
//! network service, and querying or stopping a running service.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shadow::runtime::protocol::Tag;
use shadow::runtime::service_client::ServiceClient;
use shadow::{Runtime, ShadowConfig, TaskCatalog};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shadow")]
#[command(about = "Actor-style task runtime with a persisted bot registry", long_about = None)]
struct Cli {
    /// Root directory for runtime storage
    #[arg(short, long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new runtime root
    Init,

    /// Serve the network service until a shutdown request arrives
    Serve {
        /// Host to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to bind
        #[arg(long)]
        port: Option<u16>,
    },

    /// Query a running service
    Status,

    /// Ask a running service to persist its registry and stop
    Shutdown,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ShadowConfig::from_env()?;
    if let Some(root) = cli.root {
        config.root = root;
    }

    match cli.command {
        Commands::Init => {
            Runtime::init(&config)?;
            println!("Initialized Shadow runtime at {:?}", config.root);
        }

        Commands::Serve { host, port } => {
            if !config.root.join("config.json").exists() {
                Runtime::init(&config)?;
            }

            let mut runtime_config = shadow::runtime::storage::load_config(&config.root)
                .with_context(|| format!("loading config from {:?}", config.root))?;
            runtime_config.root = config.root.clone();
            if let Some(host) = host {
                runtime_config.host = host;
            }
            if let Some(port) = port {
                runtime_config.port = port;
            }

            let runtime = Runtime::new(runtime_config, TaskCatalog::with_builtins())?;
            let server = runtime.bind().await?;
            println!("Serving on {}", server.local_addr()?);
            server.serve().await?;
            println!("Server stopped");
        }

        Commands::Status => {
            let client = ServiceClient::new(config.addr());
            let response = client.status().await?;
            match (response.tag, response.data) {
                (Tag::Status, Some(data)) => println!("{}", serde_json::to_string_pretty(&data)?),
                (tag, data) => anyhow::bail!("unexpected response {tag}: {data:?}"),
            }
        }

        Commands::Shutdown => {
            let client = ServiceClient::new(config.addr());
            let response = client.shutdown().await?;
            if response.tag != Tag::Shutdown {
                anyhow::bail!("shutdown refused: {:?}", response.data);
            }
            println!("Service at {} shut down", config.addr());
        }
    }

    Ok(())
}
