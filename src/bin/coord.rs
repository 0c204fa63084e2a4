//! Coordinator binary

use clap::{Parser, Subcommand};
use clusterize::{common::StoreBackend, Config, Coordinator};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "clusterize-coord")]
#[command(about = "Join-barrier coordinator for storage cluster bootstrap")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator server
    Serve {
        /// Config file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,

        /// Cluster name
        #[arg(long)]
        cluster: Option<String>,

        /// Expected number of nodes
        #[arg(long)]
        hosts: Option<usize>,

        /// Persist join state with sled at this path
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Create the join record on startup
        #[arg(long)]
        init_state: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            cluster,
            hosts,
            state_dir,
            init_state,
        } => {
            // File and environment first, CLI has priority
            let mut config = Config::load(config.as_deref())?;
            if let Some(bind) = bind {
                config.server.bind_addr = bind.parse()?;
            }
            if let Some(cluster) = cluster {
                config.cluster.name = cluster;
            }
            if let Some(hosts) = hosts {
                config.cluster.hosts_num = hosts;
            }
            if let Some(dir) = state_dir {
                config.store.backend = StoreBackend::Sled;
                config.store.path = Some(dir);
            }
            config.validate()?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.as_str().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            Coordinator::new(config)
                .with_state_init(init_state)
                .serve()
                .await?;
        }
    }

    Ok(())
}
