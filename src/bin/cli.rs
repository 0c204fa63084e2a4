//! CLI for nodes and operators

use clap::{Parser, Subcommand, ValueEnum};
use clusterize::coordinator::client::CoordinatorClient;
use clusterize::coordinator::reports::{ReportKind, ReportMessage};

#[derive(Parser)]
#[command(name = "clusterize")]
#[command(about = "Talk to a clusterize coordinator")]
#[command(version)]
struct Cli {
    /// Coordinator URL
    #[arg(long, env = "CLUSTERIZE_URL", default_value = "http://localhost:7070")]
    coordinator: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register this node and print the instruction script
    Register {
        /// Node identifier, `<instance>[:<host>]`
        #[arg(long)]
        vm: String,
    },

    /// Create the cluster's join record
    Init {
        /// Expected node count (coordinator's configured count if omitted)
        #[arg(long)]
        size: Option<usize>,
    },

    /// Show join progress and recent reports
    Status {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Post a status report
    Report {
        #[arg(long)]
        cluster: String,

        #[arg(long, value_enum, default_value = "progress")]
        kind: Kind,

        #[arg(long, env = "CLUSTERIZE_REPORT_KEY")]
        key: Option<String>,

        message: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Progress,
    Error,
    Debug,
}

impl From<Kind> for ReportKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Progress => ReportKind::Progress,
            Kind::Error => ReportKind::Error,
            Kind::Debug => ReportKind::Debug,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = CoordinatorClient::new(&cli.coordinator);

    match cli.command {
        Commands::Register { vm } => {
            let (accepted, script) = client.register(&vm).await?;
            print!("{}", script);
            if !accepted {
                std::process::exit(1);
            }
        }
        Commands::Init { size } => {
            let state = client.init_state(size).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::Status { limit } => {
            let status = client.status(limit).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Report {
            cluster,
            kind,
            key,
            message,
        } => {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            client
                .report(
                    &ReportMessage {
                        cluster,
                        hostname,
                        kind: kind.into(),
                        message,
                    },
                    key.as_deref(),
                )
                .await?;
            println!("✓ Report sent");
        }
    }

    Ok(())
}
