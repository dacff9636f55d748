//! Meta server binary

use clap::{Parser, Subcommand};
use minimeta::{common::Config, MetaServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minimeta")]
#[command(about = "minimeta placement and repair meta server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start meta server
    Serve {
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Node ID
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,

        /// Database directory (in-memory if omitted)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Pause between sweeps, e.g. "500ms" or "10s"
        #[arg(long)]
        sweep_interval: Option<String>,
    },

    /// Print cluster status
    Status {
        /// Meta server URL
        #[arg(long, default_value = "http://localhost:34601")]
        meta: String,
    },

    /// Create an app
    CreateApp {
        /// Meta server URL
        #[arg(long, default_value = "http://localhost:34601")]
        meta: String,

        /// App ID
        #[arg(long)]
        id: i32,

        /// App name
        #[arg(long)]
        name: String,

        /// Partition count
        #[arg(long, default_value = "8")]
        partitions: i32,

        /// Replication factor
        #[arg(long, default_value = "3")]
        replicas: usize,
    },
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            id,
            bind,
            db,
            sweep_interval,
        } => {
            // File and environment first, CLI arguments win
            let mut config = Config::load(config.as_deref())?;
            if let Some(id) = id {
                config.node_id = id;
            }
            if let Some(bind) = bind {
                config.meta.bind_addr = bind.parse()?;
            }
            if db.is_some() {
                config.meta.db_path = db;
            }
            if let Some(interval) = sweep_interval {
                config.meta.sweep_interval = interval;
            }
            config.meta.validate()?;

            init_tracing(&config.log_level);
            MetaServer::new(config).serve().await?;
        }

        Commands::Status { meta } => {
            init_tracing("info");
            let status: serde_json::Value = reqwest::get(format!("{}/admin/status", meta))
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Commands::CreateApp {
            meta,
            id,
            name,
            partitions,
            replicas,
        } => {
            init_tracing("info");
            let resp = reqwest::Client::new()
                .post(format!("{}/apps", meta))
                .json(&serde_json::json!({
                    "app_id": id,
                    "app_name": name,
                    "partition_count": partitions,
                    "max_replica_count": replicas,
                }))
                .send()
                .await?;
            if resp.status().is_success() {
                println!("✓ Created app {} ({})", id, name);
            } else {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("create app failed ({}): {}", status, body);
            }
        }
    }

    Ok(())
}
