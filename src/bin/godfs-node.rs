//! godfs node binary.
//!
//! Runs a tracker or a storage node until SIGINT.
//!
//! ```bash
//! godfs-node --config /etc/godfs/tracker.toml
//! godfs-node --role storage --group g1 --trackers 10.0.0.1:22122 --secret s3cret
//! GODFS_ROLE=storage GODFS_GROUP=g1 GODFS_TRACKERS=10.0.0.1:22122 godfs-node
//! ```

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use godfs::NodeConfig;
use godfs::StorageNode;
use godfs::TrackerNode;
use godfs_types::Role;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "godfs-node", version, about = "godfs tracker or storage node")]
struct Args {
    /// Path to TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node role: tracker or storage.
    #[arg(long)]
    role: Option<Role>,

    /// Directory for persistent state.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// RPC listen address.
    #[arg(long)]
    bind_addr: Option<String>,

    /// Address announced to trackers.
    #[arg(long)]
    advertise_addr: Option<String>,

    /// Cluster secret.
    #[arg(long)]
    secret: Option<String>,

    /// Replication group (storage only).
    #[arg(long)]
    group: Option<String>,

    /// Tracker addresses, comma separated (storage only).
    #[arg(long, value_delimiter = ',')]
    trackers: Vec<String>,

    /// Refuse uploads (storage only).
    #[arg(long)]
    readonly: bool,
}

impl Args {
    fn apply(self, config: &mut NodeConfig) {
        if let Some(role) = self.role {
            config.node.role = role;
        }
        if let Some(data_dir) = self.data_dir {
            config.node.data_dir = data_dir;
        }
        if let Some(bind_addr) = self.bind_addr {
            config.node.bind_addr = bind_addr;
        }
        if let Some(advertise_addr) = self.advertise_addr {
            config.node.advertise_addr = Some(advertise_addr);
        }
        if let Some(secret) = self.secret {
            config.node.secret = secret;
        }
        if let Some(group) = self.group {
            config.node.group = Some(group);
        }
        if !self.trackers.is_empty() {
            config.node.trackers = self.trackers;
        }
        if self.readonly {
            config.node.readonly = true;
        }
    }
}

fn init_tracing(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = NodeConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply(&mut config);
    init_tracing(&config.node.log_filter);
    config.validate().context("invalid configuration")?;

    match config.node.role {
        Role::Tracker => {
            let node = TrackerNode::start(&config).await.context("failed to start tracker")?;
            tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
            info!("shutdown signal received");
            node.shutdown().await;
        }
        Role::Storage => {
            let node = StorageNode::start(&config).await.context("failed to start storage node")?;
            tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
            info!("shutdown signal received");
            node.shutdown().await;
        }
        Role::Client => anyhow::bail!("godfs-node runs trackers and storage nodes, not clients"),
    }
    Ok(())
}
