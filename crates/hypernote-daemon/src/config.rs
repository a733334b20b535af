//! Command line configuration.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hypernote_core::{JoinTarget, PeerId};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// What to do with peers that connect to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum InboundPolicy {
    /// Admit every inbound peer
    #[default]
    Approve,
    /// Turn every inbound peer away with `join_rejected`
    Reject,
}

#[derive(Parser, Debug)]
#[command(name = "hypernote-daemon")]
#[command(about = "Headless Hypernote peer")]
pub struct Args {
    /// Directory holding `notes/` and `trash/`
    #[arg(short, long)]
    pub data_dir: PathBuf,

    /// Address to listen on for incoming connections
    #[arg(short, long, default_value = "0.0.0.0:4747")]
    pub listen: String,

    /// Host to join on startup (host, host:port or ws://host:port); repeatable
    #[arg(short, long = "join", value_name = "TARGET")]
    pub join: Vec<String>,

    /// Peer ID as 16 hex digits (generated if not provided)
    #[arg(long)]
    pub peer_id: Option<String>,

    /// Admission policy for inbound peers
    #[arg(long, value_enum, default_value_t = InboundPolicy::Approve)]
    pub inbound: InboundPolicy,

    /// Quiet period before an edited note is written to disk
    #[arg(long, default_value_t = 500)]
    pub save_debounce_ms: u64,

    /// Trashed notes older than this are deleted for good
    #[arg(long, default_value_t = 30)]
    pub trash_retention_days: u32,

    /// How often to sweep the trash
    #[arg(long, default_value_t = 3600)]
    pub sweep_interval_secs: u64,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

/// Validated daemon settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub listen: SocketAddr,
    pub join: Vec<JoinTarget>,
    pub peer_id: PeerId,
    pub inbound: InboundPolicy,
    pub save_debounce: Duration,
    pub trash_retention_days: u32,
    pub sweep_interval: Duration,
}

impl Args {
    pub fn to_config(&self) -> Result<DaemonConfig> {
        let listen = self
            .listen
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid listen address: {}", self.listen))?;

        let join = self
            .join
            .iter()
            .map(|target| {
                JoinTarget::parse(target).with_context(|| format!("Invalid join target: {target}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let peer_id = match &self.peer_id {
            Some(id) => id
                .parse::<PeerId>()
                .with_context(|| format!("Invalid peer id: {id}"))?,
            None => PeerId::generate(),
        };

        if self.sweep_interval_secs == 0 {
            anyhow::bail!("--sweep-interval-secs must be greater than zero");
        }

        Ok(DaemonConfig {
            data_dir: self.data_dir.clone(),
            listen,
            join,
            peer_id,
            inbound: self.inbound,
            save_debounce: Duration::from_millis(self.save_debounce_ms),
            trash_retention_days: self.trash_retention_days,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        })
    }
}
