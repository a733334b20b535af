//! hypernote-daemon: Headless Hypernote peer.
//!
//! Keeps a directory of notes in sync with other Hypernote instances. Hosts
//! incoming peers, joins the hosts given on the command line, and sweeps old
//! notes out of the trash.

use anyhow::Result;
use clap::Parser;
use hypernote_core::NotePersistence;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hypernote_daemon::{Args, FsNoteStore, NoteWorkspace, SyncHost};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,hypernote_daemon=debug"
    } else {
        "info,hypernote_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.to_config()?;

    info!("Starting hypernote-daemon");
    info!("Data directory: {:?}", config.data_dir);
    info!("Listen address: {}", config.listen);
    info!("Peer ID: {}", config.peer_id);

    let store = Arc::new(FsNoteStore::open(&config.data_dir).await?);
    let persistence = NotePersistence::new(store).with_quiet_window(config.save_debounce);

    let swept = persistence.sweep_trash(config.trash_retention_days).await?;
    if !swept.is_empty() {
        info!("Purged {} note(s) from trash", swept.len());
    }

    // Periodic sweep runs beside the host; it only touches the trash area
    let sweeper = persistence.clone();
    let retention_days = config.trash_retention_days;
    let mut sweep_interval = tokio::time::interval(config.sweep_interval);
    tokio::spawn(async move {
        // The first tick completes immediately and startup already swept
        sweep_interval.tick().await;
        loop {
            sweep_interval.tick().await;
            if let Err(e) = sweeper.sweep_trash(retention_days).await {
                warn!("Trash sweep failed: {}", e);
            }
        }
    });

    let workspace = NoteWorkspace::load(persistence, config.peer_id).await?;
    let mut host = SyncHost::new(workspace, config.inbound);
    let listener = SyncHost::<FsNoteStore>::bind(config.listen).await?;

    for target in &config.join {
        if let Err(e) = host.join(target).await {
            error!("Failed to join {}: {}", target, e);
        }
    }

    info!("Daemon running. Press Ctrl+C to stop.");

    host.run(&listener, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    })
    .await;

    info!("Shutting down");
    host.shutdown().await
}
