//! arbord — Arbor Merkle-tree sharing daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use arbor_core::config::ArborConfig;
use arbor_core::crypto::Keypair;
use arbor_services::{new_store, HttpDirectory, SharedDirectory};
use arbord::{keepalive_loop, listener_loop, reaper_loop, Transport};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = ArborConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ArborConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ArborConfig::default()
    });
    tracing::info!(peer_name = %config.identity.peer_name, "arbord starting");

    // Keypair
    let keypair = Arc::new(
        Keypair::load_or_generate(&config.identity.keypair_path).with_context(|| {
            format!("failed to load keypair from {}", config.identity.keypair_path.display())
        })?,
    );
    tracing::info!(public_key = hex::encode(keypair.public), "keypair ready");

    // Published tree
    let store = new_store();
    let shared_dir = &config.export.shared_dir;
    if shared_dir.as_os_str().is_empty() {
        tracing::info!("no shared directory configured, publishing nothing");
    } else {
        store
            .export(shared_dir)
            .await
            .with_context(|| format!("failed to export {}", shared_dir.display()))?;
    }

    // Directory + transport
    let directory: SharedDirectory = Arc::new(
        HttpDirectory::new(
            &config.network.directory_url,
            Duration::from_secs(config.network.directory_timeout_secs),
        )
        .context("failed to set up directory client")?,
    );
    tracing::info!(url = %config.network.directory_url, "peer directory");

    let transport = Transport::bind(config.engine_settings(), keypair, store, directory)
        .await
        .context("failed to bind transport socket")?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let listener_task = tokio::spawn(listener_loop(transport.clone()));
    let reaper_task = tokio::spawn(reaper_loop(transport.clone()));
    let keepalive_task = tokio::spawn(keepalive_loop(transport.clone()));

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = listener_task      => tracing::error!("listener task exited: {:?}", r),
        r = reaper_task        => tracing::error!("reaper task exited: {:?}", r),
        r = keepalive_task     => tracing::error!("keep-alive task exited: {:?}", r),
    }

    Ok(())
}
