//! beacond: announce listener and presence tracker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use beacon_core::config::BeaconConfig;
use beacon_services::{AnnouncePipeline, PipelineConfig, PresenceEvent};

mod listener;
mod status;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = BeaconConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = BeaconConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        BeaconConfig::default()
    });
    tracing::info!(
        group = %config.network.multicast_addr,
        port = config.network.port,
        default_expiration_secs = config.presence.default_expiration_secs,
        "beacond starting"
    );

    let pipeline = Arc::new(
        AnnouncePipeline::new(PipelineConfig::from(&config.presence))
            .context("failed to start presence monitor")?,
    );

    let socket = listener::make_listener_socket(&config.network)
        .context("failed to create multicast listener socket")?;
    let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

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

    let event_sink = {
        let mut events = pipeline.subscribe_channel();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_event(&event);
            }
        })
    };

    let listener_task = tokio::spawn(listener::listener_loop(
        socket,
        pipeline.clone(),
        config.network.max_datagram_size,
        shutdown_tx.subscribe(),
    ));

    let stats_printer = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                let stats = pipeline.stats();
                let cache = pipeline.cache_sizes();
                tracing::info!(
                    received = stats.received,
                    validations = stats.validations,
                    cache_hits = stats.cache_hits,
                    rejected = stats.rejected,
                    cached = cache.content,
                    presences = pipeline.monitor().len(),
                    "ingest stats"
                );
            }
        })
    };

    // Status HTTP endpoint
    let status_port = config.network.api_port;
    let _status_server = {
        let state = pipeline.clone();
        tokio::spawn(async move {
            if let Err(e) = status::serve(state, status_port).await {
                tracing::error!(error = %e, "status server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut listener_failed = false;

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = listener_task      => {
            tracing::error!("listener task exited: {:?}", r);
            listener_failed = true;
        }
        r = event_sink         => tracing::error!("event sink exited: {:?}", r),
        r = stats_printer      => tracing::error!("stats printer exited: {:?}", r),
    }

    let _ = shutdown_tx.send(());
    pipeline
        .shutdown(config.presence.shutdown_grace())
        .await
        .context("presence monitor shutdown")?;

    if listener_failed {
        anyhow::bail!("announce listener stopped unexpectedly");
    }
    Ok(())
}

fn log_event(event: &PresenceEvent) {
    match event {
        PresenceEvent::New { identity, announce } => tracing::info!(
            identity = %identity,
            uuid = %announce.device.uuid,
            interface = %announce.interface.name,
            name = ?announce.device.name,
            "device appeared"
        ),
        PresenceEvent::Update { identity, old, new } => tracing::info!(
            identity = %identity,
            uuid = %new.device.uuid,
            interface = %new.interface.name,
            old_addrs = ?old.ipv4_addresses(),
            new_addrs = ?new.ipv4_addresses(),
            "device updated"
        ),
        PresenceEvent::Lost { identity, last } => tracing::info!(
            identity = %identity,
            uuid = %last.device.uuid,
            interface = %last.interface.name,
            "device lost"
        ),
    }
}
