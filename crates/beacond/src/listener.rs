//! Announce listener.
//!
//! Joins the announce multicast group and hands every datagram to the
//! pipeline as text. The transport makes no ordering or delivery promises;
//! duplicates are the common case and are absorbed by the dedup cache.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use beacon_core::config::NetworkConfig;
use beacon_services::{AnnouncePipeline, Ingested, MonitorError};

/// Receive announces until shutdown.
///
/// Validation failures are logged and dropped. A monitor failure is fatal
/// and ends the loop with an error.
pub async fn listener_loop(
    socket: UdpSocket,
    pipeline: Arc<AnnouncePipeline>,
    max_datagram_size: usize,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut buf = vec![0u8; max_datagram_size];

    tracing::info!(addr = ?socket.local_addr().ok(), "announce listener starting");

    loop {
        let (len, from) = tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("announce listener stopping");
                return Ok(());
            }
            r = socket.recv_from(&mut buf) => match r {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "recv_from failed");
                    continue;
                }
            },
        };

        let Ok(raw) = std::str::from_utf8(&buf[..len]) else {
            tracing::trace!(%from, len, "dropping non-UTF-8 datagram");
            continue;
        };

        match pipeline.ingest(raw) {
            Ok(Ingested::Rejected(reason)) => {
                tracing::trace!(%from, %reason, "announce dropped");
            }
            Ok(outcome) => {
                tracing::debug!(%from, ?outcome, "announce ingested");
            }
            Err(MonitorError::ShutDown) => {
                tracing::debug!("pipeline shut down, listener stopping");
                return Ok(());
            }
            Err(e) => return Err(e).context("presence monitor failed"),
        }
    }
}

/// Create a UDP socket bound to the announce port and joined to the group
/// on every configured interface (or the default one).
pub fn make_listener_socket(config: &NetworkConfig) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
    socket.bind(&bind_addr.into()).context("bind()")?;

    let interfaces = if config.interfaces.is_empty() {
        vec![Ipv4Addr::UNSPECIFIED]
    } else {
        config.interfaces.clone()
    };
    for interface in &interfaces {
        socket
            .join_multicast_v4(&config.multicast_addr, interface)
            .with_context(|| format!("IP_ADD_MEMBERSHIP on {interface}"))?;
        tracing::debug!(group = %config.multicast_addr, %interface, "joined announce group");
    }

    Ok(socket.into())
}
