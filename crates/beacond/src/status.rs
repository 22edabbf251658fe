//! HTTP status endpoint: exposes pipeline state as JSON.

use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;

use beacon_core::Announce;
use beacon_services::{AnnouncePipeline, CacheSizes, IngestStats};

pub type StatusState = Arc<AnnouncePipeline>;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub ingest:         IngestStats,
    pub cache:          CacheSizes,
    pub presences:      usize,
    pub last_rejection: Option<RejectionInfo>,
}

#[derive(Serialize)]
pub struct RejectionInfo {
    pub reason:   String,
    pub age_secs: u64,
}

async fn handle_status(State(pipeline): State<StatusState>) -> Json<StatusResponse> {
    let last_rejection = pipeline.last_rejection().map(|r| RejectionInfo {
        reason:   r.reason.to_string(),
        age_secs: SystemTime::now()
            .duration_since(r.at)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    });

    Json(StatusResponse {
        ingest:    pipeline.stats(),
        cache:     pipeline.cache_sizes(),
        presences: pipeline.monitor().len(),
        last_rejection,
    })
}

// ── /devices ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceInfo>,
}

#[derive(Serialize)]
pub struct DeviceInfo {
    pub identity: String,
    pub announce: Announce,
}

async fn handle_devices(State(pipeline): State<StatusState>) -> Json<DevicesResponse> {
    let mut devices: Vec<DeviceInfo> = pipeline
        .monitor()
        .snapshot()
        .into_iter()
        .map(|(identity, announce)| DeviceInfo {
            identity: identity.to_hex(),
            announce: (*announce).clone(),
        })
        .collect();
    devices.sort_by(|a, b| {
        (&a.announce.device.uuid, &a.announce.interface.name)
            .cmp(&(&b.announce.device.uuid, &b.announce.interface.name))
    });

    Json(DevicesResponse { devices })
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/status",  get(handle_status))
        .route("/devices", get(handle_devices))
        .with_state(state)
}

pub async fn serve(state: StatusState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "status endpoint listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
