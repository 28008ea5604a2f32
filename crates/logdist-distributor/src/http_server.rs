//! HTTP surface for the distributor.
//!
//! A thin axum shell over the submit/stats contract: batch ingestion,
//! health, statistics, analyzer detail and a dead-letter view. Every
//! route delegates straight to [`Distributor`]; no pipeline logic lives
//! here.

use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::distributor::Distributor;
use logdist_common::{LogPacket, Result};

pub struct HttpServer {
    distributor: Distributor,
}

impl HttpServer {
    pub fn new(distributor: Distributor) -> Self {
        Self { distributor }
    }

    /// Binds and serves until the process shuts down.
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let app = router(self.distributor);
        let listener = TcpListener::bind(addr).await?;
        info!("http server listening on {}", listener.local_addr()?);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

fn router(distributor: Distributor) -> Router {
    Router::new()
        .route("/api/v1/logs", post(submit_logs))
        .route("/api/v1/health", get(health_check))
        .route("/api/v1/stats", get(get_stats))
        .route("/api/v1/analyzers", get(get_analyzers))
        .route("/api/v1/analyzers/:id/health", post(set_analyzer_health))
        .route("/api/v1/dead-letter", get(get_dead_letter))
        .layer(CorsLayer::permissive())
        .with_state(distributor)
}

/// Accepts an array of packets; each is validated and submitted
/// independently. 202 when everything was accepted, 207 on a partial
/// failure, 503 when nothing made it in.
async fn submit_logs(
    State(distributor): State<Distributor>,
    Json(packets): Json<Vec<LogPacket>>,
) -> Response {
    if packets.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "array must contain at least one packet" })),
        )
            .into_response();
    }

    let total = packets.len();
    let mut successful = 0usize;
    let mut failed = 0usize;
    let mut processed_packets = Vec::new();

    for mut packet in packets {
        if packet.id.is_empty() {
            packet.id = Uuid::new_v4().to_string();
        }
        let packet_id = packet.id.clone();

        match distributor.submit(packet).await {
            Ok(()) => {
                successful += 1;
                processed_packets.push(packet_id);
            }
            Err(e) => {
                failed += 1;
                error!("failed to submit packet {}: {}", packet_id, e);
            }
        }
    }

    let status = if failed > 0 && successful == 0 {
        StatusCode::SERVICE_UNAVAILABLE
    } else if failed > 0 {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::ACCEPTED
    };

    (
        status,
        Json(json!({
            "total_packets": total,
            "successful": successful,
            "failed": failed,
            "processed_packets": processed_packets,
        })),
    )
        .into_response()
}

async fn health_check(State(distributor): State<Distributor>) -> Response {
    let stats = distributor.stats();

    (
        StatusCode::OK,
        Json(json!({
            "status": health_status(stats.active_analyzers, stats.analyzer_stats.len()),
            "uptime_ms": stats.uptime_ms,
            "active_analyzers": stats.active_analyzers,
            "total_analyzers": stats.analyzer_stats.len(),
            "packet_channel_util_percent": stats.packet_channel_util_percent,
            "result_channel_util_percent": stats.result_channel_util_percent,
            "retry_channel_util_percent": stats.retry_channel_util_percent,
            "total_packets_received": stats.total_packets_received,
            "total_messages_routed": stats.total_messages_routed,
            "timestamp": Utc::now(),
        })),
    )
        .into_response()
}

async fn get_stats(State(distributor): State<Distributor>) -> Response {
    (StatusCode::OK, Json(distributor.stats())).into_response()
}

async fn get_analyzers(State(distributor): State<Distributor>) -> Response {
    let stats = distributor.stats();

    (
        StatusCode::OK,
        Json(json!({
            "analyzers": stats.analyzer_stats,
            "total_count": stats.analyzer_stats.len(),
            "active_count": stats.active_analyzers,
            "timestamp": Utc::now(),
        })),
    )
        .into_response()
}

/// Returns the most recent dead-letter entries, capped at 100.
async fn get_dead_letter(State(distributor): State<Distributor>) -> Response {
    const MAX_ENTRIES: usize = 100;

    match distributor.dead_letter_entries() {
        Ok(mut entries) => {
            let total = entries.len();
            if total > MAX_ENTRIES {
                entries.drain(..total - MAX_ENTRIES);
            }
            (
                StatusCode::OK,
                Json(json!({
                    "count": entries.len(),
                    "packets": entries,
                    "timestamp": Utc::now(),
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!("failed to read dead letter file: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to read dead letter file" })),
            )
                .into_response()
        }
    }
}

/// Manually flips one analyzer's health flag.
async fn set_analyzer_health(
    State(distributor): State<Distributor>,
    Path(analyzer_id): Path<String>,
    Json(request): Json<SetHealthRequest>,
) -> Response {
    if !distributor.set_analyzer_health(&analyzer_id, request.healthy) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown analyzer: {analyzer_id}") })),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(json!({
            "analyzer_id": analyzer_id,
            "healthy": request.healthy,
            "timestamp": Utc::now(),
        })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct SetHealthRequest {
    healthy: bool,
}

fn health_status(active: usize, total: usize) -> &'static str {
    if active == 0 {
        "unhealthy"
    } else if active < total / 2 {
        "degraded"
    } else {
        "healthy"
    }
}
