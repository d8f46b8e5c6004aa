//! Read-only JSON API over the latest cycle result.
//!
//!   GET /api/nowplaying            → full cycle (all stations + total)
//!   GET /api/nowplaying/{station}  → one station's snapshot

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use radio_nowplaying::nowplaying::{CacheMarker, NowPlayingSnapshot};
use radio_nowplaying::LatestNowPlaying;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[derive(Serialize)]
struct AllStations {
    started_at: DateTime<Utc>,
    total_overall: u64,
    stations: BTreeMap<String, NowPlayingSnapshot>,
}

async fn nowplaying_all(State(latest): State<LatestNowPlaying>) -> Response {
    match latest.get().await {
        Some(result) => Json(AllStations {
            started_at: result.started_at,
            total_overall: result.total_overall,
            stations: result.tagged(CacheMarker::Hit),
        })
        .into_response(),
        None => not_ready(),
    }
}

async fn nowplaying_station(
    Path(station): Path<String>,
    State(latest): State<LatestNowPlaying>,
) -> Response {
    let Some(result) = latest.get().await else {
        return not_ready();
    };
    match result.station(&station) {
        Some(snapshot) => Json(snapshot.with_cache_marker(CacheMarker::Hit)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown station '{}'", station) })),
        )
            .into_response(),
    }
}

fn not_ready() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "no cycle has completed yet" })),
    )
        .into_response()
}

pub fn router(latest: LatestNowPlaying) -> Router {
    Router::new()
        .route("/api/nowplaying", get(nowplaying_all))
        .route("/api/nowplaying/{station}", get(nowplaying_station))
        .layer(CorsLayer::permissive())
        .with_state(latest)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    latest: LatestNowPlaying,
) -> tokio::task::JoinHandle<()> {
    let app = router(latest);

    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!("Failed to bind HTTP API on {}: {}", addr, e);
                return;
            }
        };
        info!("HTTP API listening on http://{}", addr);
        if let Err(e) = axum::serve(listener, app).await {
            warn!("HTTP API error: {}", e);
        }
    })
}
