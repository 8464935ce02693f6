//! REST API of the kernel.
//!
//! Interface between presentation layers (dashboard, CLI, scripts) and
//! the monitoring/dispatch core:
//! - routes: /health, /hosts CRUD, /hosts/{id}/wake|shutdown, /status
//! - `x-api-key` required on everything except /health
//! - dispatch outcomes map to HTTP: Success 200, Busy 409, Failure 502

use crate::arp;
use crate::dispatch::{CommandClass, Outcome, SharedDispatcher};
use crate::models::{Host, HostId, Reachability};
use crate::registry::SharedHostRegistry;
use crate::status::SharedStatusCache;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

/// Default port of the resident shutdown agent, also used for probing.
const DEFAULT_AGENT_PORT: u16 = 9876;

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedHostRegistry,
    pub cache: SharedStatusCache,
    pub dispatcher: SharedDispatcher,
}

#[derive(Serialize)]
struct HostView {
    id: HostId,
    name: String,
    address: String,
    port: u16,
    mac: Option<String>,
    status: Reachability,
    checked_at: Option<String>, // RFC3339, absent until first probe
}

fn to_view(host: &Host, cache: &SharedStatusCache) -> HostView {
    let entry = cache.entry(host.id);
    HostView {
        id: host.id,
        name: host.name.clone(),
        address: host.address.clone(),
        port: host.port,
        mac: host.mac.clone(),
        status: entry.map(|e| e.online).into(),
        checked_at: entry.and_then(|e| e.checked_at.format(&Rfc3339).ok()),
    }
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    // Health check always accessible
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("LANWARD_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        warn!("LANWARD_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/hosts", get(get_hosts).post(create_host))
        .route("/hosts/{id}", get(get_host).put(update_host).delete(delete_host))
        .route("/hosts/{id}/wake", post(wake_host))
        .route("/hosts/{id}/shutdown", post(shutdown_host))
        .route("/status", get(get_status))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

#[derive(Debug, Deserialize)]
struct HostPayload {
    name: String,
    address: String,
    port: Option<u16>,
    mac: Option<String>,
}

impl HostPayload {
    fn validate(&self) -> Result<u16, &'static str> {
        if self.name.trim().is_empty() || self.address.trim().is_empty() {
            return Err("name and address are required");
        }
        match self.port {
            Some(0) => Err("port must be between 1 and 65535"),
            Some(p) => Ok(p),
            None => Ok(DEFAULT_AGENT_PORT),
        }
    }
}

/// Explicit MAC wins; otherwise best-effort ARP resolution. A host
/// without MAC is still registered — waking it will fail with a
/// classified error until one is known.
async fn resolve_payload_mac(payload: &HostPayload) -> Option<String> {
    if payload.mac.is_some() {
        return payload.mac.clone();
    }
    match arp::resolve_mac(&payload.address).await {
        Ok(mac) => Some(mac),
        Err(e) => {
            warn!("no MAC for {}: {e:#}", payload.address);
            None
        }
    }
}

// GET /hosts (list with liveness)
async fn get_hosts(State(app): State<AppState>) -> Json<Vec<HostView>> {
    let hosts = app.registry.list().await;
    Json(hosts.iter().map(|h| to_view(h, &app.cache)).collect())
}

// GET /hosts/{id}
async fn get_host(
    State(app): State<AppState>,
    Path(id): Path<HostId>,
) -> Result<Json<HostView>, StatusCode> {
    let Some(host) = app.registry.get(id).await else {
        return Err(StatusCode::NOT_FOUND);
    };
    Ok(Json(to_view(&host, &app.cache)))
}

// POST /hosts
async fn create_host(
    State(app): State<AppState>,
    Json(payload): Json<HostPayload>,
) -> Result<(StatusCode, Json<HostView>), (StatusCode, Json<serde_json::Value>)> {
    let port = payload
        .validate()
        .map_err(|msg| (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": msg }))))?;

    let mac = resolve_payload_mac(&payload).await;
    let host = app
        .registry
        .add(payload.name, payload.address, port, mac)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": format!("{e:#}") })),
            )
        })?;
    Ok((StatusCode::CREATED, Json(to_view(&host, &app.cache))))
}

// PUT /hosts/{id}
async fn update_host(
    State(app): State<AppState>,
    Path(id): Path<HostId>,
    Json(payload): Json<HostPayload>,
) -> Result<Json<HostView>, (StatusCode, Json<serde_json::Value>)> {
    let port = payload
        .validate()
        .map_err(|msg| (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": msg }))))?;

    let mac = resolve_payload_mac(&payload).await;
    let updated = app
        .registry
        .update(id, payload.name, payload.address, port, mac)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": format!("{e:#}") })),
            )
        })?;

    match updated {
        Some(host) => Ok(Json(to_view(&host, &app.cache))),
        None => Err((StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "host not found" })))),
    }
}

// DELETE /hosts/{id}
async fn delete_host(
    State(app): State<AppState>,
    Path(id): Path<HostId>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let existed = app.registry.remove(id).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !existed {
        return Err(StatusCode::NOT_FOUND);
    }
    // Status entries live exactly as long as their host.
    app.cache.remove(id);
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

fn outcome_response(class: CommandClass, outcome: Outcome) -> (StatusCode, Json<serde_json::Value>) {
    match outcome {
        Outcome::Success => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))),
        Outcome::Busy => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "ok": false,
                "error": "busy",
                "message": format!("another {} command is already in progress", class.as_str()),
            })),
        ),
        Outcome::Failure(kind) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({
                "ok": false,
                "error": kind,
                "message": kind.to_string(),
            })),
        ),
    }
}

// POST /hosts/{id}/wake
async fn wake_host(
    State(app): State<AppState>,
    Path(id): Path<HostId>,
) -> (StatusCode, Json<serde_json::Value>) {
    let outcome = app.dispatcher.dispatch(CommandClass::Wake, id).await;
    outcome_response(CommandClass::Wake, outcome)
}

// POST /hosts/{id}/shutdown
async fn shutdown_host(
    State(app): State<AppState>,
    Path(id): Path<HostId>,
) -> (StatusCode, Json<serde_json::Value>) {
    let outcome = app.dispatcher.dispatch(CommandClass::Shutdown, id).await;
    outcome_response(CommandClass::Shutdown, outcome)
}

// GET /status (raw liveness map for pollers)
async fn get_status(State(app): State<AppState>) -> Json<HashMap<HostId, Reachability>> {
    let hosts = app.registry.list().await;
    // One point-in-time copy of the cache, so a probe cycle landing
    // mid-iteration cannot produce a mixed view.
    let statuses = app.cache.snapshot();
    let map = hosts
        .iter()
        .map(|h| (h.id, Reachability::from(statuses.get(&h.id).map(|e| e.online))))
        .collect();
    Json(map)
}
