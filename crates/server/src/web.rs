//! Thin read-only HTTP view over the device registry (§4.14): process
//! status, per-device snapshots, and the two plant-lifecycle actions as the
//! only write surface. Every write just enqueues a `DeviceEvent`; this
//! layer never touches device state directly.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::device::DeviceEvent;
use crate::registry::Registry;
use crate::types::Layer;

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub started_at: Arc<Instant>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/devices/{id}", get(api_device))
        .route("/api/devices/{id}/plants/{slot}", post(add_plant))
        .route("/api/devices/{id}/plants/{slot}", axum::routing::delete(harvest_plant))
        .route("/api/devices/{id}/sunrise", post(set_sunrise))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let devices = state.registry.known_device_ids().await;
    Json(serde_json::json!({
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "device_count": devices.len(),
        "devices": devices,
    }))
}

async fn api_device(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.registry.get(&id.to_lowercase()).await {
        Some(handle) => Json(serde_json::json!(handle.view.borrow().clone())).into_response(),
        None => (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "unknown device"}))).into_response(),
    }
}

fn parse_layer_slot(layer: &str, slot: &str) -> Option<(Layer, usize)> {
    let layer = match layer {
        "a" | "A" => Layer::A,
        "b" | "B" => Layer::B,
        _ => return None,
    };
    slot.parse().ok().map(|s| (layer, s))
}

#[derive(serde::Deserialize)]
struct AddPlantBody {
    plant_id: i64,
}

#[derive(serde::Deserialize)]
struct SetSunriseBody {
    sunrise_sec: i32,
}

/// Slot path segments are `<layer>-<index>`, e.g. `a-3`.
fn split_slot_segment(segment: &str) -> Option<(&str, &str)> {
    segment.split_once('-')
}

async fn add_plant(
    State(state): State<AppState>,
    Path((id, slot_segment)): Path<(String, String)>,
    Json(body): Json<AddPlantBody>,
) -> impl IntoResponse {
    let Some((layer_str, slot_str)) = split_slot_segment(&slot_segment) else {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "slot must be <layer>-<index>"})))
            .into_response();
    };
    let Some((layer, slot)) = parse_layer_slot(layer_str, slot_str) else {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "invalid layer or slot index"})))
            .into_response();
    };

    let handle = match state.registry.get(&id.to_lowercase()).await {
        Some(h) => h,
        None => return (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "unknown device"}))).into_response(),
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    if handle
        .tx
        .send(DeviceEvent::AddPlant {
            layer,
            slot,
            plant_id: body.plant_id,
            reply: Some(reply_tx),
        })
        .await
        .is_err()
    {
        error!(device = %id, "device queue closed on add_plant");
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": "device worker stopped"})))
            .into_response();
    }

    match reply_rx.await {
        Ok(Ok(())) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e)) => (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": e.to_string()}))).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": "no response from device"})))
            .into_response(),
    }
}

async fn harvest_plant(
    State(state): State<AppState>,
    Path((id, slot_segment)): Path<(String, String)>,
) -> impl IntoResponse {
    let Some((layer_str, slot_str)) = split_slot_segment(&slot_segment) else {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "slot must be <layer>-<index>"})))
            .into_response();
    };
    let Some((layer, slot)) = parse_layer_slot(layer_str, slot_str) else {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "invalid layer or slot index"})))
            .into_response();
    };

    let handle = match state.registry.get(&id.to_lowercase()).await {
        Some(h) => h,
        None => return (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "unknown device"}))).into_response(),
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    if handle
        .tx
        .send(DeviceEvent::HarvestPlant { layer, slot, reply: Some(reply_tx) })
        .await
        .is_err()
    {
        error!(device = %id, "device queue closed on harvest_plant");
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": "device worker stopped"})))
            .into_response();
    }

    match reply_rx.await {
        Ok(Ok(())) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e)) => (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": e.to_string()}))).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": "no response from device"})))
            .into_response(),
    }
}

/// `SetSunrise` (§4.5) has no reply channel — like `SetMode`, it's a
/// fire-and-forget device-lifecycle op — so this just enqueues it after a
/// bounds check on the seconds-of-day value.
async fn set_sunrise(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SetSunriseBody>,
) -> impl IntoResponse {
    if !(0..86400).contains(&body.sunrise_sec) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "sunrise_sec must be in 0..86400"})),
        )
            .into_response();
    }

    let handle = match state.registry.get(&id.to_lowercase()).await {
        Some(h) => h,
        None => return (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "unknown device"}))).into_response(),
    };

    if handle
        .tx
        .send(DeviceEvent::SetSunrise { sunrise_sec: body.sunrise_sec })
        .await
        .is_err()
    {
        error!(device = %id, "device queue closed on set_sunrise");
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": "device worker stopped"})))
            .into_response();
    }

    StatusCode::ACCEPTED.into_response()
}

pub async fn serve(addr: std::net::SocketAddr, state: AppState) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "web ui listening");
    axum::serve(listener, router(state)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_slot_segment_splits_on_dash() {
        assert_eq!(split_slot_segment("a-3"), Some(("a", "3")));
        assert_eq!(split_slot_segment("b-0"), Some(("b", "0")));
        assert_eq!(split_slot_segment("nodash"), None);
    }

    #[test]
    fn parse_layer_slot_accepts_either_case() {
        assert_eq!(parse_layer_slot("a", "2").map(|(l, s)| (l, s)), Some((Layer::A, 2)));
        assert_eq!(parse_layer_slot("B", "5").map(|(l, s)| (l, s)), Some((Layer::B, 5)));
        assert!(parse_layer_slot("c", "0").is_none());
        assert!(parse_layer_slot("a", "nope").is_none());
    }
}
