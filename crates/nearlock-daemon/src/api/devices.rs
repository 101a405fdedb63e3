//! Nearby-device listing endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use nearlock_core::{Command, DeviceSummary};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::control::CommandAccepted;
use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Nearby devices currently listed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "listing": true,
    "devices": [
        {
            "id": "AA:BB:CC:DD:EE:FF",
            "label": "Alice's iPhone",
            "rssi": -52,
            "address": "AA:BB:CC:DD:EE:FF",
            "manufacturer": "Apple Inc.",
            "model": "iPhone 15 Pro",
            "last_seen_utc": "2025-01-15T03:30:00Z"
        }
    ]
}))]
pub struct DevicesResponse {
    /// Whether the listing is running.
    #[schema(example = true)]
    pub listing: bool,

    /// Listed devices, strongest first.
    pub devices: Vec<DeviceSummary>,
}

/// List nearby devices.
#[utoipa::path(
    get,
    path = "/devices",
    tag = "devices",
    operation_id = "listDevices",
    summary = "List nearby Bluetooth devices",
    description = "Returns the peripherals seen since the listing was started, \
        strongest first. Devices silent for longer than the device timeout \
        are dropped. Start the listing with `POST /api/scan/start`.",
    responses(
        (status = 200, description = "Listed devices", body = DevicesResponse)
    )
)]
pub async fn list_devices(State(state): State<SharedState>) -> Json<DevicesResponse> {
    let snapshot = state.snapshot();
    Json(DevicesResponse {
        listing: snapshot.listing,
        devices: snapshot.devices,
    })
}

/// Start listing nearby devices.
#[utoipa::path(
    post,
    path = "/scan/start",
    tag = "devices",
    operation_id = "startListing",
    summary = "Start the nearby-device listing",
    description = "Starts scanning (if needed) and collects every advertising \
        peripheral stronger than the scan threshold. Does not affect presence.",
    responses(
        (status = 202, description = "Command queued", body = CommandAccepted),
        (status = 503, description = "Monitor is not running", body = crate::api::ErrorResponse)
    )
)]
pub async fn start_listing(
    State(state): State<SharedState>,
) -> ApiResult<(StatusCode, Json<CommandAccepted>)> {
    state.send(Command::StartListing).await?;
    Ok(CommandAccepted::response("start_listing"))
}

/// Stop listing nearby devices.
#[utoipa::path(
    post,
    path = "/scan/stop",
    tag = "devices",
    operation_id = "stopListing",
    summary = "Stop the nearby-device listing",
    description = "Stops collecting nearby devices. Scanning continues while a \
        target is monitored in passive mode.",
    responses(
        (status = 202, description = "Command queued", body = CommandAccepted),
        (status = 503, description = "Monitor is not running", body = crate::api::ErrorResponse)
    )
)]
pub async fn stop_listing(
    State(state): State<SharedState>,
) -> ApiResult<(StatusCode, Json<CommandAccepted>)> {
    state.send(Command::StopListing).await?;
    Ok(CommandAccepted::response("stop_listing"))
}
