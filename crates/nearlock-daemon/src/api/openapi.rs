//! OpenAPI document for the nearlock daemon API.

use axum::Json;
use nearlock_core::{
    ConnectionState, DeviceSummary, Mode, MonitorSnapshot, PeripheralId, PresenceReason, TimerKind,
};
use utoipa::OpenApi;

use super::control::{CommandAccepted, SetModeRequest, StartMonitoringRequest};
use super::devices::DevicesResponse;
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::presence::PresenceResponse;
use crate::observer::{PresenceChange, StatusNotice};

/// Serve the OpenAPI document at `/api/openapi.json`.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// The OpenAPI document as pretty JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// OpenAPI document for nearlock.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "nearlock API",
        version = "0.1.0",
        description = r#"
# nearlock API

nearlock watches the Bluetooth LE signal of one device (usually a phone or a
watch) and decides whether its owner is near the computer.

## Overview

- **Presence**: `GET /api/presence` turns `false` with reason `away` when the
  smoothed signal stays weak, or `lost` when the device goes silent.
- **Monitoring**: `PUT /api/monitor` picks the device to follow, `PUT /api/mode`
  chooses between advertisement-only (passive) and connected (active) tracking.
- **Devices**: `POST /api/scan/start` then `GET /api/devices` to find the
  identifier of the device to monitor.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local nearlock daemon")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "presence", description = "Presence decisions and monitor control"),
        (name = "devices", description = "Nearby Bluetooth devices for picking a target")
    ),
    paths(
        super::health::health_check,
        super::presence::get_presence,
        super::presence::get_monitor,
        super::control::start_monitoring,
        super::control::set_mode,
        super::control::acknowledge_power_warning,
        super::devices::list_devices,
        super::devices::start_listing,
        super::devices::stop_listing,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            PresenceResponse,
            PresenceChange,
            StatusNotice,
            PresenceReason,
            MonitorSnapshot,
            Mode,
            ConnectionState,
            TimerKind,
            PeripheralId,
            DeviceSummary,
            DevicesResponse,
            CommandAccepted,
            StartMonitoringRequest,
            SetModeRequest,
        )
    )
)]
pub struct ApiDoc;
