//! Monitor control endpoints.
//!
//! Commands are queued on the monitor loop and applied in order; a `202`
//! means the command was accepted, not that it already took effect.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use nearlock_core::{Command, PeripheralId};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Acknowledgement for a queued command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "accepted": true, "command": "start_monitoring" }))]
pub struct CommandAccepted {
    /// Always true.
    pub accepted: bool,
    /// Name of the queued command.
    #[schema(example = "start_monitoring")]
    pub command: String,
}

impl CommandAccepted {
    pub(crate) fn response(command: &str) -> (StatusCode, Json<Self>) {
        (
            StatusCode::ACCEPTED,
            Json(Self {
                accepted: true,
                command: command.to_string(),
            }),
        )
    }
}

/// Request to monitor a peripheral.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "target": "AA:BB:CC:DD:EE:FF" }))]
pub struct StartMonitoringRequest {
    /// Peripheral identifier as listed by `GET /api/devices`.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub target: String,
}

/// Request to change the passive-mode preference.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "passive": true }))]
pub struct SetModeRequest {
    /// When true, never connect to the peripheral.
    pub passive: bool,
}

/// Start monitoring a peripheral.
#[utoipa::path(
    put,
    path = "/monitor",
    tag = "presence",
    operation_id = "startMonitoring",
    summary = "Monitor a peripheral",
    description = "Switches the monitor to a new target. All state belonging \
        to the previous target is discarded without presence notifications.",
    request_body = StartMonitoringRequest,
    responses(
        (status = 202, description = "Command queued", body = CommandAccepted),
        (status = 400, description = "Empty target", body = crate::api::ErrorResponse),
        (status = 503, description = "Monitor is not running", body = crate::api::ErrorResponse)
    )
)]
pub async fn start_monitoring(
    State(state): State<SharedState>,
    Json(request): Json<StartMonitoringRequest>,
) -> ApiResult<(StatusCode, Json<CommandAccepted>)> {
    let target = request.target.trim();
    if target.is_empty() {
        return Err(ApiError::bad_request(
            "invalid_target",
            "Target identifier must not be empty",
        ));
    }
    state
        .send(Command::StartMonitoring(PeripheralId::new(target)))
        .await?;
    Ok(CommandAccepted::response("start_monitoring"))
}

/// Change the passive-mode preference.
#[utoipa::path(
    put,
    path = "/mode",
    tag = "presence",
    operation_id = "setPassiveMode",
    summary = "Enable or disable passive mode",
    description = "In passive mode the peripheral is followed through its \
        advertisements only. Enabling it drops any active connection.",
    request_body = SetModeRequest,
    responses(
        (status = 202, description = "Command queued", body = CommandAccepted),
        (status = 503, description = "Monitor is not running", body = crate::api::ErrorResponse)
    )
)]
pub async fn set_mode(
    State(state): State<SharedState>,
    Json(request): Json<SetModeRequest>,
) -> ApiResult<(StatusCode, Json<CommandAccepted>)> {
    state.send(Command::SetPassiveMode(request.passive)).await?;
    Ok(CommandAccepted::response("set_passive_mode"))
}

/// Silence the "Bluetooth is off" warning.
#[utoipa::path(
    post,
    path = "/power-warning/ack",
    tag = "presence",
    operation_id = "acknowledgePowerWarning",
    summary = "Acknowledge the power-off warning",
    description = "Stops further \"Bluetooth is off\" warnings until the daemon restarts.",
    responses(
        (status = 202, description = "Command queued", body = CommandAccepted),
        (status = 503, description = "Monitor is not running", body = crate::api::ErrorResponse)
    )
)]
pub async fn acknowledge_power_warning(
    State(state): State<SharedState>,
) -> ApiResult<(StatusCode, Json<CommandAccepted>)> {
    state.send(Command::AcknowledgePowerWarning).await?;
    Ok(CommandAccepted::response("acknowledge_power_warning"))
}
