//! Presence status endpoints.
//!
//! Read-only views of the monitor: the presence decision a lock action would
//! act on, and the full diagnostic snapshot.

use axum::extract::State;
use axum::Json;
use nearlock_core::{ConnectionState, Mode, MonitorSnapshot, PeripheralId};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::observer::PresenceChange;
use crate::state::SharedState;

/// Current presence decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "target": "AA:BB:CC:DD:EE:FF",
    "presence": true,
    "smoothed_rssi_dbm": -58,
    "mode": "active",
    "connection": "connected",
    "last_change": {
        "presence": true,
        "reason": "close",
        "at_utc": "2025-01-15T03:30:00Z"
    },
    "power_warnings": 0
}))]
pub struct PresenceResponse {
    /// Monitored peripheral, if any.
    pub target: Option<PeripheralId>,

    /// Whether the peripheral is judged near.
    #[schema(example = true)]
    pub presence: bool,

    /// Last smoothed signal strength in dBm.
    #[schema(example = -58)]
    pub smoothed_rssi_dbm: Option<i16>,

    /// How the peripheral is being followed.
    pub mode: Mode,

    /// Link state towards the peripheral.
    pub connection: ConnectionState,

    /// Last presence transition since start-up.
    pub last_change: Option<PresenceChange>,

    /// Number of "Bluetooth is off" warnings raised.
    #[schema(example = 0)]
    pub power_warnings: u32,
}

/// Get the current presence decision.
#[utoipa::path(
    get,
    path = "/presence",
    tag = "presence",
    operation_id = "getPresence",
    summary = "Get presence of the monitored device",
    description = "Returns whether the monitored peripheral is currently judged \
        near, together with the smoothed signal and the last transition. \
        `presence: false` with reason `away` or `lost` is the signal to lock.",
    responses(
        (status = 200, description = "Current presence", body = PresenceResponse)
    )
)]
pub async fn get_presence(State(state): State<SharedState>) -> Json<PresenceResponse> {
    let snapshot = state.snapshot();
    let notice = state.notice();
    Json(PresenceResponse {
        target: snapshot.target,
        presence: snapshot.presence,
        smoothed_rssi_dbm: snapshot.smoothed_rssi,
        mode: snapshot.mode,
        connection: snapshot.connection,
        last_change: notice.last_change,
        power_warnings: notice.power_warnings,
    })
}

/// Get the full monitor snapshot.
#[utoipa::path(
    get,
    path = "/monitor",
    tag = "presence",
    operation_id = "getMonitor",
    summary = "Get the monitor state",
    description = "Diagnostic view of the monitor: smoothing window, armed \
        timers, mode, connection and listing state.",
    responses(
        (status = 200, description = "Monitor snapshot", body = MonitorSnapshot)
    )
)]
pub async fn get_monitor(State(state): State<SharedState>) -> Json<MonitorSnapshot> {
    Json(state.snapshot())
}
