//! HTTP API routes and handlers.
//!
//! - `health` - Service health check
//! - `presence` - Presence decision and monitor snapshot
//! - `control` - Monitor commands (target, mode, power warning)
//! - `devices` - Nearby-device listing
//! - `error` - API error types
//! - `openapi` - OpenAPI document

use axum::routing::{get, post, put};
use axum::Router;

use crate::state::SharedState;

pub mod control;
pub mod devices;
pub mod error;
pub mod health;
pub mod openapi;
pub mod presence;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the API router.
///
/// # Route Structure
///
/// ```text
/// /health                   - Health check
/// /api
/// ├── /presence             - Presence decision
/// ├── /monitor              - GET snapshot, PUT target
/// ├── /mode                 - PUT passive-mode preference
/// ├── /power-warning/ack    - Silence power-off warnings
/// ├── /devices              - Nearby devices
/// ├── /scan/start           - Start the listing
/// ├── /scan/stop            - Stop the listing
/// └── /openapi.json         - OpenAPI document
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest(
            "/api",
            Router::new()
                .route("/presence", get(presence::get_presence))
                .route(
                    "/monitor",
                    get(presence::get_monitor).put(control::start_monitoring),
                )
                .route("/mode", put(control::set_mode))
                .route(
                    "/power-warning/ack",
                    post(control::acknowledge_power_warning),
                )
                .route("/devices", get(devices::list_devices))
                .route("/scan/start", post(devices::start_listing))
                .route("/scan/stop", post(devices::stop_listing))
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .with_state(state)
}
