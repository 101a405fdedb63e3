//! # nearlock-daemon
//!
//! Presence monitor daemon.
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package nearlock-daemon --features bluez
//!
//! # Production
//! NEARLOCK_ENV=production nearlock-daemon
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Context;
use nearlock_core::{runtime, ChannelCentral, Command, Config, Monitor, PeripheralId};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use nearlock_daemon::{api, logging, observer::DaemonObserver, radio, state::AppState};

const INPUT_QUEUE_DEPTH: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("NEARLOCK_ENV").is_ok_and(|env| env == "production");
    logging::init(is_production)?;

    let config_path = Config::default_path();
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!(path = %config_path.display(), "Starting nearlock-daemon");

    let (central, radio_commands) = ChannelCentral::new();
    let (observer, notices) = DaemonObserver::new();
    let monitor = Monitor::new(&config.monitor, central, observer)?;

    let (inputs, input_rx) = mpsc::channel(INPUT_QUEUE_DEPTH);
    let (snapshots, snapshot_rx) = watch::channel(monitor.snapshot());

    let radio_task = radio::start(radio_commands, inputs.clone())
        .await
        .context("starting Bluetooth")?;

    let state = AppState::new(inputs, snapshot_rx, notices);
    if let Some(target) = config.monitor.target.as_deref() {
        state
            .send(Command::StartMonitoring(PeripheralId::new(target)))
            .await?;
    }

    let monitor_task = tokio::spawn(runtime::run(monitor, input_rx, snapshots));

    let app = api::create_router(state).layer(TraceLayer::new_for_http());
    let listener = TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("binding {}", config.server.bind_address))?;
    info!(address = %config.server.bind_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    monitor_task.abort();
    radio_task.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Cannot listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
