//! Radio backend start-up.

use nearlock_core::{CentralCommand, MonitorInput};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Start the platform radio backend.
///
/// Commands are drained from `commands` and results reported on `events`.
///
/// # Errors
///
/// Fails when the Bluetooth stack cannot be opened.
#[cfg(feature = "bluez")]
pub async fn start(
    commands: mpsc::UnboundedReceiver<CentralCommand>,
    events: mpsc::Sender<MonitorInput>,
) -> nearlock_core::radio::BluetoothResult<JoinHandle<()>> {
    let radio = nearlock_core::BluezRadio::open().await?;
    Ok(radio.spawn(commands, events))
}

/// Start the platform radio backend.
///
/// Built without a Bluetooth backend: commands are logged and dropped, so the
/// API stays usable but presence never changes.
///
/// # Errors
///
/// Never fails.
#[cfg(not(feature = "bluez"))]
#[allow(clippy::unused_async)]
pub async fn start(
    mut commands: mpsc::UnboundedReceiver<CentralCommand>,
    _events: mpsc::Sender<MonitorInput>,
) -> nearlock_core::radio::BluetoothResult<JoinHandle<()>> {
    tracing::warn!(
        error = %nearlock_core::BluetoothError::Unsupported,
        "Built without the `bluez` feature, radio commands are ignored"
    );
    Ok(tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            tracing::debug!(?command, "Dropping radio command");
        }
    }))
}
