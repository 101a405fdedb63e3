//! Presence observer used by the daemon.
//!
//! Locking the session is left to whatever consumes the API or the logs;
//! this observer records every decision with `tracing` and keeps the latest
//! notices in a `watch` channel for the HTTP handlers.

use chrono::{DateTime, Utc};
use nearlock_core::{DeviceRecord, PresenceObserver, PresenceReason};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// The most recent presence transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PresenceChange {
    /// New presence value.
    pub presence: bool,
    /// Why it changed.
    pub reason: PresenceReason,
    /// When it changed.
    pub at_utc: DateTime<Utc>,
}

/// Notices that are not part of the monitor snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusNotice {
    /// Last presence transition, if any.
    pub last_change: Option<PresenceChange>,
    /// Number of power-off warnings raised since start-up.
    pub power_warnings: u32,
    /// When the last power-off warning was raised.
    pub last_power_warning_utc: Option<DateTime<Utc>>,
}

/// Logs monitor decisions and publishes [`StatusNotice`]s.
#[derive(Debug)]
pub struct DaemonObserver {
    notices: watch::Sender<StatusNotice>,
}

impl DaemonObserver {
    /// Create the observer and the receiver handed to the API.
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<StatusNotice>) {
        let (notices, rx) = watch::channel(StatusNotice::default());
        (Self { notices }, rx)
    }
}

impl PresenceObserver for DaemonObserver {
    fn presence_changed(&mut self, presence: bool, reason: PresenceReason) {
        info!(presence, %reason, "Presence changed");
        let change = PresenceChange {
            presence,
            reason,
            at_utc: Utc::now(),
        };
        self.notices.send_modify(|n| n.last_change = Some(change));
    }

    fn signal_updated(&mut self, rssi: Option<i16>, active: bool) {
        match rssi {
            Some(rssi) => debug!(rssi, active, "Signal updated"),
            None => info!("Signal unavailable"),
        }
    }

    fn radio_power_warning(&mut self) {
        warn!("Bluetooth is powered off, presence cannot be tracked");
        self.notices.send_modify(|n| {
            n.power_warnings = n.power_warnings.saturating_add(1);
            n.last_power_warning_utc = Some(Utc::now());
        });
    }

    fn device_discovered(&mut self, device: &DeviceRecord) {
        info!(id = %device.id, label = %device.display_label(), rssi = device.rssi, "Nearby device");
    }

    fn device_updated(&mut self, device: &DeviceRecord) {
        debug!(id = %device.id, rssi = device.rssi, "Nearby device updated");
    }

    fn device_removed(&mut self, device: &DeviceRecord) {
        debug!(id = %device.id, "Nearby device gone");
    }
}
