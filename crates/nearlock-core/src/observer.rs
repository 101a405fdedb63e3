//! Observer contract towards the lock-action collaborator.

use crate::presence::PresenceReason;
use crate::registry::DeviceRecord;

/// Receives every externally visible decision of a [`Monitor`](crate::Monitor).
///
/// Callbacks run synchronously on the monitor's control thread and must not
/// block. Device-registry callbacks default to no-ops since only listing UIs
/// care about them.
pub trait PresenceObserver {
    /// Presence flipped.
    fn presence_changed(&mut self, presence: bool, reason: PresenceReason);

    /// A sample was ingested (`Some`) or the signal was lost (`None`).
    fn signal_updated(&mut self, rssi: Option<i16>, active: bool);

    /// The radio was powered off.
    fn radio_power_warning(&mut self);

    /// A peripheral entered the nearby-devices listing.
    fn device_discovered(&mut self, _device: &DeviceRecord) {}

    /// A listed peripheral changed.
    fn device_updated(&mut self, _device: &DeviceRecord) {}

    /// A listed peripheral was evicted.
    fn device_removed(&mut self, _device: &DeviceRecord) {}
}

/// One observer callback captured as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    /// [`PresenceObserver::presence_changed`]
    PresenceChanged(bool, PresenceReason),
    /// [`PresenceObserver::signal_updated`]
    SignalUpdated(Option<i16>, bool),
    /// [`PresenceObserver::radio_power_warning`]
    PowerWarning,
    /// [`PresenceObserver::device_discovered`], by label.
    DeviceDiscovered(String),
    /// [`PresenceObserver::device_updated`], by label.
    DeviceUpdated(String),
    /// [`PresenceObserver::device_removed`], by label.
    DeviceRemoved(String),
}

/// Observer that records every callback, for tests and diagnostics.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    events: Vec<ObserverEvent>,
}

impl RecordingObserver {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded callbacks, oldest first.
    #[must_use]
    pub fn events(&self) -> &[ObserverEvent] {
        &self.events
    }

    /// Drain the recorded callbacks.
    pub fn take(&mut self) -> Vec<ObserverEvent> {
        std::mem::take(&mut self.events)
    }

    /// Only the presence transitions, in order.
    #[must_use]
    pub fn presence_changes(&self) -> Vec<(bool, PresenceReason)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ObserverEvent::PresenceChanged(p, r) => Some((*p, *r)),
                _ => None,
            })
            .collect()
    }
}

impl PresenceObserver for RecordingObserver {
    fn presence_changed(&mut self, presence: bool, reason: PresenceReason) {
        self.events
            .push(ObserverEvent::PresenceChanged(presence, reason));
    }

    fn signal_updated(&mut self, rssi: Option<i16>, active: bool) {
        self.events.push(ObserverEvent::SignalUpdated(rssi, active));
    }

    fn radio_power_warning(&mut self) {
        self.events.push(ObserverEvent::PowerWarning);
    }

    fn device_discovered(&mut self, device: &DeviceRecord) {
        self.events
            .push(ObserverEvent::DeviceDiscovered(device.display_label()));
    }

    fn device_updated(&mut self, device: &DeviceRecord) {
        self.events
            .push(ObserverEvent::DeviceUpdated(device.display_label()));
    }

    fn device_removed(&mut self, device: &DeviceRecord) {
        self.events
            .push(ObserverEvent::DeviceRemoved(device.display_label()));
    }
}
