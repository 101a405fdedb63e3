//! Boundary types for the BLE central collaborator.
//!
//! The engine never talks to a radio stack directly. It issues fire-and-forget
//! commands through the [`Central`] trait and receives every completion later
//! as a [`RadioEvent`] on the same control thread. Connection state is tracked
//! by the [`Monitor`](crate::Monitor) from those events, so nothing here is
//! ever queried synchronously.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::is_valid_mac_address;

/// Bluetooth SIG base UUID with the 16-bit slot zeroed.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Expand a 16-bit SIG-assigned UUID into its full 128-bit form.
#[must_use]
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Device Information GATT service.
pub const DEVICE_INFORMATION_SERVICE: Uuid = uuid_from_u16(0x180A);

/// Manufacturer Name String characteristic.
pub const MANUFACTURER_NAME_CHARACTERISTIC: Uuid = uuid_from_u16(0x2A29);

/// Model Number String characteristic.
pub const MODEL_NUMBER_CHARACTERISTIC: Uuid = uuid_from_u16(0x2A24);

/// Exposure Notification service, broadcast by contact-tracing phones.
pub const EXPOSURE_NOTIFICATION_SERVICE: Uuid = uuid_from_u16(0xFD6F);

/// Opaque, stable identifier of a peripheral as reported by the radio stack.
///
/// On BlueZ this is the device address (`AA:BB:CC:DD:EE:FF`); other stacks
/// hand out UUIDs. The engine only compares identifiers for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(example = "AA:BB:CC:DD:EE:FF")]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Create an identifier, upper-casing hardware addresses so that
    /// `aa:bb:..` and `AA:BB:..` name the same peripheral.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        if is_valid_mac_address(&id) {
            Self(id.to_ascii_uppercase())
        } else {
            Self(id)
        }
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is a Bluetooth hardware address.
    #[must_use]
    pub fn is_hardware_address(&self) -> bool {
        is_valid_mac_address(&self.0)
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeripheralId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// One received advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertiser identity.
    pub id: PeripheralId,
    /// Raw signal strength in dBm, not yet clamped.
    pub rssi: i16,
    /// Advertised local name, if any.
    pub local_name: Option<String>,
    /// Resolvable hardware address, if the stack exposes one.
    pub address: Option<String>,
    /// Manufacturer specific data, company identifier (little-endian) first.
    pub manufacturer_data: Option<Vec<u8>>,
    /// Advertised service UUIDs.
    pub service_uuids: Vec<Uuid>,
}

impl Advertisement {
    /// Minimal advertisement carrying only identity and signal strength.
    pub fn new(id: impl Into<PeripheralId>, rssi: i16) -> Self {
        Self {
            id: id.into(),
            rssi,
            local_name: None,
            address: None,
            manufacturer_data: None,
            service_uuids: Vec::new(),
        }
    }

    /// Whether the advertisement announces the given service.
    #[must_use]
    pub fn advertises(&self, service: &Uuid) -> bool {
        self.service_uuids.contains(service)
    }
}

/// Device Information characteristics the registry reads for labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceInfoField {
    /// Manufacturer Name String (0x2A29).
    Manufacturer,
    /// Model Number String (0x2A24).
    Model,
}

impl DeviceInfoField {
    /// GATT characteristic UUID backing this field.
    #[must_use]
    pub const fn characteristic_uuid(self) -> Uuid {
        match self {
            Self::Manufacturer => MANUFACTURER_NAME_CHARACTERISTIC,
            Self::Model => MODEL_NUMBER_CHARACTERISTIC,
        }
    }

    /// Map a characteristic UUID back to the field it carries.
    #[must_use]
    pub fn from_characteristic(uuid: &Uuid) -> Option<Self> {
        if *uuid == MANUFACTURER_NAME_CHARACTERISTIC {
            Some(Self::Manufacturer)
        } else if *uuid == MODEL_NUMBER_CHARACTERISTIC {
            Some(Self::Model)
        } else {
            None
        }
    }
}

/// Everything the radio stack reports back to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// Adapter power state changed (or was reported for the first time).
    PowerChanged {
        /// Whether the radio is now powered on.
        powered: bool,
    },
    /// An advertisement was received.
    Advertisement(Advertisement),
    /// A connection was established.
    Connected(PeripheralId),
    /// A connection attempt failed.
    ConnectFailed(PeripheralId),
    /// An established connection went away.
    Disconnected(PeripheralId),
    /// An RSSI read completed. `None` when the read failed.
    RssiRead {
        /// Peripheral that was read.
        id: PeripheralId,
        /// Raw reading, if the read succeeded.
        rssi: Option<i16>,
    },
    /// The peripheral's GATT services changed and must be rediscovered.
    ServicesInvalidated(PeripheralId),
    /// A Device Information characteristic value was read.
    CharacteristicRead {
        /// Peripheral that was read.
        id: PeripheralId,
        /// Which characteristic.
        field: DeviceInfoField,
        /// Raw value bytes, expected to be UTF-8.
        value: Vec<u8>,
    },
}

/// Commands the engine issues to the radio stack.
///
/// All of them are asynchronous: results come back as [`RadioEvent`]s.
pub trait Central {
    /// Start scanning with no service filter, reporting duplicate advertisements.
    fn start_scan(&mut self);
    /// Stop scanning.
    fn stop_scan(&mut self);
    /// Request a connection.
    fn connect(&mut self, id: &PeripheralId);
    /// Cancel a pending or established connection.
    fn cancel_connection(&mut self, id: &PeripheralId);
    /// Request a fresh RSSI reading.
    fn read_rssi(&mut self, id: &PeripheralId);
    /// Discover the Device Information service and read manufacturer and model.
    fn discover_device_information(&mut self, id: &PeripheralId);
}

/// A [`Central`] call captured as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralCommand {
    /// See [`Central::start_scan`].
    StartScan,
    /// See [`Central::stop_scan`].
    StopScan,
    /// See [`Central::connect`].
    Connect(PeripheralId),
    /// See [`Central::cancel_connection`].
    CancelConnection(PeripheralId),
    /// See [`Central::read_rssi`].
    ReadRssi(PeripheralId),
    /// See [`Central::discover_device_information`].
    DiscoverDeviceInformation(PeripheralId),
}

/// [`Central`] that forwards every command over an unbounded channel to an
/// async radio backend running on its own task.
#[derive(Debug, Clone)]
pub struct ChannelCentral {
    tx: mpsc::UnboundedSender<CentralCommand>,
}

impl ChannelCentral {
    /// Create a central and the receiver the backend drains.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CentralCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, command: CentralCommand) {
        if self.tx.send(command).is_err() {
            tracing::debug!("Radio backend is gone, dropping command");
        }
    }
}

impl Central for ChannelCentral {
    fn start_scan(&mut self) {
        self.send(CentralCommand::StartScan);
    }

    fn stop_scan(&mut self) {
        self.send(CentralCommand::StopScan);
    }

    fn connect(&mut self, id: &PeripheralId) {
        self.send(CentralCommand::Connect(id.clone()));
    }

    fn cancel_connection(&mut self, id: &PeripheralId) {
        self.send(CentralCommand::CancelConnection(id.clone()));
    }

    fn read_rssi(&mut self, id: &PeripheralId) {
        self.send(CentralCommand::ReadRssi(id.clone()));
    }

    fn discover_device_information(&mut self, id: &PeripheralId) {
        self.send(CentralCommand::DiscoverDeviceInformation(id.clone()));
    }
}

/// [`Central`] that only records the commands it receives.
///
/// Used by tests and by hosts without a radio to inspect what the engine
/// asked for.
#[derive(Debug, Default, Clone)]
pub struct MockCentral {
    commands: Vec<CentralCommand>,
}

impl MockCentral {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All commands received so far, oldest first.
    #[must_use]
    pub fn commands(&self) -> &[CentralCommand] {
        &self.commands
    }

    /// Drain the recorded commands.
    pub fn take(&mut self) -> Vec<CentralCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Number of recorded commands equal to `command`.
    #[must_use]
    pub fn count(&self, command: &CentralCommand) -> usize {
        self.commands.iter().filter(|c| *c == command).count()
    }
}

impl Central for MockCentral {
    fn start_scan(&mut self) {
        self.commands.push(CentralCommand::StartScan);
    }

    fn stop_scan(&mut self) {
        self.commands.push(CentralCommand::StopScan);
    }

    fn connect(&mut self, id: &PeripheralId) {
        self.commands.push(CentralCommand::Connect(id.clone()));
    }

    fn cancel_connection(&mut self, id: &PeripheralId) {
        self.commands.push(CentralCommand::CancelConnection(id.clone()));
    }

    fn read_rssi(&mut self, id: &PeripheralId) {
        self.commands.push(CentralCommand::ReadRssi(id.clone()));
    }

    fn discover_device_information(&mut self, id: &PeripheralId) {
        self.commands
            .push(CentralCommand::DiscoverDeviceInformation(id.clone()));
    }
}

/// Errors raised while bringing up a radio backend.
#[derive(Debug, Error)]
pub enum BluetoothError {
    /// No adapter present.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// Adapter present but powered off.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// A peripheral identifier is not a valid address for this backend.
    #[error("Invalid Bluetooth address: {address}")]
    InvalidAddress {
        /// The rejected identifier.
        address: String,
    },

    /// The Bluetooth daemon session could not be opened.
    #[error("Failed to initialise Bluetooth session: {message}")]
    SessionInitFailed {
        /// Underlying error text.
        message: String,
    },

    /// No radio backend was compiled in.
    #[error("nearlock was built without a radio backend; rebuild with the `bluez` feature")]
    Unsupported,
}

/// Result alias for radio backend start-up.
pub type BluetoothResult<T> = std::result::Result<T, BluetoothError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sig_uuid_expansion() {
        assert_eq!(
            DEVICE_INFORMATION_SERVICE.to_string(),
            "0000180a-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            EXPOSURE_NOTIFICATION_SERVICE.to_string(),
            "0000fd6f-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_device_info_field_mapping() {
        assert_eq!(
            DeviceInfoField::from_characteristic(&MANUFACTURER_NAME_CHARACTERISTIC),
            Some(DeviceInfoField::Manufacturer)
        );
        assert_eq!(
            DeviceInfoField::from_characteristic(&DeviceInfoField::Model.characteristic_uuid()),
            Some(DeviceInfoField::Model)
        );
        assert_eq!(
            DeviceInfoField::from_characteristic(&DEVICE_INFORMATION_SERVICE),
            None
        );
    }

    #[test]
    fn test_peripheral_id_normalises_addresses() {
        let id = PeripheralId::new("aa:bb:cc:dd:ee:ff");
        assert_eq!(id.as_str(), "AA:BB:CC:DD:EE:FF");
        assert!(id.is_hardware_address());

        let opaque = PeripheralId::new("5b1e2c3a-phone");
        assert_eq!(opaque.as_str(), "5b1e2c3a-phone");
        assert!(!opaque.is_hardware_address());
    }

    #[test]
    fn test_channel_central_forwards_commands() {
        let (mut central, mut rx) = ChannelCentral::new();
        let id = PeripheralId::new("AA:BB:CC:DD:EE:FF");
        central.start_scan();
        central.connect(&id);
        central.read_rssi(&id);

        assert_eq!(rx.try_recv().unwrap(), CentralCommand::StartScan);
        assert_eq!(rx.try_recv().unwrap(), CentralCommand::Connect(id.clone()));
        assert_eq!(rx.try_recv().unwrap(), CentralCommand::ReadRssi(id));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_central_survives_closed_backend() {
        let (mut central, rx) = ChannelCentral::new();
        drop(rx);
        central.stop_scan();
    }

    #[test]
    fn test_mock_central_counts() {
        let mut central = MockCentral::new();
        central.start_scan();
        central.start_scan();
        central.stop_scan();
        assert_eq!(central.count(&CentralCommand::StartScan), 2);
        assert_eq!(central.take().len(), 3);
        assert!(central.commands().is_empty());
    }
}
