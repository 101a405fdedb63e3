//! iBeacon manufacturer payload parser.

use uuid::Uuid;

/// Apple company identifier followed by the iBeacon type and length bytes.
const IBEACON_PREFIX: [u8; 4] = [0x4C, 0x00, 0x02, 0x15];

/// Shortest manufacturer payload that can hold an iBeacon frame.
pub const IBEACON_MIN_LEN: usize = 25;

/// Decoded iBeacon advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IBeacon {
    /// Proximity UUID.
    pub proximity_uuid: Uuid,
    /// Major group number.
    pub major: u16,
    /// Minor group number.
    pub minor: u16,
    /// Calibrated RSSI at 1 m.
    pub measured_power: i8,
}

impl IBeacon {
    /// Parse manufacturer data, company identifier included.
    ///
    /// Returns `None` unless the payload starts with the Apple iBeacon prefix
    /// and is at least [`IBEACON_MIN_LEN`] bytes long.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < IBEACON_MIN_LEN || !data.starts_with(&IBEACON_PREFIX) {
            return None;
        }
        let uuid_bytes: [u8; 16] = data[4..20].try_into().ok()?;
        Some(Self {
            proximity_uuid: Uuid::from_bytes(uuid_bytes),
            major: u16::from_be_bytes([data[20], data[21]]),
            minor: u16::from_be_bytes([data[22], data[23]]),
            measured_power: i8::from_ne_bytes([data[24]]),
        })
    }

    /// Log-distance estimate in metres for a received `rssi`.
    #[must_use]
    pub fn estimated_distance_m(&self, rssi: i16) -> f64 {
        let delta = i16::from(self.measured_power) - rssi;
        10f64.powf(f64::from(delta) / 20.0)
    }

    /// Listing label, e.g. `iBeacon [1, 2] 3.5m`.
    #[must_use]
    pub fn label(&self, rssi: i16) -> String {
        format!(
            "iBeacon [{}, {}] {:.1}m",
            self.major,
            self.minor,
            self.estimated_distance_m(rssi)
        )
    }
}
