//! Nearby-device listing.
//!
//! While listing is on, every advertiser above the scan threshold gets a
//! [`DeviceRecord`]. Records are refreshed by later advertisements, enriched
//! with Device Information strings, and evicted after a period of silence.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;
use utoipa::ToSchema;

use crate::beacon::IBeacon;
use crate::estimator::clamp_rssi;
use crate::radio::{Advertisement, DeviceInfoField, PeripheralId, EXPOSURE_NOTIFICATION_SERVICE};

/// Names that say nothing about which device it is.
const GENERIC_NAMES: [&str; 2] = ["iPhone", "iPad"];

/// Apple model identifiers (Device Information model string) to marketing names.
fn apple_model_name(model: &str) -> Option<&'static str> {
    let name = match model {
        "iPhone10,3" | "iPhone10,6" => "iPhone X",
        "iPhone11,2" => "iPhone XS",
        "iPhone11,4" | "iPhone11,6" => "iPhone XS Max",
        "iPhone11,8" => "iPhone XR",
        "iPhone12,1" => "iPhone 11",
        "iPhone12,3" => "iPhone 11 Pro",
        "iPhone12,5" => "iPhone 11 Pro Max",
        "iPhone12,8" => "iPhone SE (2nd generation)",
        "iPhone13,1" => "iPhone 12 mini",
        "iPhone13,2" => "iPhone 12",
        "iPhone13,3" => "iPhone 12 Pro",
        "iPhone13,4" => "iPhone 12 Pro Max",
        "iPhone14,4" => "iPhone 13 mini",
        "iPhone14,5" => "iPhone 13",
        "iPhone14,2" => "iPhone 13 Pro",
        "iPhone14,3" => "iPhone 13 Pro Max",
        "iPhone14,6" => "iPhone SE (3rd generation)",
        "iPhone14,7" => "iPhone 14",
        "iPhone14,8" => "iPhone 14 Plus",
        "iPhone15,2" => "iPhone 14 Pro",
        "iPhone15,3" => "iPhone 14 Pro Max",
        "iPhone15,4" => "iPhone 15",
        "iPhone15,5" => "iPhone 15 Plus",
        "iPhone16,1" => "iPhone 15 Pro",
        "iPhone16,2" => "iPhone 15 Pro Max",
        "Watch5,1" | "Watch5,3" => "Apple Watch Series 5 40mm",
        "Watch5,2" | "Watch5,4" => "Apple Watch Series 5 44mm",
        "Watch6,1" | "Watch6,3" => "Apple Watch Series 6 40mm",
        "Watch6,2" | "Watch6,4" => "Apple Watch Series 6 44mm",
        "Watch6,6" | "Watch6,8" => "Apple Watch Series 7 41mm",
        "Watch6,7" | "Watch6,9" => "Apple Watch Series 7 45mm",
        _ => return None,
    };
    Some(name)
}

/// A listed peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Stack identifier.
    pub id: PeripheralId,
    /// Last clamped advertisement RSSI.
    pub rssi: i16,
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Hardware address, when the stack exposes one.
    pub address: Option<String>,
    /// Device Information manufacturer name.
    pub manufacturer: Option<String>,
    /// Device Information model number.
    pub model: Option<String>,
    /// Manufacturer specific advertisement data.
    pub manufacturer_data: Option<Vec<u8>>,
    /// Wall-clock time of the last advertisement.
    pub last_seen_utc: DateTime<Utc>,
    evict_at: Instant,
}

type LabelRule = fn(&DeviceRecord) -> Option<String>;

impl DeviceRecord {
    /// Label rules, most descriptive first.
    const LABEL_RULES: [LabelRule; 6] = [
        Self::descriptive_name,
        Self::specific_name_with_address,
        Self::device_information_label,
        Self::beacon_label,
        Self::any_name,
        Self::address_label,
    ];

    fn from_advertisement(adv: &Advertisement, rssi: i16, evict_at: Instant) -> Self {
        Self {
            id: adv.id.clone(),
            rssi,
            local_name: adv.local_name.clone(),
            address: adv.address.clone(),
            manufacturer: None,
            model: None,
            manufacturer_data: adv.manufacturer_data.clone(),
            last_seen_utc: Utc::now(),
            evict_at,
        }
    }

    /// Human-readable label for device listings.
    #[must_use]
    pub fn display_label(&self) -> String {
        Self::LABEL_RULES
            .iter()
            .find_map(|rule| rule(self))
            .unwrap_or_else(|| self.id.to_string())
    }

    /// Whether both Device Information strings are known.
    #[must_use]
    pub const fn has_device_information(&self) -> bool {
        self.manufacturer.is_some() && self.model.is_some()
    }

    /// Decoded iBeacon payload, if the device advertises one.
    #[must_use]
    pub fn beacon(&self) -> Option<IBeacon> {
        self.manufacturer_data.as_deref().and_then(IBeacon::parse)
    }

    /// API view of the record.
    #[must_use]
    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            id: self.id.clone(),
            label: self.display_label(),
            rssi: self.rssi,
            address: self.address.clone(),
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            last_seen_utc: self.last_seen_utc,
        }
    }

    fn descriptive_name(&self) -> Option<String> {
        self.local_name
            .as_ref()
            .filter(|name| name.trim().chars().count() > 7)
            .cloned()
    }

    fn specific_name_with_address(&self) -> Option<String> {
        self.address.as_ref()?;
        self.local_name
            .as_ref()
            .filter(|name| !GENERIC_NAMES.contains(&name.as_str()))
            .cloned()
    }

    fn device_information_label(&self) -> Option<String> {
        match (self.manufacturer.as_deref(), self.model.as_deref()) {
            (Some(manufacturer), Some(model)) => Some(
                match apple_model_name(model).filter(|_| manufacturer == "Apple Inc.") {
                    Some(name) => name.to_string(),
                    None => format!("{manufacturer}/{model}"),
                },
            ),
            (Some(manufacturer), None) => Some(manufacturer.to_string()),
            (None, Some(model)) => Some(model.to_string()),
            (None, None) => None,
        }
    }

    fn beacon_label(&self) -> Option<String> {
        self.beacon().map(|beacon| beacon.label(self.rssi))
    }

    fn any_name(&self) -> Option<String> {
        self.local_name.clone()
    }

    fn address_label(&self) -> Option<String> {
        self.address.clone()
    }
}

/// Listing entry as served over the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeviceSummary {
    /// Stack identifier, usable as a monitoring target.
    pub id: PeripheralId,
    /// Display label.
    pub label: String,
    /// Last clamped RSSI in dBm.
    pub rssi: i16,
    /// Hardware address, if known.
    pub address: Option<String>,
    /// Manufacturer name, if read.
    pub manufacturer: Option<String>,
    /// Model number, if read.
    pub model: Option<String>,
    /// When the device was last heard.
    pub last_seen_utc: DateTime<Utc>,
}

/// What [`PeripheralRegistry::observe`] did with an advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// A new record was created.
    Discovered,
    /// An existing record was refreshed.
    Updated,
    /// Nothing was recorded.
    Ignored,
}

/// Transient table of nearby peripherals.
#[derive(Debug, Clone)]
pub struct PeripheralRegistry {
    devices: HashMap<PeripheralId, DeviceRecord>,
    listing: bool,
    scan_threshold_dbm: i16,
    timeout: Duration,
}

impl PeripheralRegistry {
    /// Create an idle registry.
    #[must_use]
    pub fn new(scan_threshold_dbm: i16, timeout: Duration) -> Self {
        Self {
            devices: HashMap::new(),
            listing: false,
            scan_threshold_dbm,
            timeout,
        }
    }

    /// Whether advertisements are currently being recorded.
    #[must_use]
    pub const fn is_listing(&self) -> bool {
        self.listing
    }

    /// Turn listing on or off. Existing records stay until they expire.
    pub fn set_listing(&mut self, listing: bool) {
        self.listing = listing;
    }

    /// Record an advertisement.
    ///
    /// Exposure Notification beacons are skipped. Unknown peripherals are only
    /// listed at or above the scan threshold; known ones are always refreshed.
    pub fn observe(&mut self, adv: &Advertisement, now: Instant) -> Observation {
        if !self.listing || adv.advertises(&EXPOSURE_NOTIFICATION_SERVICE) {
            return Observation::Ignored;
        }
        let rssi = clamp_rssi(adv.rssi);
        let evict_at = now + self.timeout;

        if let Some(record) = self.devices.get_mut(&adv.id) {
            record.rssi = rssi;
            record.last_seen_utc = Utc::now();
            record.evict_at = evict_at;
            if adv.local_name.is_some() {
                record.local_name.clone_from(&adv.local_name);
            }
            if adv.manufacturer_data.is_some() {
                record.manufacturer_data.clone_from(&adv.manufacturer_data);
            }
            return Observation::Updated;
        }

        if rssi < self.scan_threshold_dbm {
            return Observation::Ignored;
        }
        debug!(id = %adv.id, rssi, "Listing new device");
        self.devices
            .insert(adv.id.clone(), DeviceRecord::from_advertisement(adv, rssi, evict_at));
        Observation::Discovered
    }

    /// Store a Device Information string. Values that are not UTF-8 are
    /// ignored; trailing NULs are stripped.
    pub fn record_characteristic(
        &mut self,
        id: &PeripheralId,
        field: DeviceInfoField,
        value: Vec<u8>,
    ) -> Option<&DeviceRecord> {
        let record = self.devices.get_mut(id)?;
        let text = match String::from_utf8(value) {
            Ok(text) => text.trim_end_matches('\0').to_string(),
            Err(_) => {
                debug!(%id, ?field, "Ignoring non UTF-8 characteristic value");
                return None;
            }
        };
        match field {
            DeviceInfoField::Manufacturer => record.manufacturer = Some(text),
            DeviceInfoField::Model => record.model = Some(text),
        }
        Some(record)
    }

    /// Remove and return records whose eviction deadline has passed, ordered
    /// by identifier.
    pub fn expire(&mut self, now: Instant) -> Vec<DeviceRecord> {
        let mut expired: Vec<PeripheralId> = self
            .devices
            .values()
            .filter(|r| r.evict_at <= now)
            .map(|r| r.id.clone())
            .collect();
        expired.sort();
        expired
            .iter()
            .filter_map(|id| self.devices.remove(id))
            .collect()
    }

    /// Earliest eviction deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.devices.values().map(|r| r.evict_at).min()
    }

    /// Look up a record.
    #[must_use]
    pub fn get(&self, id: &PeripheralId) -> Option<&DeviceRecord> {
        self.devices.get(id)
    }

    /// Whether `id` is listed.
    #[must_use]
    pub fn contains(&self, id: &PeripheralId) -> bool {
        self.devices.contains_key(id)
    }

    /// Number of listed devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether nothing is listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// API view of every record, strongest signal first.
    #[must_use]
    pub fn summaries(&self) -> Vec<DeviceSummary> {
        let mut out: Vec<DeviceSummary> = self.devices.values().map(DeviceRecord::summary).collect();
        out.sort_by(|a, b| b.rssi.cmp(&a.rssi).then_with(|| a.id.cmp(&b.id)));
        out
    }
}
