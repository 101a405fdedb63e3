//! # nearlock-core
//!
//! Core presence engine for the nearlock BLE proximity lock.
//!
//! This crate provides:
//! - Signal smoothing over a bounded window of RSSI samples
//! - A hysteresis-based presence state machine (`near` / `away`)
//! - Connection/mode control between passive advertisement scanning and
//!   active connection polling of the monitored peripheral
//! - A transient registry of nearby peripherals for configuration UIs
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`estimator`] - Sliding-window RSSI smoothing
//! - [`timers`] - Purpose-keyed deadline set driving loss detection and mode changes
//! - [`presence`] - Presence state machine
//! - [`controller`] - The [`Monitor`] session: routes radio events, owns timers and mode
//! - [`registry`] - Nearby-device listing and display labels
//! - [`beacon`] - iBeacon manufacturer payload parser
//! - [`radio`] - Boundary types for the BLE central collaborator
//! - [`observer`] - Observer contract towards the lock-action collaborator
//! - [`runtime`] - Single-threaded async event loop
//! - [`config`] - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//!
//! Nothing in the engine blocks or spawns: every state change happens inside
//! one `&mut Monitor` call, so a single task serializes all mutation.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod beacon;
#[cfg(feature = "bluez")]
pub mod bluez;
pub mod config;
pub mod controller;
pub mod error;
pub mod estimator;
pub mod observer;
pub mod presence;
pub mod radio;
pub mod registry;
pub mod runtime;
pub mod timers;

// Re-export primary types for convenience
pub use crate::beacon::IBeacon;
#[cfg(feature = "bluez")]
pub use crate::bluez::BluezRadio;
pub use crate::config::{
    is_valid_mac_address, Config, ConfigError, ConfigResult, MonitorConfig, RssiThreshold,
    ServerConfig, ThresholdConfig,
};
pub use crate::controller::{ConnectionState, Mode, Monitor, MonitorSnapshot};
pub use crate::error::{NearlockError, Result};
pub use crate::estimator::{clamp_rssi, SignalEstimator};
pub use crate::observer::{ObserverEvent, PresenceObserver, RecordingObserver};
pub use crate::presence::{PresenceMachine, PresenceReason};
pub use crate::radio::{
    Advertisement, BluetoothError, Central, CentralCommand, ChannelCentral, DeviceInfoField,
    MockCentral, PeripheralId, RadioEvent,
};
pub use crate::registry::{DeviceRecord, DeviceSummary, Observation, PeripheralRegistry};
pub use crate::runtime::{Command, MonitorInput};
pub use crate::timers::{TimerKind, TimerSet};
