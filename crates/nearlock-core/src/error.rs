//! Unified error types for the nearlock core library.
//!
//! [`NearlockError`] covers every failure that can escape the crate. Module
//! specific errors ([`ConfigError`](crate::config::ConfigError),
//! [`BluetoothError`](crate::radio::BluetoothError)) convert into it.
//!
//! Radio failures during monitoring never show up here: a failed connection
//! or RSSI read is delivered to the [`Monitor`](crate::Monitor) as an event and
//! degrades the session to passive observation. Only start-up paths (loading
//! configuration, opening the adapter) and a stopped monitor loop return
//! errors.

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all nearlock operations.
#[derive(Debug, Error)]
pub enum NearlockError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    BluetoothAdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    BluetoothAdapterPoweredOff,

    /// The Bluetooth stack could not be used at all.
    #[error("Bluetooth unavailable: {0}")]
    BluetoothUnavailable(String),

    /// A peripheral identifier is not usable by the radio backend.
    #[error("Invalid peripheral identifier: '{0}'")]
    InvalidPeripheralId(String),

    // =========================================================================
    // MONITOR ERRORS
    // =========================================================================
    /// The monitor event loop is no longer accepting input.
    #[error("Presence monitor is not running")]
    MonitorStopped,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// A configuration file was required but is missing.
    #[error("No nearlock configuration at {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// A configuration source could not be read or deserialized.
    #[error("Cannot read nearlock configuration: {0}")]
    ConfigParseError(String),

    /// Monitor or server settings are out of range.
    #[error("Invalid nearlock settings: {0}")]
    ConfigValidationError(String),

    /// Saving the configuration failed.
    #[error("Cannot write nearlock configuration: {0}")]
    ConfigWriteFailed(String),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for nearlock operations.
pub type Result<T> = std::result::Result<T, NearlockError>;

impl NearlockError {
    /// Returns `true` if this error is related to Bluetooth operations.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterNotFound
                | Self::BluetoothAdapterPoweredOff
                | Self::BluetoothUnavailable(_)
                | Self::InvalidPeripheralId(_)
        )
    }

    /// Returns `true` if the configuration is missing, unreadable or invalid.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_)
                | Self::ConfigParseError(_)
                | Self::ConfigValidationError(_)
                | Self::ConfigWriteFailed(_)
        )
    }

    /// Returns `true` if this error is likely recoverable without user intervention.
    ///
    /// A powered-off adapter recovers as soon as power returns; the monitor
    /// resumes scanning on its own.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::BluetoothAdapterPoweredOff)
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::BluetoothAdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::BluetoothAdapterPoweredOff => "BLUETOOTH_ADAPTER_POWERED_OFF",
            Self::BluetoothUnavailable(_) => "BLUETOOTH_UNAVAILABLE",
            Self::InvalidPeripheralId(_) => "INVALID_PERIPHERAL_ID",
            Self::MonitorStopped => "MONITOR_STOPPED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::ConfigWriteFailed(_) => "CONFIG_WRITE_FAILED",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for NearlockError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::WriteError { path, source } => {
                Self::ConfigWriteFailed(format!("{}: {source}", path.display()))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::radio::BluetoothError> for NearlockError {
    fn from(err: crate::radio::BluetoothError) -> Self {
        use crate::radio::BluetoothError;
        match err {
            BluetoothError::AdapterNotFound => Self::BluetoothAdapterNotFound,
            BluetoothError::AdapterPoweredOff => Self::BluetoothAdapterPoweredOff,
            BluetoothError::InvalidAddress { address } => Self::InvalidPeripheralId(address),
            BluetoothError::SessionInitFailed { message } => Self::BluetoothUnavailable(message),
            BluetoothError::Unsupported => Self::BluetoothUnavailable(err.to_string()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
