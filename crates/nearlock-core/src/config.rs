//! Application configuration management.
//!
//! Configuration is layered with the `config` crate: built-in defaults, then
//! an optional TOML file, then `NEARLOCK__SECTION__KEY` environment variables.
//!
//! ```toml
//! [monitor]
//! target = "AA:BB:CC:DD:EE:FF"
//! lock_rssi = -80
//! unlock_rssi = "disabled"
//! proximity_timeout_secs = 5.0
//! signal_loss_timeout_secs = 60.0
//!
//! [server]
//! bind_address = "127.0.0.1:7878"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::estimator::DEFAULT_WINDOW_SIZE;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "NEARLOCK";

/// Environment variable naming an explicit config file path.
pub const CONFIG_PATH_ENV: &str = "NEARLOCK_CONFIG";

/// Lowest accepted RSSI threshold in dBm.
pub const MIN_RSSI_DBM: i16 = -100;

/// Highest accepted RSSI threshold in dBm.
pub const MAX_RSSI_DBM: i16 = 0;

/// Largest accepted smoothing window.
pub const MAX_WINDOW_SIZE: usize = 64;

/// Longest accepted timeout, in seconds (one day).
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

static MAC_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$").expect("MAC address regex is valid")
});

/// Returns `true` if `address` has the `XX:XX:XX:XX:XX:XX` form.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS_RE.is_match(address)
}

// =============================================================================
// ERRORS
// =============================================================================

/// Errors raised while loading, validating, or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file could not be written.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Sources could not be merged or deserialized.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// One field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

fn timeout(field: &str, secs: f64) -> ConfigResult<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|err| invalid(field, err.to_string()))
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

// =============================================================================
// THRESHOLDS
// =============================================================================

/// An RSSI threshold that can be switched off.
///
/// Serialized as an integer dBm value or the string `"disabled"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawThreshold", into = "RawThreshold")]
pub enum RssiThreshold {
    /// The threshold is not used; the other one stands in for it.
    Disabled,
    /// Threshold in dBm.
    Dbm(i16),
}

impl RssiThreshold {
    /// The dBm value, if enabled.
    #[must_use]
    pub const fn dbm(self) -> Option<i16> {
        match self {
            Self::Disabled => None,
            Self::Dbm(v) => Some(v),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawThreshold {
    Dbm(i16),
    Keyword(String),
}

impl TryFrom<RawThreshold> for RssiThreshold {
    type Error = String;

    fn try_from(raw: RawThreshold) -> Result<Self, Self::Error> {
        match raw {
            RawThreshold::Dbm(v) => Ok(Self::Dbm(v)),
            RawThreshold::Keyword(s) if s.trim().eq_ignore_ascii_case("disabled") => {
                Ok(Self::Disabled)
            }
            RawThreshold::Keyword(s) => s
                .trim()
                .parse::<i16>()
                .map(Self::Dbm)
                .map_err(|_| format!("expected dBm integer or \"disabled\", got '{s}'")),
        }
    }
}

impl From<RssiThreshold> for RawThreshold {
    fn from(threshold: RssiThreshold) -> Self {
        match threshold {
            RssiThreshold::Disabled => Self::Keyword("disabled".to_string()),
            RssiThreshold::Dbm(v) => Self::Dbm(v),
        }
    }
}

/// Resolved, immutable thresholds for one monitoring session.
///
/// A disabled threshold is replaced by the other one, so a single value can
/// drive both transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdConfig {
    /// A reading at or above this turns an away session near.
    pub become_near_dbm: i16,
    /// A smoothed value below this starts the proximity (away) timer.
    pub stay_near_dbm: i16,
    /// How long the smoothed signal may stay weak before presence drops.
    pub proximity_timeout: Duration,
    /// How long without any sample before the peripheral counts as lost.
    pub signal_loss_timeout: Duration,
}

impl ThresholdConfig {
    /// Resolve the fallback rules.
    ///
    /// # Errors
    ///
    /// Returns a validation error when both thresholds are disabled.
    pub fn new(
        lock_rssi: RssiThreshold,
        unlock_rssi: RssiThreshold,
        proximity_timeout: Duration,
        signal_loss_timeout: Duration,
    ) -> ConfigResult<Self> {
        let (become_near_dbm, stay_near_dbm) = match (lock_rssi.dbm(), unlock_rssi.dbm()) {
            (Some(lock), Some(unlock)) => (unlock, lock),
            (Some(lock), None) => (lock, lock),
            (None, Some(unlock)) => (unlock, unlock),
            (None, None) => {
                return Err(invalid(
                    "monitor.lock_rssi",
                    "lock_rssi and unlock_rssi cannot both be disabled",
                ))
            }
        };
        Ok(Self {
            become_near_dbm,
            stay_near_dbm,
            proximity_timeout,
            signal_loss_timeout,
        })
    }
}

// =============================================================================
// CONFIG SECTIONS
// =============================================================================

/// Presence monitoring options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Peripheral to monitor at start-up.
    pub target: Option<String>,
    /// "Stay near" threshold.
    pub lock_rssi: RssiThreshold,
    /// "Become near" threshold.
    pub unlock_rssi: RssiThreshold,
    /// Seconds the smoothed signal may stay weak before presence drops.
    pub proximity_timeout_secs: f64,
    /// Seconds without any sample before the peripheral counts as lost.
    pub signal_loss_timeout_secs: f64,
    /// Never connect; rely on advertisements only.
    pub passive_mode: bool,
    /// Minimum RSSI for a peripheral to enter the nearby-devices listing.
    pub scan_threshold_rssi: i16,
    /// Number of samples averaged by the estimator.
    pub smoothing_window_size: usize,
    /// Seconds of silence before a listed peripheral is evicted.
    pub device_timeout_secs: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            target: None,
            lock_rssi: RssiThreshold::Dbm(-80),
            unlock_rssi: RssiThreshold::Dbm(-60),
            proximity_timeout_secs: 5.0,
            signal_loss_timeout_secs: 60.0,
            passive_mode: false,
            scan_threshold_rssi: -70,
            smoothing_window_size: DEFAULT_WINDOW_SIZE,
            device_timeout_secs: 60.0,
        }
    }
}

impl MonitorConfig {
    /// Check every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns the single error, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        for (field, threshold) in [
            ("monitor.lock_rssi", self.lock_rssi),
            ("monitor.unlock_rssi", self.unlock_rssi),
        ] {
            if let RssiThreshold::Dbm(v) = threshold {
                if !(MIN_RSSI_DBM..=MAX_RSSI_DBM).contains(&v) {
                    errors.push(invalid(
                        field,
                        format!("must be between {MIN_RSSI_DBM} and {MAX_RSSI_DBM} dBm, got {v}"),
                    ));
                }
            }
        }
        if self.lock_rssi == RssiThreshold::Disabled && self.unlock_rssi == RssiThreshold::Disabled
        {
            errors.push(invalid(
                "monitor.lock_rssi",
                "lock_rssi and unlock_rssi cannot both be disabled",
            ));
        }
        if !(MIN_RSSI_DBM..=MAX_RSSI_DBM).contains(&self.scan_threshold_rssi) {
            errors.push(invalid(
                "monitor.scan_threshold_rssi",
                format!("must be between {MIN_RSSI_DBM} and {MAX_RSSI_DBM} dBm"),
            ));
        }

        for (field, secs) in [
            ("monitor.proximity_timeout_secs", self.proximity_timeout_secs),
            ("monitor.signal_loss_timeout_secs", self.signal_loss_timeout_secs),
            ("monitor.device_timeout_secs", self.device_timeout_secs),
        ] {
            if !secs.is_finite() || secs <= 0.0 || secs > MAX_TIMEOUT_SECS {
                errors.push(invalid(
                    field,
                    format!("must be between 0 and {MAX_TIMEOUT_SECS} seconds, got {secs}"),
                ));
            }
        }

        if !(1..=MAX_WINDOW_SIZE).contains(&self.smoothing_window_size) {
            errors.push(invalid(
                "monitor.smoothing_window_size",
                format!("must be between 1 and {MAX_WINDOW_SIZE}"),
            ));
        }

        if let Some(target) = &self.target {
            if target.trim().is_empty() {
                errors.push(invalid("monitor.target", "must not be empty"));
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Validate and resolve the session thresholds.
    ///
    /// # Errors
    ///
    /// Returns any validation error from [`Self::validate`].
    pub fn thresholds(&self) -> ConfigResult<ThresholdConfig> {
        self.validate()?;
        ThresholdConfig::new(
            self.lock_rssi,
            self.unlock_rssi,
            timeout("monitor.proximity_timeout_secs", self.proximity_timeout_secs)?,
            timeout("monitor.signal_loss_timeout_secs", self.signal_loss_timeout_secs)?,
        )
    }

    /// Listing eviction timeout. Only meaningful after validation.
    #[must_use]
    pub fn device_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.device_timeout_secs)
            .unwrap_or(Duration::from_secs(60))
    }
}

/// Local HTTP API options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the API binds to.
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7878".to_string(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Presence monitoring.
    pub monitor: MonitorConfig,
    /// HTTP API.
    pub server: ServerConfig,
}

impl Config {
    /// Load from `path` (if it exists) layered under process environment
    /// overrides, then validate.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        Self::load_with_env(path, Self::environment())
    }

    /// Like [`Self::load`], with an explicit environment source.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load_with_env(path: &Path, env: config::Environment) -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(env)
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.monitor.validate()?;
        Ok(config)
    }

    /// Load from `path`, which must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file is missing.
    pub fn load_required(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::load(path)
    }

    /// Write as pretty TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Environment override source: `NEARLOCK__MONITOR__LOCK_RSSI=-75`.
    #[must_use]
    pub fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    /// Config file path: `$NEARLOCK_CONFIG`, else the platform default.
    #[must_use]
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        // On Linux: /etc/nearlock/config.toml
        // Elsewhere: the per-user config directory
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/nearlock/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "nearlock").map_or_else(
                || PathBuf::from("./nearlock.toml"),
                |dirs| dirs.config_dir().join("config.toml"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> config::Environment {
        Config::environment().source(Some(config::Map::new()))
    }

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        Config::environment().source(Some(
            vars.iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        ))
    }

    #[test]
    fn test_mac_address_validation() {
        assert!(is_valid_mac_address("AA:BB:CC:DD:EE:FF"));
        assert!(is_valid_mac_address("aa:bb:cc:dd:ee:ff"));
        assert!(!is_valid_mac_address("AA:BB:CC:DD:EE"));
        assert!(!is_valid_mac_address("AA-BB-CC-DD-EE-FF"));
        assert!(!is_valid_mac_address("GG:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        config.validate().unwrap();
        let thresholds = config.thresholds().unwrap();
        assert_eq!(thresholds.become_near_dbm, -60);
        assert_eq!(thresholds.stay_near_dbm, -80);
        assert_eq!(thresholds.proximity_timeout, Duration::from_secs(5));
        assert_eq!(thresholds.signal_loss_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_unlock_disabled_falls_back_to_lock() {
        let t = ThresholdConfig::new(
            RssiThreshold::Dbm(-75),
            RssiThreshold::Disabled,
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(t.become_near_dbm, -75);
        assert_eq!(t.stay_near_dbm, -75);
    }

    #[test]
    fn test_lock_disabled_falls_back_to_unlock() {
        let t = ThresholdConfig::new(
            RssiThreshold::Disabled,
            RssiThreshold::Dbm(-55),
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(t.become_near_dbm, -55);
        assert_eq!(t.stay_near_dbm, -55);
    }

    #[test]
    fn test_both_thresholds_disabled_rejected() {
        let config = MonitorConfig {
            lock_rssi: RssiThreshold::Disabled,
            unlock_rssi: RssiThreshold::Disabled,
            ..MonitorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));
        assert!(config.thresholds().is_err());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let config = MonitorConfig {
            lock_rssi: RssiThreshold::Dbm(-120),
            proximity_timeout_secs: 0.0,
            signal_loss_timeout_secs: f64::NAN,
            smoothing_window_size: 0,
            target: Some("  ".into()),
            ..MonitorConfig::default()
        };
        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 5),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_huge_timeout_rejected() {
        let config = MonitorConfig {
            proximity_timeout_secs: 1e20,
            ..MonitorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { ref field, .. }) if field == "monitor.proximity_timeout_secs"
        ));
        assert!(config.thresholds().is_err());

        let config = MonitorConfig {
            signal_loss_timeout_secs: MAX_TIMEOUT_SECS,
            ..MonitorConfig::default()
        };
        assert!(config.thresholds().is_ok());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with_env(&dir.path().join("absent.toml"), no_env()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_required_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_required(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_toml_with_disabled_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[monitor]
target = "aa:bb:cc:dd:ee:ff"
lock_rssi = -75
unlock_rssi = "disabled"
proximity_timeout_secs = 8.5
passive_mode = true

[server]
bind_address = "0.0.0.0:9000"
"#,
        )
        .unwrap();

        let config = Config::load_with_env(&path, no_env()).unwrap();
        assert_eq!(config.monitor.target.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(config.monitor.lock_rssi, RssiThreshold::Dbm(-75));
        assert_eq!(config.monitor.unlock_rssi, RssiThreshold::Disabled);
        assert!((config.monitor.proximity_timeout_secs - 8.5).abs() < f64::EPSILON);
        assert!(config.monitor.passive_mode);
        assert_eq!(config.monitor.signal_loss_timeout_secs, 60.0);
        assert_eq!(config.server.bind_address, "0.0.0.0:9000");
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[monitor]\nlock_rssi = -75\n").unwrap();

        let config = Config::load_with_env(
            &path,
            env(&[
                ("NEARLOCK__MONITOR__LOCK_RSSI", "-85"),
                ("NEARLOCK__MONITOR__PASSIVE_MODE", "true"),
            ]),
        )
        .unwrap();
        assert_eq!(config.monitor.lock_rssi, RssiThreshold::Dbm(-85));
        assert!(config.monitor.passive_mode);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[monitor]\nlock_rssi = \"disabled\"\nunlock_rssi = \"disabled\"\n",
        )
        .unwrap();
        let err = Config::load_with_env(&path, no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_load_rejects_garbage_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[monitor]\nlock_rssi = \"loud\"\n").unwrap();
        let err = Config::load_with_env(&path, no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.monitor.target = Some("AA:BB:CC:DD:EE:FF".into());
        config.monitor.unlock_rssi = RssiThreshold::Disabled;

        config.save(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("unlock_rssi = \"disabled\""));

        let loaded = Config::load_with_env(&path, no_env()).unwrap();
        assert_eq!(loaded, config);
    }
}
