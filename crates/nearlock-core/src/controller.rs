//! The monitoring session.
//!
//! A [`Monitor`] owns everything a session needs: the presence machine, the
//! timer set, the scan/connection mode and the device listing. It consumes
//! [`RadioEvent`]s and fired timers, and issues commands to its [`Central`].
//!
//! ## Modes
//!
//! In **passive** mode the monitored peripheral is followed through its
//! advertisements while scanning. Unless passive-only operation is
//! configured, each advertisement also triggers a connection attempt and an
//! RSSI read. The first successful read switches to **active** mode: scanning
//! stops (unless a listing is running) and a keepalive polls RSSI over the
//! connection every two seconds. When reads go stale the monitor drops back
//! to passive scanning.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::config::{ConfigResult, MonitorConfig};
use crate::observer::PresenceObserver;
use crate::presence::PresenceMachine;
use crate::radio::{Advertisement, Central, DeviceInfoField, PeripheralId, RadioEvent};
use crate::registry::{DeviceSummary, Observation, PeripheralRegistry};
use crate::timers::{TimerKind, TimerSet};

/// How long a connection attempt may stay pending.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Active-mode RSSI poll period.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);

/// Active mode is abandoned once the last successful read is older than this.
pub const ACTIVE_READ_STALENESS: Duration = Duration::from_secs(10);

/// How the monitored peripheral is being followed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Advertisement scanning.
    #[default]
    Passive,
    /// Connected RSSI polling.
    Active,
}

/// Link state towards the monitored peripheral.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link and no attempt in flight.
    #[default]
    Disconnected,
    /// An attempt is in flight.
    Connecting,
    /// Linked.
    Connected,
}

/// Read-only view of a monitor, published after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MonitorSnapshot {
    /// Monitored peripheral.
    pub target: Option<PeripheralId>,
    /// Whether the peripheral is judged near.
    pub presence: bool,
    /// Scan/connection mode.
    pub mode: Mode,
    /// Link state towards the target.
    pub connection: ConnectionState,
    /// Connections are never attempted.
    pub passive_mode: bool,
    /// Whether the nearby-devices listing is running.
    pub listing: bool,
    /// Last reported adapter power state.
    pub radio_powered: Option<bool>,
    /// Last smoothed RSSI in dBm.
    pub smoothed_rssi: Option<i16>,
    /// Smoothing window, oldest first.
    pub window: Vec<i16>,
    /// Timers currently armed.
    pub armed_timers: Vec<TimerKind>,
    /// Listed nearby devices, strongest first.
    pub devices: Vec<DeviceSummary>,
}

/// One monitoring session and its radio collaborator.
#[derive(Debug)]
pub struct Monitor<C, O> {
    central: C,
    observer: O,
    presence: PresenceMachine,
    timers: TimerSet,
    registry: PeripheralRegistry,
    target: Option<PeripheralId>,
    target_seen: bool,
    mode: Mode,
    connection: ConnectionState,
    passive_mode: bool,
    scanning: bool,
    last_read_at: Option<Instant>,
    radio_powered: Option<bool>,
    power_warning_sent: bool,
    power_warning_acknowledged: bool,
}

impl<C: Central, O: PresenceObserver> Monitor<C, O> {
    /// Build an idle monitor. Nothing is sent to the radio until
    /// [`Self::start_monitoring`] or [`Self::start_listing`].
    ///
    /// # Errors
    ///
    /// Returns a validation error for an inconsistent configuration.
    pub fn new(config: &MonitorConfig, central: C, observer: O) -> ConfigResult<Self> {
        let thresholds = config.thresholds()?;
        Ok(Self {
            central,
            observer,
            presence: PresenceMachine::new(thresholds, config.smoothing_window_size),
            timers: TimerSet::new(),
            registry: PeripheralRegistry::new(config.scan_threshold_rssi, config.device_timeout()),
            target: None,
            target_seen: false,
            mode: Mode::Passive,
            connection: ConnectionState::Disconnected,
            passive_mode: config.passive_mode,
            scanning: false,
            last_read_at: None,
            radio_powered: None,
            power_warning_sent: false,
            power_warning_acknowledged: false,
        })
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Start (or restart) monitoring `target`.
    ///
    /// Cancels every timer and any connection to the previous target, resets
    /// presence to `away` without notification, arms the signal-loss timer and
    /// makes sure scanning runs.
    pub fn start_monitoring(&mut self, target: PeripheralId, now: Instant) {
        if let Some(previous) = self.target.take() {
            if self.target_seen || self.connection != ConnectionState::Disconnected {
                self.central.cancel_connection(&previous);
            }
        }
        info!(%target, "Starting monitor");

        self.timers.cancel_all();
        self.presence.reset();
        self.mode = Mode::Passive;
        self.connection = ConnectionState::Disconnected;
        self.target_seen = false;
        self.last_read_at = None;
        self.target = Some(target);

        self.presence.touch(now, &mut self.timers);
        self.ensure_scanning();
    }

    /// Switch passive-only operation on or off.
    ///
    /// Turning it on disarms the keepalive and connection timers, drops the
    /// link to the target and returns to scanning. Presence timers keep
    /// running.
    pub fn set_passive_mode(&mut self, passive: bool) {
        if self.passive_mode == passive {
            return;
        }
        info!(passive, "Passive mode changed");
        self.passive_mode = passive;
        if passive {
            self.fall_back_to_passive();
        }
    }

    /// Start recording nearby devices.
    pub fn start_listing(&mut self) {
        info!("Listing nearby devices");
        self.registry.set_listing(true);
        self.ensure_scanning();
    }

    /// Stop recording nearby devices. Scanning stops too when the monitor no
    /// longer needs it.
    pub fn stop_listing(&mut self) {
        info!("Stopped listing nearby devices");
        self.registry.set_listing(false);
        if self.scanning && (self.mode == Mode::Active || self.target.is_none()) {
            self.central.stop_scan();
            self.scanning = false;
        }
    }

    /// Suppress power-off warnings for the rest of the session.
    pub fn acknowledge_power_warning(&mut self) {
        self.power_warning_acknowledged = true;
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// Process one radio event.
    pub fn handle_event(&mut self, event: RadioEvent, now: Instant) {
        match event {
            RadioEvent::PowerChanged { powered } => self.on_power_changed(powered, now),
            RadioEvent::Advertisement(adv) => self.on_advertisement(&adv, now),
            RadioEvent::Connected(id) => self.on_connected(&id, now),
            RadioEvent::ConnectFailed(id) => self.on_connect_failed(&id),
            RadioEvent::Disconnected(id) => self.on_disconnected(&id),
            RadioEvent::RssiRead { id, rssi } => self.on_rssi_read(&id, rssi, now),
            RadioEvent::ServicesInvalidated(id) => self.on_services_invalidated(&id),
            RadioEvent::CharacteristicRead { id, field, value } => {
                self.on_characteristic_read(&id, field, value);
            }
        }
    }

    /// Run every timer due at `now`, then evict expired listing entries.
    pub fn fire_due_timers(&mut self, now: Instant) {
        while let Some(kind) = self.timers.pop_due(now) {
            debug!(?kind, "Timer fired");
            match kind {
                TimerKind::SignalLoss => {
                    self.presence.on_signal_loss(&mut self.timers, &mut self.observer);
                }
                TimerKind::Proximity => self.presence.on_proximity_timeout(&mut self.observer),
                TimerKind::ConnectTimeout => self.on_connect_timeout(),
                TimerKind::Keepalive => self.on_keepalive(now),
            }
        }

        for record in self.registry.expire(now) {
            debug!(id = %record.id, "Listed device expired");
            self.observer.device_removed(&record);
            if !self.is_target(&record.id) {
                self.central.cancel_connection(&record.id);
            }
        }
    }

    /// Earliest instant at which [`Self::fire_due_timers`] has work.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.timers.next_deadline(), self.registry.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn on_power_changed(&mut self, powered: bool, now: Instant) {
        let was_powered = self.radio_powered.replace(powered) == Some(true);
        if powered {
            if !was_powered {
                info!("Bluetooth powered on");
                self.power_warning_sent = false;
                self.scanning = false;
            }
            if self.mode == Mode::Passive {
                self.ensure_scanning();
            }
            if self.target.is_some() && !was_powered {
                self.presence.touch(now, &mut self.timers);
            }
            return;
        }

        warn!("Bluetooth powered off");
        self.presence.force_away();
        self.timers.cancel_all();
        self.mode = Mode::Passive;
        self.connection = ConnectionState::Disconnected;
        self.scanning = false;
        self.last_read_at = None;
        if !self.power_warning_sent && !self.power_warning_acknowledged {
            self.power_warning_sent = true;
            self.observer.radio_power_warning();
        }
    }

    fn on_advertisement(&mut self, adv: &Advertisement, now: Instant) {
        let is_target = self.is_target(&adv.id);
        if is_target {
            self.target_seen = true;
            if self.mode == Mode::Passive {
                self.ingest(adv.rssi, now);
                if !self.passive_mode {
                    self.connect_target(now);
                }
            }
        }

        match self.registry.observe(adv, now) {
            Observation::Discovered => {
                if let Some(record) = self.registry.get(&adv.id) {
                    info!(id = %record.id, label = %record.display_label(), "Device discovered");
                    self.observer.device_discovered(record);
                }
                if !is_target {
                    self.central.connect(&adv.id);
                }
            }
            Observation::Updated => {
                if let Some(record) = self.registry.get(&adv.id) {
                    self.observer.device_updated(record);
                }
            }
            Observation::Ignored => {}
        }
    }

    fn on_connected(&mut self, id: &PeripheralId, now: Instant) {
        if self.registry.is_listing() && self.registry.contains(id) {
            self.central.discover_device_information(id);
        }
        if !self.is_target(id) {
            return;
        }
        self.connection = ConnectionState::Connected;
        self.timers.cancel(TimerKind::ConnectTimeout);
        if !self.passive_mode {
            info!(%id, "Connected");
            self.presence.touch(now, &mut self.timers);
            self.central.read_rssi(id);
        }
    }

    fn on_connect_failed(&mut self, id: &PeripheralId) {
        if self.is_target(id) {
            debug!(%id, "Connection failed");
            self.connection = ConnectionState::Disconnected;
            self.timers.cancel(TimerKind::ConnectTimeout);
        }
    }

    fn on_disconnected(&mut self, id: &PeripheralId) {
        if self.is_target(id) {
            debug!(%id, "Disconnected");
            self.connection = ConnectionState::Disconnected;
        }
    }

    fn on_rssi_read(&mut self, id: &PeripheralId, rssi: Option<i16>, now: Instant) {
        if !self.is_target(id) {
            return;
        }
        let Some(raw) = rssi else {
            debug!(%id, "RSSI read failed");
            return;
        };
        self.ingest(raw, now);
        if self.connection != ConnectionState::Connected {
            return;
        }
        self.last_read_at = Some(now);
        if self.mode == Mode::Passive && !self.passive_mode {
            self.enter_active_mode(now);
        }
    }

    fn on_services_invalidated(&mut self, id: &PeripheralId) {
        if self.registry.is_listing() && self.registry.contains(id) {
            debug!(%id, "Services changed, rediscovering");
            self.central.discover_device_information(id);
        }
    }

    fn on_characteristic_read(&mut self, id: &PeripheralId, field: DeviceInfoField, value: Vec<u8>) {
        let Some(record) = self.registry.record_characteristic(id, field, value) else {
            return;
        };
        let complete = record.has_device_information();
        self.observer.device_updated(record);
        if complete && !self.is_target(id) {
            self.central.cancel_connection(id);
        }
    }

    fn on_connect_timeout(&mut self) {
        if self.connection != ConnectionState::Connecting {
            return;
        }
        if let Some(target) = &self.target {
            debug!(%target, "Connection attempt timed out");
            self.central.cancel_connection(target);
        }
        self.connection = ConnectionState::Disconnected;
    }

    fn on_keepalive(&mut self, now: Instant) {
        let stale = match self.last_read_at {
            Some(at) => now.duration_since(at) > ACTIVE_READ_STALENESS,
            None => true,
        };
        if stale {
            info!("RSSI reads went stale, falling back to passive mode");
            self.fall_back_to_passive();
        } else if self.connection == ConnectionState::Connected {
            if let Some(target) = &self.target {
                self.central.read_rssi(target);
            }
        } else {
            self.connect_target(now);
        }
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn is_target(&self, id: &PeripheralId) -> bool {
        self.target.as_ref() == Some(id)
    }

    fn ingest(&mut self, raw: i16, now: Instant) {
        let active = self.mode == Mode::Active;
        self.presence
            .ingest(raw, active, now, &mut self.timers, &mut self.observer);
    }

    fn connect_target(&mut self, now: Instant) {
        let Some(target) = self.target.clone() else {
            return;
        };
        self.central.read_rssi(&target);
        if self.connection != ConnectionState::Disconnected {
            return;
        }
        debug!(%target, "Connecting");
        self.central.connect(&target);
        self.connection = ConnectionState::Connecting;
        self.timers
            .arm_once(TimerKind::ConnectTimeout, now, CONNECT_TIMEOUT);
    }

    fn enter_active_mode(&mut self, now: Instant) {
        info!("Entering active mode");
        self.mode = Mode::Active;
        if self.scanning && !self.registry.is_listing() {
            self.central.stop_scan();
            self.scanning = false;
        }
        self.timers
            .arm_repeating(TimerKind::Keepalive, now, KEEPALIVE_INTERVAL);
    }

    fn fall_back_to_passive(&mut self) {
        self.timers.cancel(TimerKind::Keepalive);
        self.timers.cancel(TimerKind::ConnectTimeout);
        if let Some(target) = &self.target {
            self.central.cancel_connection(target);
        }
        self.connection = ConnectionState::Disconnected;
        self.mode = Mode::Passive;
        self.last_read_at = None;
        self.ensure_scanning();
    }

    fn ensure_scanning(&mut self) {
        if self.scanning || self.radio_powered == Some(false) {
            return;
        }
        self.central.start_scan();
        self.scanning = true;
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Point-in-time view of the session.
    #[must_use]
    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            target: self.target.clone(),
            presence: self.presence.is_present(),
            mode: self.mode,
            connection: self.connection,
            passive_mode: self.passive_mode,
            listing: self.registry.is_listing(),
            radio_powered: self.radio_powered,
            smoothed_rssi: self.presence.last_smoothed(),
            window: self.presence.window(),
            armed_timers: self.timers.armed(),
            devices: self.registry.summaries(),
        }
    }

    /// Monitored peripheral.
    #[must_use]
    pub const fn target(&self) -> Option<&PeripheralId> {
        self.target.as_ref()
    }

    /// Whether the peripheral is judged near.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.presence.is_present()
    }

    /// Current mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Link state towards the target.
    #[must_use]
    pub const fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Whether scanning was requested and not since stopped.
    #[must_use]
    pub const fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Presence machine.
    #[must_use]
    pub const fn presence(&self) -> &PresenceMachine {
        &self.presence
    }

    /// Timer set.
    #[must_use]
    pub const fn timers(&self) -> &TimerSet {
        &self.timers
    }

    /// Device listing.
    #[must_use]
    pub const fn registry(&self) -> &PeripheralRegistry {
        &self.registry
    }

    /// Radio collaborator.
    #[must_use]
    pub const fn central(&self) -> &C {
        &self.central
    }

    /// Radio collaborator, mutably.
    pub fn central_mut(&mut self) -> &mut C {
        &mut self.central
    }

    /// Observer.
    #[must_use]
    pub const fn observer(&self) -> &O {
        &self.observer
    }

    /// Observer, mutably.
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{ObserverEvent, RecordingObserver};
    use crate::radio::{CentralCommand, MockCentral};

    type TestMonitor = Monitor<MockCentral, RecordingObserver>;

    fn target() -> PeripheralId {
        PeripheralId::new("AA:BB:CC:DD:EE:FF")
    }

    fn monitor(passive_mode: bool) -> TestMonitor {
        let config = MonitorConfig {
            passive_mode,
            ..MonitorConfig::default()
        };
        Monitor::new(&config, MockCentral::new(), RecordingObserver::new()).unwrap()
    }

    fn rssi(m: &mut TestMonitor, raw: i16, now: Instant) {
        m.handle_event(
            RadioEvent::RssiRead {
                id: target(),
                rssi: Some(raw),
            },
            now,
        );
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = MonitorConfig {
            smoothing_window_size: 0,
            ..MonitorConfig::default()
        };
        assert!(Monitor::new(&config, MockCentral::new(), RecordingObserver::new()).is_err());
    }

    #[test]
    fn test_idle_monitor_sends_nothing() {
        let m = monitor(false);
        assert!(m.central().commands().is_empty());
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_start_monitoring_scans_and_arms_signal_loss() {
        let now = Instant::now();
        let mut m = monitor(false);
        m.start_monitoring(target(), now);
        assert_eq!(m.central().commands(), &[CentralCommand::StartScan]);
        assert_eq!(m.timers().armed(), vec![TimerKind::SignalLoss]);
        assert_eq!(m.next_deadline(), Some(now + Duration::from_secs(60)));
        assert!(!m.is_present());
    }

    #[test]
    fn test_advertisement_connects_and_reads() {
        let now = Instant::now();
        let mut m = monitor(false);
        m.start_monitoring(target(), now);
        m.central_mut().take();

        m.handle_event(RadioEvent::Advertisement(Advertisement::new(target(), -55)), now);
        assert!(m.is_present());
        assert_eq!(
            m.central().commands(),
            &[
                CentralCommand::ReadRssi(target()),
                CentralCommand::Connect(target())
            ]
        );
        assert_eq!(m.connection_state(), ConnectionState::Connecting);
        assert!(m.timers().is_armed(TimerKind::ConnectTimeout));

        // Second advertisement only asks for another read.
        m.central_mut().take();
        m.handle_event(RadioEvent::Advertisement(Advertisement::new(target(), -55)), now);
        assert_eq!(m.central().commands(), &[CentralCommand::ReadRssi(target())]);
    }

    #[test]
    fn test_passive_mode_never_connects() {
        let now = Instant::now();
        let mut m = monitor(true);
        m.start_monitoring(target(), now);
        m.handle_event(RadioEvent::Advertisement(Advertisement::new(target(), -55)), now);
        assert!(m.is_present());
        assert_eq!(m.central().commands(), &[CentralCommand::StartScan]);
    }

    #[test]
    fn test_other_advertisements_are_ignored_when_not_listing() {
        let now = Instant::now();
        let mut m = monitor(false);
        m.start_monitoring(target(), now);
        m.handle_event(RadioEvent::Advertisement(Advertisement::new("other", -30)), now);
        assert!(!m.is_present());
        assert!(m.observer().events().is_empty());
    }

    #[test]
    fn test_first_read_enters_active_mode() {
        let now = Instant::now();
        let mut m = monitor(false);
        m.start_monitoring(target(), now);
        m.handle_event(RadioEvent::Connected(target()), now);
        assert_eq!(m.connection_state(), ConnectionState::Connected);
        m.central_mut().take();

        rssi(&mut m, -50, now);
        assert_eq!(m.mode(), Mode::Active);
        assert!(!m.is_scanning());
        assert_eq!(m.central().commands(), &[CentralCommand::StopScan]);
        assert!(m.timers().is_armed(TimerKind::Keepalive));
    }

    #[test]
    fn test_read_while_connecting_stays_passive() {
        let now = Instant::now();
        let mut m = monitor(false);
        m.start_monitoring(target(), now);
        m.handle_event(RadioEvent::Advertisement(Advertisement::new(target(), -60)), now);
        rssi(&mut m, -60, now);

        assert_eq!(m.connection_state(), ConnectionState::Connecting);
        assert_eq!(m.mode(), Mode::Passive);
        assert!(m.is_scanning());
        assert!(!m.timers().is_armed(TimerKind::Keepalive));
        assert_eq!(m.presence().window(), vec![-60, -60]);
    }

    #[test]
    fn test_keepalive_reconnects_after_disconnect() {
        let mut now = Instant::now();
        let mut m = monitor(false);
        m.start_monitoring(target(), now);
        m.handle_event(RadioEvent::Connected(target()), now);
        rssi(&mut m, -50, now);
        assert_eq!(m.mode(), Mode::Active);

        m.handle_event(RadioEvent::Disconnected(target()), now);
        assert_eq!(m.connection_state(), ConnectionState::Disconnected);
        m.central_mut().take();

        now += KEEPALIVE_INTERVAL;
        m.fire_due_timers(now);
        assert_eq!(m.mode(), Mode::Active);
        assert_eq!(m.connection_state(), ConnectionState::Connecting);
        assert!(m
            .central()
            .commands()
            .contains(&CentralCommand::Connect(target())));
        assert!(m.timers().is_armed(TimerKind::ConnectTimeout));
    }

    #[test]
    fn test_keepalive_polls_while_fresh() {
        let mut now = Instant::now();
        let mut m = monitor(false);
        m.start_monitoring(target(), now);
        m.handle_event(RadioEvent::Connected(target()), now);
        rssi(&mut m, -50, now);
        m.central_mut().take();

        now += KEEPALIVE_INTERVAL;
        m.fire_due_timers(now);
        assert_eq!(m.central().commands(), &[CentralCommand::ReadRssi(target())]);
        assert_eq!(m.mode(), Mode::Active);
    }

    #[test]
    fn test_stale_reads_fall_back_to_passive() {
        let mut now = Instant::now();
        let mut m = monitor(false);
        m.start_monitoring(target(), now);
        m.handle_event(RadioEvent::Connected(target()), now);
        rssi(&mut m, -50, now);

        for _ in 0..5 {
            now += KEEPALIVE_INTERVAL;
            m.fire_due_timers(now);
        }
        assert_eq!(m.mode(), Mode::Active);
        m.central_mut().take();

        now += KEEPALIVE_INTERVAL;
        m.fire_due_timers(now);
        assert_eq!(m.mode(), Mode::Passive);
        assert_eq!(m.connection_state(), ConnectionState::Disconnected);
        assert!(!m.timers().is_armed(TimerKind::Keepalive));
        assert_eq!(
            m.central().commands(),
            &[
                CentralCommand::CancelConnection(target()),
                CentralCommand::StartScan
            ]
        );
    }

    #[test]
    fn test_connect_timeout_resets_link() {
        let now = Instant::now();
        let mut m = monitor(false);
        m.start_monitoring(target(), now);
        m.handle_event(RadioEvent::Advertisement(Advertisement::new(target(), -90)), now);
        m.central_mut().take();

        m.fire_due_timers(now + CONNECT_TIMEOUT);
        assert_eq!(m.connection_state(), ConnectionState::Disconnected);
        assert!(m
            .central()
            .commands()
            .contains(&CentralCommand::CancelConnection(target())));
    }

    #[test]
    fn test_connect_failure_resets_link() {
        let now = Instant::now();
        let mut m = monitor(false);
        m.start_monitoring(target(), now);
        m.handle_event(RadioEvent::Advertisement(Advertisement::new(target(), -90)), now);
        m.handle_event(RadioEvent::ConnectFailed(target()), now);
        assert_eq!(m.connection_state(), ConnectionState::Disconnected);
        assert!(!m.timers().is_armed(TimerKind::ConnectTimeout));
    }

    #[test]
    fn test_enabling_passive_mode_drops_link() {
        let now = Instant::now();
        let mut m = monitor(false);
        m.start_monitoring(target(), now);
        m.handle_event(RadioEvent::Connected(target()), now);
        rssi(&mut m, -50, now);
        m.central_mut().take();

        m.set_passive_mode(true);
        assert_eq!(m.mode(), Mode::Passive);
        assert_eq!(m.timers().armed(), vec![TimerKind::SignalLoss]);
        assert_eq!(
            m.central().commands(),
            &[
                CentralCommand::CancelConnection(target()),
                CentralCommand::StartScan
            ]
        );

        // Late reads still feed presence but never re-enter active mode.
        rssi(&mut m, -50, now);
        assert_eq!(m.mode(), Mode::Passive);
    }

    #[test]
    fn test_power_off_warns_once_and_silences_presence() {
        let now = Instant::now();
        let mut m = monitor(false);
        m.handle_event(RadioEvent::PowerChanged { powered: true }, now);
        m.start_monitoring(target(), now);
        m.handle_event(RadioEvent::Advertisement(Advertisement::new(target(), -50)), now);
        m.observer_mut().take();

        m.handle_event(RadioEvent::PowerChanged { powered: false }, now);
        m.handle_event(RadioEvent::PowerChanged { powered: false }, now);
        assert!(!m.is_present());
        assert_eq!(m.timers().armed_count(), 0);
        assert_eq!(m.observer().events(), &[ObserverEvent::PowerWarning]);

        m.central_mut().take();
        m.handle_event(RadioEvent::PowerChanged { powered: true }, now);
        assert_eq!(m.central().commands(), &[CentralCommand::StartScan]);
        assert!(m.timers().is_armed(TimerKind::SignalLoss));

        m.acknowledge_power_warning();
        m.handle_event(RadioEvent::PowerChanged { powered: false }, now);
        assert_eq!(m.observer().events(), &[ObserverEvent::PowerWarning]);
    }

    #[test]
    fn test_no_scan_while_powered_off() {
        let now = Instant::now();
        let mut m = monitor(false);
        m.handle_event(RadioEvent::PowerChanged { powered: false }, now);
        m.start_monitoring(target(), now);
        assert!(m.central().commands().is_empty());
        m.handle_event(RadioEvent::PowerChanged { powered: true }, now);
        assert_eq!(m.central().commands(), &[CentralCommand::StartScan]);
    }

    #[test]
    fn test_listing_discovers_and_labels_devices() {
        let now = Instant::now();
        let mut m = monitor(false);
        m.start_listing();
        let other = PeripheralId::new("11:22:33:44:55:66");
        m.handle_event(RadioEvent::Advertisement(Advertisement::new(other.clone(), -40)), now);
        assert_eq!(
            m.central().commands(),
            &[CentralCommand::StartScan, CentralCommand::Connect(other.clone())]
        );

        m.handle_event(RadioEvent::Connected(other.clone()), now);
        assert_eq!(
            m.central().commands().last(),
            Some(&CentralCommand::DiscoverDeviceInformation(other.clone()))
        );

        m.handle_event(
            RadioEvent::CharacteristicRead {
                id: other.clone(),
                field: DeviceInfoField::Manufacturer,
                value: b"Acme".to_vec(),
            },
            now,
        );
        m.handle_event(
            RadioEvent::CharacteristicRead {
                id: other.clone(),
                field: DeviceInfoField::Model,
                value: b"Tag 2".to_vec(),
            },
            now,
        );
        assert_eq!(
            m.central().commands().last(),
            Some(&CentralCommand::CancelConnection(other.clone()))
        );
        assert_eq!(m.snapshot().devices[0].label, "Acme/Tag 2");
        assert_eq!(
            m.observer().events().last(),
            Some(&ObserverEvent::DeviceUpdated("Acme/Tag 2".to_string()))
        );
    }

    #[test]
    fn test_services_invalidated_rediscovers_listed_device() {
        let now = Instant::now();
        let mut m = monitor(false);
        m.start_listing();
        let other = PeripheralId::new("11:22:33:44:55:66");
        m.handle_event(RadioEvent::Advertisement(Advertisement::new(other.clone(), -40)), now);
        m.central_mut().take();

        m.handle_event(RadioEvent::ServicesInvalidated(other.clone()), now);
        assert_eq!(
            m.central().commands(),
            &[CentralCommand::DiscoverDeviceInformation(other)]
        );

        // Unlisted peripherals are left alone.
        m.central_mut().take();
        m.handle_event(RadioEvent::ServicesInvalidated(PeripheralId::new("unknown")), now);
        assert!(m.central().commands().is_empty());
    }

    #[test]
    fn test_stale_fallback_cancels_untracked_link() {
        let mut now = Instant::now();
        let mut m = monitor(false);
        m.start_monitoring(target(), now);
        m.handle_event(RadioEvent::Connected(target()), now);
        rssi(&mut m, -50, now);
        m.handle_event(RadioEvent::Disconnected(target()), now);
        m.handle_event(RadioEvent::ConnectFailed(target()), now);

        // Keepalive reconnect attempts keep failing until reads go stale.
        while m.mode() == Mode::Active {
            now += KEEPALIVE_INTERVAL;
            m.fire_due_timers(now);
            m.handle_event(RadioEvent::ConnectFailed(target()), now);
        }
        assert_eq!(m.connection_state(), ConnectionState::Disconnected);
        assert!(m
            .central()
            .commands()
            .ends_with(&[CentralCommand::CancelConnection(target()), CentralCommand::StartScan]));
    }

    #[test]
    fn test_listing_expiry_notifies_and_disconnects() {
        let now = Instant::now();
        let mut m = monitor(false);
        m.start_listing();
        let other = PeripheralId::new("other");
        m.handle_event(RadioEvent::Advertisement(Advertisement::new(other.clone(), -40)), now);
        assert_eq!(m.next_deadline(), Some(now + Duration::from_secs(60)));

        m.fire_due_timers(now + Duration::from_secs(60));
        assert!(m.registry().is_empty());
        assert_eq!(
            m.observer().events().last(),
            Some(&ObserverEvent::DeviceRemoved("other".to_string()))
        );
        assert_eq!(
            m.central().commands().last(),
            Some(&CentralCommand::CancelConnection(other))
        );
    }

    #[test]
    fn test_listing_keeps_scanning_in_active_mode() {
        let now = Instant::now();
        let mut m = monitor(false);
        m.start_listing();
        m.start_monitoring(target(), now);
        m.handle_event(RadioEvent::Connected(target()), now);
        rssi(&mut m, -50, now);
        assert_eq!(m.mode(), Mode::Active);
        assert!(m.is_scanning());

        m.stop_listing();
        assert!(!m.is_scanning());
        assert_eq!(m.central().commands().last(), Some(&CentralCommand::StopScan));
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let now = Instant::now();
        let mut m = monitor(false);
        m.start_monitoring(target(), now);
        m.handle_event(RadioEvent::Advertisement(Advertisement::new(target(), -50)), now);
        let snap = m.snapshot();
        assert_eq!(snap.target, Some(target()));
        assert!(snap.presence);
        assert_eq!(snap.smoothed_rssi, Some(-50));
        assert_eq!(snap.window, vec![-50]);
        assert_eq!(snap.connection, ConnectionState::Connecting);
        assert_eq!(
            snap.armed_timers,
            vec![TimerKind::SignalLoss, TimerKind::ConnectTimeout]
        );
    }
}
