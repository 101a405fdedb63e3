//! Presence state machine.
//!
//! Two states, `away` (initial) and `near`, with hysteresis on both the
//! signal level and time:
//!
//! - **away → near**: a clamped reading at or above the "become near"
//!   threshold. The smoothing window is cleared so samples from before the
//!   recovery cannot drag the mean back down.
//! - **near → away**: the smoothed value stays below the "stay near"
//!   threshold for the whole proximity timeout.
//! - **any → away**: nothing was heard for the signal-loss timeout.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::config::ThresholdConfig;
use crate::estimator::{clamp_rssi, SignalEstimator};
use crate::observer::PresenceObserver;
use crate::timers::{TimerKind, TimerSet};

/// Why presence changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PresenceReason {
    /// A strong enough reading arrived while away.
    Close,
    /// The smoothed signal stayed weak for the proximity timeout.
    Away,
    /// Nothing was heard for the signal-loss timeout.
    Lost,
}

impl PresenceReason {
    /// Wire name of the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Close => "close",
            Self::Away => "away",
            Self::Lost => "lost",
        }
    }
}

impl fmt::Display for PresenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence flag plus the smoothing window that feeds it.
#[derive(Debug, Clone)]
pub struct PresenceMachine {
    thresholds: ThresholdConfig,
    estimator: SignalEstimator,
    present: bool,
    last_smoothed: Option<i16>,
}

impl PresenceMachine {
    /// Create an `away` machine.
    #[must_use]
    pub fn new(thresholds: ThresholdConfig, window_size: usize) -> Self {
        Self {
            thresholds,
            estimator: SignalEstimator::new(window_size),
            present: false,
            last_smoothed: None,
        }
    }

    /// Back to `away` with an empty window, without notifying anyone.
    pub fn reset(&mut self) {
        self.present = false;
        self.estimator.clear();
        self.last_smoothed = None;
    }

    /// Feed one raw reading. Returns the smoothed value.
    ///
    /// `active` is reported to the observer alongside the smoothed value.
    pub fn ingest<O: PresenceObserver>(
        &mut self,
        raw: i16,
        active: bool,
        now: Instant,
        timers: &mut TimerSet,
        observer: &mut O,
    ) -> i16 {
        let rssi = clamp_rssi(raw);

        if !self.present && rssi >= self.thresholds.become_near_dbm {
            info!(rssi, "Device is close");
            self.present = true;
            self.estimator.clear();
            observer.presence_changed(true, PresenceReason::Close);
        }

        let smoothed = self.estimator.estimate(rssi);
        self.last_smoothed = Some(smoothed);
        debug!(raw, smoothed, active, "Signal sample");
        observer.signal_updated(Some(smoothed), active);

        if smoothed >= self.thresholds.stay_near_dbm {
            if timers.cancel(TimerKind::Proximity) {
                debug!("Proximity timer canceled");
            }
        } else if self.present && !timers.is_armed(TimerKind::Proximity) {
            timers.arm_once(TimerKind::Proximity, now, self.thresholds.proximity_timeout);
            debug!(smoothed, "Proximity timer started");
        }

        self.touch(now, timers);
        smoothed
    }

    /// Record that the peripheral is reachable: re-arm the signal-loss timer.
    pub fn touch(&self, now: Instant, timers: &mut TimerSet) {
        timers.arm_once(TimerKind::SignalLoss, now, self.thresholds.signal_loss_timeout);
    }

    /// The proximity timer fired.
    pub fn on_proximity_timeout<O: PresenceObserver>(&mut self, observer: &mut O) {
        if self.present {
            info!("Device is away");
            self.present = false;
            observer.presence_changed(false, PresenceReason::Away);
        }
    }

    /// The signal-loss timer fired.
    pub fn on_signal_loss<O: PresenceObserver>(&mut self, timers: &mut TimerSet, observer: &mut O) {
        info!("Device is lost");
        timers.cancel(TimerKind::Proximity);
        self.last_smoothed = None;
        observer.signal_updated(None, false);
        if self.present {
            self.present = false;
            observer.presence_changed(false, PresenceReason::Lost);
        }
    }

    /// Drop presence without notification (radio powered off).
    pub fn force_away(&mut self) {
        self.present = false;
        self.last_smoothed = None;
    }

    /// Whether the peripheral is judged near.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.present
    }

    /// Most recent smoothed value, cleared on signal loss.
    #[must_use]
    pub const fn last_smoothed(&self) -> Option<i16> {
        self.last_smoothed
    }

    /// Current smoothing window, oldest first.
    #[must_use]
    pub fn window(&self) -> Vec<i16> {
        self.estimator.samples()
    }

    /// Thresholds in force.
    #[must_use]
    pub const fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::RssiThreshold;
    use crate::observer::{ObserverEvent, RecordingObserver};

    struct Harness {
        machine: PresenceMachine,
        timers: TimerSet,
        observer: RecordingObserver,
        now: Instant,
    }

    impl Harness {
        fn new(lock: RssiThreshold, unlock: RssiThreshold) -> Self {
            let thresholds = ThresholdConfig::new(
                lock,
                unlock,
                Duration::from_secs(5),
                Duration::from_secs(60),
            )
            .unwrap();
            Self {
                machine: PresenceMachine::new(thresholds, 5),
                timers: TimerSet::new(),
                observer: RecordingObserver::new(),
                now: Instant::now(),
            }
        }

        fn standard() -> Self {
            Self::new(RssiThreshold::Dbm(-80), RssiThreshold::Dbm(-60))
        }

        fn feed(&mut self, raw: i16) -> i16 {
            self.machine
                .ingest(raw, false, self.now, &mut self.timers, &mut self.observer)
        }
    }

    #[test]
    fn test_starts_away() {
        let h = Harness::standard();
        assert!(!h.machine.is_present());
        assert_eq!(h.machine.last_smoothed(), None);
    }

    #[test]
    fn test_becomes_near_at_first_strong_sample() {
        let mut h = Harness::standard();
        for raw in [-90, -90] {
            h.feed(raw);
            assert!(!h.machine.is_present());
        }
        h.feed(-55);
        assert!(h.machine.is_present());
        // Window was cleared before the triggering sample went in.
        assert_eq!(h.machine.window(), vec![-55]);
        assert_eq!(
            h.observer.presence_changes(),
            vec![(true, PresenceReason::Close)]
        );
    }

    #[test]
    fn test_every_sample_reports_smoothed_value() {
        let mut h = Harness::standard();
        h.feed(-70);
        h.feed(-72);
        let signals: Vec<_> = h
            .observer
            .events()
            .iter()
            .filter(|e| matches!(e, ObserverEvent::SignalUpdated(..)))
            .cloned()
            .collect();
        assert_eq!(
            signals,
            vec![
                ObserverEvent::SignalUpdated(Some(-70), false),
                ObserverEvent::SignalUpdated(Some(-71), false),
            ]
        );
    }

    #[test]
    fn test_positive_raw_reading_is_clamped() {
        let mut h = Harness::standard();
        assert_eq!(h.feed(12), 0);
        assert!(h.machine.is_present());
        assert_eq!(h.machine.window(), vec![0]);
    }

    #[test]
    fn test_weak_signal_arms_proximity_timer_once() {
        let mut h = Harness::standard();
        h.feed(-50);
        for _ in 0..10 {
            h.feed(-95);
        }
        assert!(h.timers.is_armed(TimerKind::Proximity));
        let deadline = h.timers.deadline(TimerKind::Proximity).unwrap();
        h.now += Duration::from_secs(3);
        h.feed(-95);
        assert_eq!(h.timers.deadline(TimerKind::Proximity), Some(deadline));
    }

    #[test]
    fn test_recovering_signal_cancels_proximity_timer() {
        let mut h = Harness::standard();
        h.feed(-50);
        h.feed(-100);
        h.feed(-100);
        assert!(h.timers.is_armed(TimerKind::Proximity));
        h.feed(-50);
        h.feed(-50);
        h.feed(-50);
        assert!(!h.timers.is_armed(TimerKind::Proximity));
        assert!(h.machine.is_present());
    }

    #[test]
    fn test_proximity_timeout_turns_away_once() {
        let mut h = Harness::standard();
        h.feed(-50);
        h.machine.on_proximity_timeout(&mut h.observer);
        h.machine.on_proximity_timeout(&mut h.observer);
        assert!(!h.machine.is_present());
        assert_eq!(
            h.observer.presence_changes(),
            vec![
                (true, PresenceReason::Close),
                (false, PresenceReason::Away)
            ]
        );
    }

    #[test]
    fn test_weak_signal_while_away_never_arms_timer() {
        let mut h = Harness::standard();
        h.feed(-95);
        h.feed(-95);
        assert!(!h.timers.is_armed(TimerKind::Proximity));
        assert!(h.timers.is_armed(TimerKind::SignalLoss));
    }

    #[test]
    fn test_signal_loss_while_near() {
        let mut h = Harness::standard();
        h.feed(-50);
        h.feed(-100);
        h.feed(-100);
        h.machine.on_signal_loss(&mut h.timers, &mut h.observer);
        assert!(!h.machine.is_present());
        assert!(!h.timers.is_armed(TimerKind::Proximity));
        assert_eq!(h.machine.last_smoothed(), None);
        assert_eq!(
            h.observer.events().last(),
            Some(&ObserverEvent::PresenceChanged(false, PresenceReason::Lost))
        );
    }

    #[test]
    fn test_signal_loss_while_away_only_reports_signal() {
        let mut h = Harness::standard();
        h.feed(-95);
        h.machine.on_signal_loss(&mut h.timers, &mut h.observer);
        assert!(h.observer.presence_changes().is_empty());
        assert_eq!(
            h.observer.events().last(),
            Some(&ObserverEvent::SignalUpdated(None, false))
        );
    }

    #[test]
    fn test_every_sample_rearms_signal_loss() {
        let mut h = Harness::standard();
        h.feed(-70);
        let first = h.timers.deadline(TimerKind::SignalLoss).unwrap();
        h.now += Duration::from_secs(10);
        h.feed(-70);
        assert_eq!(
            h.timers.deadline(TimerKind::SignalLoss),
            Some(first + Duration::from_secs(10))
        );
    }

    #[test]
    fn test_unlock_disabled_uses_lock_for_becoming_near() {
        let mut h = Harness::new(RssiThreshold::Dbm(-80), RssiThreshold::Disabled);
        h.feed(-81);
        assert!(!h.machine.is_present());
        h.feed(-80);
        assert!(h.machine.is_present());
    }

    #[test]
    fn test_lock_disabled_uses_unlock_for_staying_near() {
        let mut h = Harness::new(RssiThreshold::Disabled, RssiThreshold::Dbm(-60));
        h.feed(-60);
        assert!(h.machine.is_present());
        // -65 would still be "near" with the default -80 lock threshold.
        h.feed(-70);
        assert!(h.timers.is_armed(TimerKind::Proximity));
    }

    #[test]
    fn test_reset_is_silent() {
        let mut h = Harness::standard();
        h.feed(-50);
        h.observer.take();
        h.machine.reset();
        assert!(!h.machine.is_present());
        assert!(h.machine.window().is_empty());
        assert!(h.observer.events().is_empty());
    }
}
