//! Purpose-keyed deadline set.
//!
//! Each [`TimerKind`] owns exactly one slot, so re-arming a timer replaces its
//! previous deadline instead of stacking a second one. The set stores plain
//! deadlines; the [`Monitor`](crate::Monitor) dispatches on the kind when a
//! deadline passes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use utoipa::ToSchema;

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// No sample or reachability event within the signal-loss timeout.
    SignalLoss,
    /// Smoothed signal stayed weak for the proximity timeout.
    Proximity,
    /// A connection attempt is still pending.
    ConnectTimeout,
    /// Active-mode poll.
    Keepalive,
}

impl TimerKind {
    /// Every kind, in slot order.
    pub const ALL: [Self; 4] = [
        Self::SignalLoss,
        Self::Proximity,
        Self::ConnectTimeout,
        Self::Keepalive,
    ];

    const fn slot(self) -> usize {
        match self {
            Self::SignalLoss => 0,
            Self::Proximity => 1,
            Self::ConnectTimeout => 2,
            Self::Keepalive => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScheduledTimer {
    deadline: Instant,
    period: Option<Duration>,
}

/// Four independent, cancelable timers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerSet {
    slots: [Option<ScheduledTimer>; 4],
}

impl TimerSet {
    /// Create a set with every timer disarmed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire once, `after` from `now`. Replaces any earlier deadline.
    pub fn arm_once(&mut self, kind: TimerKind, now: Instant, after: Duration) {
        self.slots[kind.slot()] = Some(ScheduledTimer {
            deadline: now + after,
            period: None,
        });
    }

    /// Arm `kind` to fire every `period`, first at `now + period`.
    pub fn arm_repeating(&mut self, kind: TimerKind, now: Instant, period: Duration) {
        self.slots[kind.slot()] = Some(ScheduledTimer {
            deadline: now + period,
            period: Some(period),
        });
    }

    /// Disarm `kind`. Returns whether it was armed; canceling a disarmed or
    /// already fired timer is a no-op.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.slots[kind.slot()].take().is_some()
    }

    /// Disarm every timer.
    pub fn cancel_all(&mut self) {
        self.slots = [None; 4];
    }

    /// Whether `kind` is armed.
    #[must_use]
    pub const fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind.slot()].is_some()
    }

    /// Deadline of `kind`, if armed.
    #[must_use]
    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.slots[kind.slot()].map(|t| t.deadline)
    }

    /// Earliest armed deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.iter().flatten().map(|t| t.deadline).min()
    }

    /// Armed kinds, in slot order.
    #[must_use]
    pub fn armed(&self) -> Vec<TimerKind> {
        TimerKind::ALL
            .into_iter()
            .filter(|k| self.is_armed(*k))
            .collect()
    }

    /// Number of armed timers.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Take the earliest timer whose deadline is at or before `now`.
    ///
    /// One-shot timers are disarmed; repeating timers are rescheduled one
    /// period after `now`, so a late tick never bursts. Callers loop until
    /// `None`, which lets a handler cancel timers that were also due.
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerKind> {
        let kind = TimerKind::ALL
            .into_iter()
            .filter_map(|k| self.deadline(k).map(|d| (d, k)))
            .filter(|(d, _)| *d <= now)
            .min_by_key(|(d, _)| *d)
            .map(|(_, k)| k)?;

        let slot = &mut self.slots[kind.slot()];
        *slot = slot.and_then(|t| {
            t.period.map(|period| ScheduledTimer {
                deadline: now + period,
                period: Some(period),
            })
        });
        Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_set_is_disarmed() {
        let timers = TimerSet::new();
        assert_eq!(timers.armed_count(), 0);
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm_once(TimerKind::SignalLoss, now, Duration::from_secs(60));
        timers.arm_once(TimerKind::SignalLoss, now, Duration::from_secs(10));
        assert_eq!(timers.armed_count(), 1);
        assert_eq!(
            timers.deadline(TimerKind::SignalLoss),
            Some(now + Duration::from_secs(10))
        );
    }

    #[test]
    fn test_cancel_reports_previous_state() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm_once(TimerKind::Proximity, now, Duration::from_secs(5));
        assert!(timers.cancel(TimerKind::Proximity));
        assert!(!timers.cancel(TimerKind::Proximity));
    }

    #[test]
    fn test_pop_due_orders_by_deadline() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm_once(TimerKind::SignalLoss, now, Duration::from_secs(60));
        timers.arm_once(TimerKind::Proximity, now, Duration::from_secs(5));

        let later = now + Duration::from_secs(61);
        assert_eq!(timers.pop_due(later), Some(TimerKind::Proximity));
        assert_eq!(timers.pop_due(later), Some(TimerKind::SignalLoss));
        assert_eq!(timers.pop_due(later), None);
        assert_eq!(timers.armed_count(), 0);
    }

    #[test]
    fn test_pop_due_ignores_future_deadlines() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm_once(TimerKind::ConnectTimeout, now, Duration::from_secs(60));
        assert_eq!(timers.pop_due(now + Duration::from_secs(59)), None);
        assert!(timers.is_armed(TimerKind::ConnectTimeout));
        assert_eq!(
            timers.pop_due(now + Duration::from_secs(60)),
            Some(TimerKind::ConnectTimeout)
        );
    }

    #[test]
    fn test_repeating_timer_reschedules_from_now() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm_repeating(TimerKind::Keepalive, now, Duration::from_secs(2));

        let late = now + Duration::from_secs(7);
        assert_eq!(timers.pop_due(late), Some(TimerKind::Keepalive));
        assert_eq!(timers.pop_due(late), None);
        assert_eq!(
            timers.deadline(TimerKind::Keepalive),
            Some(late + Duration::from_secs(2))
        );
    }

    #[test]
    fn test_cancel_all() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        for kind in TimerKind::ALL {
            timers.arm_once(kind, now, Duration::from_secs(1));
        }
        assert_eq!(timers.armed(), TimerKind::ALL.to_vec());
        timers.cancel_all();
        assert_eq!(timers.armed_count(), 0);
    }
}
