//! Single-task event loop around a [`Monitor`].
//!
//! Radio events and user commands arrive on one channel; timer deadlines are
//! awaited with `sleep_until`. Because only this task touches the monitor,
//! no state is ever shared across threads.

use std::future;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info};

use crate::controller::{Monitor, MonitorSnapshot};
use crate::observer::PresenceObserver;
use crate::radio::{Central, PeripheralId, RadioEvent};

/// User-initiated requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Begin (or restart) monitoring a peripheral.
    StartMonitoring(PeripheralId),
    /// Turn passive-only operation on or off.
    SetPassiveMode(bool),
    /// Start the nearby-devices listing.
    StartListing,
    /// Stop the nearby-devices listing.
    StopListing,
    /// Silence power-off warnings.
    AcknowledgePowerWarning,
}

/// Anything the event loop consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorInput {
    /// Completion or notification from the radio.
    Radio(RadioEvent),
    /// Request from a user surface.
    Command(Command),
}

impl From<RadioEvent> for MonitorInput {
    fn from(event: RadioEvent) -> Self {
        Self::Radio(event)
    }
}

impl From<Command> for MonitorInput {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

impl<C: Central, O: PresenceObserver> Monitor<C, O> {
    /// Route one input to the matching operation.
    pub fn dispatch(&mut self, input: MonitorInput, now: Instant) {
        match input {
            MonitorInput::Radio(event) => self.handle_event(event, now),
            MonitorInput::Command(command) => {
                debug!(?command, "Command received");
                match command {
                    Command::StartMonitoring(target) => self.start_monitoring(target, now),
                    Command::SetPassiveMode(passive) => self.set_passive_mode(passive),
                    Command::StartListing => self.start_listing(),
                    Command::StopListing => self.stop_listing(),
                    Command::AcknowledgePowerWarning => self.acknowledge_power_warning(),
                }
            }
        }
    }
}

/// Drive `monitor` until every input sender is dropped, then hand it back.
///
/// A snapshot is published on `snapshots` whenever the visible state changes.
/// Timers that are already due are fired before the next input is handled.
pub async fn run<C, O>(
    mut monitor: Monitor<C, O>,
    mut inputs: mpsc::Receiver<MonitorInput>,
    snapshots: watch::Sender<MonitorSnapshot>,
) -> Monitor<C, O>
where
    C: Central,
    O: PresenceObserver,
{
    info!("Monitor loop started");
    publish(&monitor, &snapshots);

    loop {
        let deadline = monitor.next_deadline();
        tokio::select! {
            input = inputs.recv() => {
                let Some(input) = input else {
                    break;
                };
                let now = Instant::now();
                monitor.fire_due_timers(now);
                monitor.dispatch(input, now);
            }
            () = sleep_until(deadline) => monitor.fire_due_timers(Instant::now()),
        }
        publish(&monitor, &snapshots);
    }

    info!("Monitor loop stopped");
    monitor
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

fn publish<C: Central, O: PresenceObserver>(
    monitor: &Monitor<C, O>,
    snapshots: &watch::Sender<MonitorSnapshot>,
) {
    let snapshot = monitor.snapshot();
    snapshots.send_if_modified(|current| {
        if *current == snapshot {
            false
        } else {
            *current = snapshot;
            true
        }
    });
}
