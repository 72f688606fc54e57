//! Simulates an Elcon charger connected to a battery.
//!
//! An Elcon charger reports its status every second and expects a command
//! at least every two seconds. Without one it stops charging and reports
//! the timeout until the next command arrives.

use crate::battery::Battery;
use crate::bus::Bus;
use crate::protocol::{pack_status, Address, StatusFlags};
use crate::session::{ChargeSession, Role, Update};
use crate::Error;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorSettings {
    /// How often status is emitted and the timeout checked.
    pub status_interval: Duration,
    /// Longest gap between commands before the session goes idle.
    pub update_timeout: Duration,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(1),
            update_timeout: Duration::from_secs(2),
        }
    }
}

/// Snapshot of the simulated charger, published after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorReport {
    pub active: bool,
    pub volts: f64,
    pub amps: f64,
    pub output_amps: f64,
    pub flags: StatusFlags,
    pub battery: Battery,
    pub since_last_update: Option<Duration>,
    pub status_sent: u64,
}

impl fmt::Display for SimulatorReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.active {
            write!(
                f,
                "Charger active, set to {:.2}V {:.2}A, output {:.2}A",
                self.volts, self.amps, self.output_amps
            )?;
        } else {
            match self.since_last_update {
                Some(since) => write!(f, "Charger inactive, last update {}s ago", since.as_secs())?,
                None => write!(f, "Charger inactive, never updated")?,
            }
        }
        write!(
            f,
            "; battery: {} at {:.2}V",
            self.battery,
            self.battery.voltage()
        )
    }
}

pub struct ChargerSimulator<B> {
    bus: B,
    session: ChargeSession,
    settings: SimulatorSettings,
    status_sent: u64,
    reports: watch::Sender<SimulatorReport>,
}

impl<B: Bus> ChargerSimulator<B> {
    pub fn new(bus: B, battery: Battery, settings: SimulatorSettings) -> Self {
        let session = ChargeSession::new(Role::Charger, battery, settings.update_timeout);
        let (reports, _) = watch::channel(Self::snapshot(&session, 0, Instant::now()));
        Self {
            bus,
            session,
            settings,
            status_sent: 0,
            reports,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SimulatorReport> {
        self.reports.subscribe()
    }

    pub fn session(&self) -> &ChargeSession {
        &self.session
    }

    /// Runs until `shutdown` turns `true` or its sender is dropped.
    ///
    /// Returns the session so its final state can be inspected, or
    /// `Error::ZeroInterval` right away when `status_interval` is zero.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<ChargeSession, Error> {
        if self.settings.status_interval.is_zero() {
            return Err(Error::ZeroInterval {
                name: "status_interval",
            });
        }
        let mut emit_interval = tokio::time::interval(self.settings.status_interval);
        emit_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut timeout_interval = tokio::time::interval(self.settings.status_interval);
        timeout_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!(
            "Charger simulator ready, status every {:?}, timeout {:?}",
            self.settings.status_interval,
            self.settings.update_timeout
        );

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = emit_interval.tick() => self.emit_status(),
                _ = timeout_interval.tick() => {
                    self.session.check_timeout(Instant::now().into_std());
                }
                frame = self.bus.recv() => {
                    let frame = frame?;
                    match self.session.accept(&frame, Instant::now().into_std()) {
                        Ok(Update::Ignored) => log::debug!("Ignoring {frame:?}"),
                        Ok(update) => log::debug!("Accepted {frame:?}: {update:?}"),
                        Err(err) => log::warn!("Discarding frame {frame:?}: {err}"),
                    }
                }
            }
            self.publish();
        }
        log::info!("Charger simulator stopped");
        Ok(self.session)
    }

    fn emit_status(&mut self) {
        let report = Self::snapshot(&self.session, self.status_sent, Instant::now());
        log::info!("{report}");
        // zero output current is still reported, together with the flags
        match pack_status(
            Role::Charger.address(),
            Address::Broadcast as u8,
            self.session.commanded_volts(),
            self.session.output_amps(),
            self.session.status_flags(),
        ) {
            Ok(frame) => match self.bus.send(frame) {
                Ok(()) => self.status_sent += 1,
                Err(err) => log::warn!("Cannot send status: {err}"),
            },
            Err(err) => log::debug!("Not sending status: {err}"),
        }
    }

    fn snapshot(session: &ChargeSession, status_sent: u64, now: Instant) -> SimulatorReport {
        SimulatorReport {
            active: session.is_active(),
            volts: session.commanded_volts(),
            amps: session.commanded_amps(),
            output_amps: session.output_amps(),
            flags: session.status_flags(),
            battery: session.battery().clone(),
            since_last_update: session
                .peer_last_seen()
                .map(|seen| now.into_std().saturating_duration_since(seen)),
            status_sent,
        }
    }

    fn publish(&self) {
        let report = Self::snapshot(&self.session, self.status_sent, Instant::now());
        self.reports.send_replace(report);
    }
}
