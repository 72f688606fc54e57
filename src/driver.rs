//! Drives an Elcon charger on the bus.
//!
//! While running, the driver sends a setpoint command to the charger every
//! `update_time`, limiting current to the configured wattage first. Status
//! frames coming back from the charger are decoded for reporting only.
//!
//! # Example
//!
//! ```no_run
//! use elcon_lib::bus::LoopbackBus;
//! use elcon_lib::driver::{ChargerDriver, DriverSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), elcon_lib::Error> {
//!     let bus = LoopbackBus::default();
//!     let (driver, handle) = ChargerDriver::new(bus.endpoint(), DriverSettings::default());
//!     let task = tokio::spawn(driver.run());
//!     handle.set_volts(120.0).await;
//!     handle.start().await;
//!     // ...
//!     handle.finish().await;
//!     task.await.expect("driver task panicked")
//! }
//! ```

use crate::bus::Bus;
use crate::protocol::{pack_command, Address, Status};
use crate::session::Role;
use crate::Error;
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Setpoint and limits for the charger.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    pub volts: f64,
    pub amps: f64,
    /// Fraction of input power that reaches the output.
    pub efficiency_pct: f64,
    /// Input power limit in watts.
    pub max_watts: f64,
    pub update_time: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            volts: 0.0,
            amps: 0.0,
            efficiency_pct: 0.95,
            max_watts: 1000.0,
            update_time: Duration::from_secs(1),
        }
    }
}

impl DriverSettings {
    /// Lowers `amps` so that the input power stays within `max_watts`.
    ///
    /// Applied before every transmission since `volts` may have changed.
    pub fn curb_amps_to_power(&mut self) {
        if self.volts > 0.0 && self.volts * self.amps / self.efficiency_pct > self.max_watts {
            self.amps = (self.max_watts / self.volts) * self.efficiency_pct;
            log::debug!("Current limited to {:.2}A by {}W", self.amps, self.max_watts);
        }
    }
}

/// Requests to a running driver.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCommand {
    Start,
    Stop,
    SetVolts(f64),
    SetAmps(f64),
    SetMaxWatts(f64),
    /// Ends the driver loop for good.
    Finish,
}

/// Snapshot of the driver published after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverReport {
    pub running: bool,
    pub finished: bool,
    pub volts: f64,
    pub amps: f64,
    pub max_watts: f64,
    pub commands_sent: u64,
    pub last_status: Option<Status>,
}

impl fmt::Display for DriverReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if !self.running {
            return write!(f, "ChargerDriver: not running");
        }
        write!(f, "ChargerDriver: running at {:.2}V {:.2}A", self.volts, self.amps)
    }
}

/// Cloneable control side of a [`ChargerDriver`].
#[derive(Debug, Clone)]
pub struct DriverHandle {
    commands: mpsc::Sender<DriverCommand>,
    reports: watch::Receiver<DriverReport>,
}

impl DriverHandle {
    /// Sends `command`, returns `false` if the driver has already ended.
    pub async fn send(&self, command: DriverCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub async fn start(&self) -> bool {
        self.send(DriverCommand::Start).await
    }

    pub async fn stop(&self) -> bool {
        self.send(DriverCommand::Stop).await
    }

    pub async fn set_volts(&self, volts: f64) -> bool {
        self.send(DriverCommand::SetVolts(volts)).await
    }

    pub async fn set_amps(&self, amps: f64) -> bool {
        self.send(DriverCommand::SetAmps(amps)).await
    }

    pub async fn set_max_watts(&self, watts: f64) -> bool {
        self.send(DriverCommand::SetMaxWatts(watts)).await
    }

    pub async fn finish(&self) -> bool {
        self.send(DriverCommand::Finish).await
    }

    /// The latest published report.
    pub fn report(&self) -> DriverReport {
        self.reports.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DriverReport> {
        self.reports.clone()
    }
}

pub struct ChargerDriver<B> {
    bus: B,
    settings: DriverSettings,
    running: bool,
    finished: bool,
    commands_sent: u64,
    last_status: Option<Status>,
    commands: mpsc::Receiver<DriverCommand>,
    reports: watch::Sender<DriverReport>,
}

impl<B: Bus> ChargerDriver<B> {
    const COMMAND_QUEUE: usize = 16;

    /// Creates a stopped driver on `bus`, and the handle that controls it.
    pub fn new(bus: B, settings: DriverSettings) -> (Self, DriverHandle) {
        let (command_tx, command_rx) = mpsc::channel(Self::COMMAND_QUEUE);
        let (report_tx, report_rx) = watch::channel(DriverReport {
            running: false,
            finished: false,
            volts: settings.volts,
            amps: settings.amps,
            max_watts: settings.max_watts,
            commands_sent: 0,
            last_status: None,
        });
        let driver = Self {
            bus,
            settings,
            running: false,
            finished: false,
            commands_sent: 0,
            last_status: None,
            commands: command_rx,
            reports: report_tx,
        };
        let handle = DriverHandle {
            commands: command_tx,
            reports: report_rx,
        };
        (driver, handle)
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Runs until [`DriverCommand::Finish`] or until every handle is dropped.
    ///
    /// Fails with `Error::ZeroInterval` right away when `update_time` is zero.
    ///
    /// Sending, receiving and command handling interleave only at the
    /// `select!`, so each state update completes before the next begins.
    pub async fn run(mut self) -> Result<(), Error> {
        if self.settings.update_time.is_zero() {
            return Err(Error::ZeroInterval {
                name: "update_time",
            });
        }
        let mut send_interval = tokio::time::interval(self.settings.update_time);
        send_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("Driver ready, update every {:?}", self.settings.update_time);

        while !self.finished {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command) {
                            // send the new setpoint right away
                            send_interval.reset_immediately();
                        }
                    }
                    None => {
                        log::debug!("All driver handles dropped, finishing");
                        self.finished = true;
                    }
                },
                _ = send_interval.tick(), if self.running => self.send_command(),
                frame = self.bus.recv() => {
                    let frame = frame?;
                    match Status::decode(&frame, Role::Manager.address()) {
                        Ok(Some(status)) => {
                            log::info!("Received from charger: {status}");
                            self.last_status = Some(status);
                        }
                        Ok(None) => {}
                        Err(err) => log::warn!("Discarding frame {frame:?}: {err}"),
                    }
                }
            }
            self.publish();
        }
        log::info!("Driver finished");
        Ok(())
    }

    /// Returns `true` when the setpoint or running state changed.
    fn handle_command(&mut self, command: DriverCommand) -> bool {
        log::debug!("Driver command {command:?}");
        match command {
            DriverCommand::Start => {
                let changed = !self.running;
                self.running = true;
                log::info!("Driver started");
                changed
            }
            DriverCommand::Stop => {
                self.running = false;
                log::info!("Driver stopped");
                false
            }
            DriverCommand::SetVolts(volts) => {
                self.settings.volts = volts;
                self.running
            }
            DriverCommand::SetAmps(amps) => {
                self.settings.amps = amps;
                self.running
            }
            DriverCommand::SetMaxWatts(watts) => {
                self.settings.max_watts = watts;
                self.running
            }
            DriverCommand::Finish => {
                self.running = false;
                self.finished = true;
                false
            }
        }
    }

    fn send_command(&mut self) {
        self.settings.curb_amps_to_power();
        let DriverSettings { volts, amps, .. } = self.settings;
        if amps <= 0.0 {
            log::debug!("Not sending a command - current must be positive");
            return;
        }
        match pack_command(
            Role::Manager.address(),
            Address::Charger as u8,
            volts,
            amps,
            true,
        ) {
            Ok(frame) => match self.bus.send(frame) {
                Ok(()) => {
                    self.commands_sent += 1;
                    log::info!("Charger told to run at {volts:.2}V {amps:.2}A");
                }
                Err(err) => log::warn!("Cannot send command: {err}"),
            },
            Err(err) => log::warn!("Nothing sent: {err}"),
        }
    }

    fn publish(&self) {
        let report = DriverReport {
            running: self.running,
            finished: self.finished,
            volts: self.settings.volts,
            amps: self.settings.amps,
            max_watts: self.settings.max_watts,
            commands_sent: self.commands_sent,
            last_status: self.last_status.clone(),
        };
        self.reports.send_if_modified(|current| {
            if *current == report {
                return false;
            }
            *current = report;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_limit() {
        let mut settings = DriverSettings {
            volts: 120.0,
            amps: 10.0,
            ..Default::default()
        };
        settings.curb_amps_to_power();
        assert!((settings.amps - 1000.0 / 120.0 * 0.95).abs() < 1e-9);
        assert!(settings.volts * settings.amps / settings.efficiency_pct <= 1000.0 + 1e-9);

        // within limits nothing changes
        let mut settings = DriverSettings {
            volts: 50.0,
            amps: 10.0,
            ..Default::default()
        };
        settings.curb_amps_to_power();
        assert_eq!(settings.amps, 10.0);
    }

    #[test]
    fn power_limit_follows_voltage() {
        let mut settings = DriverSettings {
            volts: 50.0,
            amps: 15.0,
            ..Default::default()
        };
        settings.curb_amps_to_power();
        assert_eq!(settings.amps, 15.0);
        settings.volts = 100.0;
        settings.curb_amps_to_power();
        assert!((settings.amps - 9.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn zero_update_time_is_rejected() {
        let bus = crate::bus::LoopbackBus::default();
        let (driver, _handle) = ChargerDriver::new(
            bus.endpoint(),
            DriverSettings {
                update_time: Duration::ZERO,
                ..Default::default()
            },
        );
        assert_eq!(
            driver.run().await,
            Err(Error::ZeroInterval {
                name: "update_time"
            })
        );
    }

    #[test]
    fn report_display() {
        let mut report = DriverReport {
            running: false,
            finished: false,
            volts: 120.0,
            amps: 7.5,
            max_watts: 1000.0,
            commands_sent: 0,
            last_status: None,
        };
        assert_eq!(report.to_string(), "ChargerDriver: not running");
        report.running = true;
        assert_eq!(report.to_string(), "ChargerDriver: running at 120.00V 7.50A");
    }
}
