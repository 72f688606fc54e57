//! Lithium-ion battery simulation.
//!
//! The battery integrates charge in amp-hours and derives its open circuit
//! voltage from the state of charge.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// A simulated battery pack of `cell_count` cells in series.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Battery {
    capacity_ah: f64,
    charge_state_ah: f64,
    cell_count: u32,
}

impl Battery {
    /// Volts per cell when empty.
    pub const MINIMUM_VOLTAGE: f64 = 3.0;
    /// Volts per cell when full.
    pub const MAXIMUM_VOLTAGE: f64 = 4.2;

    /// Creates a battery at half of its `capacity_ah`.
    ///
    /// A zero cell count is raised to one.
    pub fn new(capacity_ah: f64, cell_count: u32) -> Self {
        debug_assert!(capacity_ah > 0.0, "battery capacity must be positive");
        Self {
            capacity_ah,
            charge_state_ah: capacity_ah / 2.0,
            cell_count: cell_count.max(1),
        }
    }

    pub fn capacity_ah(&self) -> f64 {
        self.capacity_ah
    }

    pub fn charge_state_ah(&self) -> f64 {
        self.charge_state_ah
    }

    pub fn cell_count(&self) -> u32 {
        self.cell_count
    }

    /// Adds `supply_amps` for `seconds`, if the supply can push current in.
    ///
    /// The battery voltage is compared with `supply_volts` once, on entry.
    /// A long interval may therefore carry the charge past the point where
    /// the battery voltage overtakes the supply; callers integrating over
    /// long intervals get that approximation.
    pub fn charge(&mut self, supply_volts: f64, supply_amps: f64, seconds: f64) {
        if self.voltage() > supply_volts {
            return;
        }
        self.charge_state_ah += supply_amps * seconds / SECONDS_PER_HOUR;
        self.clamp();
    }

    /// Draws `amps` for `seconds`.
    pub fn discharge(&mut self, amps: f64, seconds: f64) {
        self.charge_state_ah -= amps * seconds / SECONDS_PER_HOUR;
        self.clamp();
    }

    fn clamp(&mut self) {
        self.charge_state_ah = self.charge_state_ah.clamp(0.0, self.capacity_ah);
    }

    /// Open circuit voltage of the pack.
    ///
    /// A hand-tuned cubic over the state of charge: flat through the middle,
    /// steep near empty and full. At half charge the result is the midpoint
    /// of the cell voltage range times the cell count.
    pub fn voltage(&self) -> f64 {
        let vrange = Self::MAXIMUM_VOLTAGE - Self::MINIMUM_VOLTAGE;
        // -0.5 (empty) to 0.5 (full)
        let f = self.charge_state_ah / self.capacity_ah - 0.5;
        ((f * f * f * 3.6 + f * 0.1 + 0.5) * vrange + Self::MINIMUM_VOLTAGE)
            * self.cell_count as f64
    }
}

impl fmt::Display for Battery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:.1}Ah {}S battery with {:.3}Ah charge",
            self.capacity_ah, self.cell_count, self.charge_state_ah
        )
    }
}

/// A power source wired straight to a battery.
#[derive(Debug, Clone)]
pub struct Charger {
    battery: Battery,
    volts: f64,
    amps: f64,
}

impl Charger {
    pub fn new(battery: Battery) -> Self {
        Self {
            battery,
            volts: 0.0,
            amps: 0.0,
        }
    }

    pub fn set(&mut self, volts: f64, amps: f64) {
        self.volts = volts;
        self.amps = amps;
    }

    pub fn volts(&self) -> f64 {
        self.volts
    }

    pub fn amps(&self) -> f64 {
        self.amps
    }

    pub fn charge(&mut self, seconds: f64) {
        self.battery.charge(self.volts, self.amps, seconds);
    }

    /// The battery has reached the supply voltage.
    pub fn is_finished(&self) -> bool {
        self.volts < self.battery.voltage()
    }

    pub fn battery(&self) -> &Battery {
        &self.battery
    }
}
