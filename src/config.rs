use crate::commandline::SimulateArgs;
use anyhow::{Context, Result};
use elcon_lib::driver::DriverSettings;
use elcon_lib::simulator::SimulatorSettings;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BatteryConfig {
    #[serde(default = "BatteryConfig::default_capacity_ah")]
    pub capacity_ah: f64,
    #[serde(default = "BatteryConfig::default_cells")]
    pub cells: u32,
}

impl BatteryConfig {
    fn default_capacity_ah() -> f64 {
        10.0
    }

    fn default_cells() -> u32 {
        30
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity_ah: Self::default_capacity_ah(),
            cells: Self::default_cells(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    #[serde(default = "DriverConfig::default_volts")]
    pub volts: f64,
    #[serde(default = "DriverConfig::default_amps")]
    pub amps: f64,
    #[serde(default = "DriverConfig::default_max_watts")]
    pub max_watts: f64,
    #[serde(default = "DriverConfig::default_efficiency_pct")]
    pub efficiency_pct: f64,
    #[serde(
        default = "DriverConfig::default_update_time",
        with = "humantime_serde"
    )]
    pub update_time: Duration,
}

impl DriverConfig {
    fn default_volts() -> f64 {
        120.0
    }

    fn default_amps() -> f64 {
        10.0
    }

    fn default_max_watts() -> f64 {
        1000.0
    }

    fn default_efficiency_pct() -> f64 {
        0.95
    }

    fn default_update_time() -> Duration {
        Duration::from_secs(1)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            volts: Self::default_volts(),
            amps: Self::default_amps(),
            max_watts: Self::default_max_watts(),
            efficiency_pct: Self::default_efficiency_pct(),
            update_time: Self::default_update_time(),
        }
    }
}

impl From<&DriverConfig> for DriverSettings {
    fn from(config: &DriverConfig) -> Self {
        Self {
            volts: config.volts,
            amps: config.amps,
            efficiency_pct: config.efficiency_pct,
            max_watts: config.max_watts,
            update_time: config.update_time,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ChargerConfig {
    #[serde(
        default = "ChargerConfig::default_status_interval",
        with = "humantime_serde"
    )]
    pub status_interval: Duration,
    #[serde(
        default = "ChargerConfig::default_update_timeout",
        with = "humantime_serde"
    )]
    pub update_timeout: Duration,
}

impl ChargerConfig {
    fn default_status_interval() -> Duration {
        Duration::from_secs(1)
    }

    fn default_update_timeout() -> Duration {
        Duration::from_secs(2)
    }
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            status_interval: Self::default_status_interval(),
            update_timeout: Self::default_update_timeout(),
        }
    }
}

impl From<&ChargerConfig> for SimulatorSettings {
    fn from(config: &ChargerConfig) -> Self {
        Self {
            status_interval: config.status_interval,
            update_timeout: config.update_timeout,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub charger: ChargerConfig,
}

impl Config {
    pub const DEFAULT_CONFIG_FILE: &str = "elcon.yaml";

    pub fn load(config_file_path: &Path) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read config from file: {config_file_path:?}"))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in file: {config_file_path:?}"))?;
        Ok(config)
    }

    /// Rejects values the battery model and the peer loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.battery.capacity_ah > 0.0,
            "battery.capacity_ah must be positive, got {}",
            self.battery.capacity_ah
        );
        anyhow::ensure!(
            self.driver.efficiency_pct > 0.0,
            "driver.efficiency_pct must be positive, got {}",
            self.driver.efficiency_pct
        );
        anyhow::ensure!(
            !self.driver.update_time.is_zero(),
            "driver.update_time must be longer than zero"
        );
        anyhow::ensure!(
            !self.charger.status_interval.is_zero(),
            "charger.status_interval must be longer than zero"
        );
        anyhow::ensure!(
            !self.charger.update_timeout.is_zero(),
            "charger.update_timeout must be longer than zero"
        );
        Ok(())
    }

    /// Applies the `simulate` command line on top of the file, then validates.
    pub fn apply_overrides(&mut self, args: &SimulateArgs) -> Result<()> {
        if let Some(volts) = args.volts {
            self.driver.volts = volts;
        }
        if let Some(amps) = args.amps {
            self.driver.amps = amps;
        }
        if let Some(watts) = args.watts {
            self.driver.max_watts = watts;
        }
        if let Some(update_time) = args.update_time {
            self.driver.update_time = update_time;
        }
        if let Some(status_interval) = args.status_interval {
            self.charger.status_interval = status_interval;
        }
        if let Some(timeout) = args.timeout {
            self.charger.update_timeout = timeout;
        }
        self.validate()
    }

    /// Loads `path`, or the defaults when no path was given and the default
    /// file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(Self::DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    log::debug!("No {default_path:?}, using built-in defaults");
                    Ok(Self::default())
                }
            }
        }
    }
}
