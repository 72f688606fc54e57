use clap::{Args, Parser, Subcommand};
use clap_num::maybe_hex;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;
use std::time::Duration;

fn parse_charge_step(text: &str) -> Result<(f64, f64, f64), String> {
    let values: Vec<&str> = text.split(',').collect();
    let [volts, amps, seconds] = values.as_slice() else {
        return Err(format!("expected VOLTS,AMPS,SECONDS, got '{text}'"));
    };
    let parse = |value: &str| value.trim().parse::<f64>().map_err(|e| format!("'{value}': {e}"));
    Ok((parse(volts)?, parse(amps)?, parse(seconds)?))
}

fn parse_discharge_step(text: &str) -> Result<(f64, f64), String> {
    let values: Vec<&str> = text.split(',').collect();
    let [amps, seconds] = values.as_slice() else {
        return Err(format!("expected AMPS,SECONDS, got '{text}'"));
    };
    let parse = |value: &str| value.trim().parse::<f64>().map_err(|e| format!("'{value}': {e}"));
    Ok((parse(amps)?, parse(seconds)?))
}

/// Raw payload bytes given as hex on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload(pub Vec<u8>);

fn parse_payload(text: &str) -> Result<Payload, String> {
    let hex: Vec<u8> = text
        .bytes()
        .filter(|c| !c.is_ascii_whitespace() && *c != b':')
        .collect();
    if let Some(&bad) = hex.iter().find(|c| !c.is_ascii_hexdigit()) {
        return Err(format!("'{text}' contains a non-hex character 0x{bad:02X}"));
    }
    if hex.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{text}'"));
    }
    let nibble = |c: u8| (c as char).to_digit(16).unwrap_or(0) as u8;
    Ok(Payload(
        hex.chunks(2)
            .map(|pair| nibble(pair[0]) << 4 | nibble(pair[1]))
            .collect(),
    ))
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Encode a command frame and print its identifier and payload
    Encode {
        /// Output voltage in volts
        volts: f64,
        /// Output current in amps
        amps: f64,
        /// Destination address (e.g. 0xE5 for the charger)
        #[arg(long, value_parser = maybe_hex::<u8>, default_value = "0xE5")]
        destination: u8,
        /// Source address (e.g. 0xF4 for the manager)
        #[arg(long, value_parser = maybe_hex::<u8>, default_value = "0xF4")]
        source: u8,
        /// Set the enable bit
        #[clap(long, short, action)]
        enable: bool,
    },
    /// Decode a received frame as charger status
    Decode {
        /// 29-bit identifier (e.g. 0x1806E5F4)
        #[arg(value_parser = maybe_hex::<u32>)]
        id: u32,
        /// Payload as hex bytes (e.g. "0100001008" or "01:00:00:10:08")
        #[arg(value_parser = parse_payload)]
        payload: Payload,
        /// Address we receive on (e.g. 0xF4 for the manager)
        #[arg(long = "as", value_parser = maybe_hex::<u8>, default_value = "0xE5")]
        our_address: u8,
        /// Print the decoded status as JSON
        #[clap(long, action)]
        json: bool,
    },
    /// Run a scripted battery model and print the state after each step
    Battery {
        /// Capacity in amp-hours
        #[arg(long)]
        capacity: Option<f64>,
        /// Number of cells in series
        #[arg(long)]
        cells: Option<u32>,
        /// Charge step as VOLTS,AMPS,SECONDS (repeatable)
        #[arg(long = "charge", value_parser = parse_charge_step)]
        charge: Vec<(f64, f64, f64)>,
        /// Discharge step as AMPS,SECONDS (repeatable, applied after the charge steps)
        #[arg(long = "discharge", value_parser = parse_discharge_step)]
        discharge: Vec<(f64, f64)>,
    },
    /// Run a driver and a simulated charger on an in-process bus with an interactive console
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct SimulateArgs {
    /// Initial output voltage
    #[arg(long)]
    pub volts: Option<f64>,
    /// Initial output current
    #[arg(long)]
    pub amps: Option<f64>,
    /// Input power limit in watts
    #[arg(long)]
    pub watts: Option<f64>,
    /// Interval between driver commands (e.g. "1s", "500ms")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub update_time: Option<Duration>,
    /// Interval between charger status reports (e.g. "1s")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub status_interval: Option<Duration>,
    /// Charger timeout without commands (e.g. "2s")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub timeout: Option<Duration>,
    /// Start the driver immediately instead of waiting for 'start'
    #[clap(long, action)]
    pub start: bool,
}

const fn about_text() -> &'static str {
    "elcon charger command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// YAML configuration file (defaults to elcon.yaml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommands,
}
