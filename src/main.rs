use anyhow::{Context, Result};
use clap::Parser;
use elcon_lib::battery::Battery;
use elcon_lib::bus::LoopbackBus;
use elcon_lib::driver::{ChargerDriver, DriverHandle, DriverSettings};
use elcon_lib::protocol::{self, Frame, Status};
use elcon_lib::simulator::{ChargerSimulator, SimulatorSettings};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

mod commandline;
mod config;
mod console;

use commandline::{CliArgs, CliCommands, SimulateArgs};
use config::Config;
use console::ConsoleCommand;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn encode(destination: u8, source: u8, volts: f64, amps: f64, enable: bool) -> Result<()> {
    let frame = protocol::pack_command(source, destination, volts, amps, enable)
        .with_context(|| "Cannot encode command")?;
    println!("ID: {:08X}", frame.arbitration_id());
    println!("Data: {:02X?}", frame.data());
    Ok(())
}

fn decode(id: u32, payload: &[u8], our_address: u8, json: bool) -> Result<()> {
    let frame = Frame::new(id, payload).with_context(|| "Cannot build frame")?;
    let (destination, source) = protocol::unpack_id(frame.arbitration_id());
    let Some(status) =
        Status::decode(&frame, our_address).with_context(|| "Cannot decode frame")?
    else {
        println!("Not addressed to us: {source:02X} -> {destination:02X}");
        return Ok(());
    };
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).with_context(|| "Cannot serialize status")?
        );
    } else {
        println!("From {source:02X} to {destination:02X}: {status}");
    }
    Ok(())
}

fn battery(
    battery_config: &config::BatteryConfig,
    capacity: Option<f64>,
    cells: Option<u32>,
    charge: &[(f64, f64, f64)],
    discharge: &[(f64, f64)],
) -> Result<()> {
    let capacity = capacity.unwrap_or(battery_config.capacity_ah);
    anyhow::ensure!(capacity > 0.0, "Battery capacity must be positive, got {capacity}");
    let mut battery = Battery::new(capacity, cells.unwrap_or(battery_config.cells));
    println!("{battery} at {:.3}V", battery.voltage());
    for &(volts, amps, seconds) in charge {
        battery.charge(volts, amps, seconds);
        println!(
            "charge {volts}V {amps}A {seconds}s: {battery} at {:.3}V",
            battery.voltage()
        );
    }
    for &(amps, seconds) in discharge {
        battery.discharge(amps, seconds);
        println!(
            "discharge {amps}A {seconds}s: {battery} at {:.3}V",
            battery.voltage()
        );
    }
    Ok(())
}

/// Feeds console lines to the driver until `quit` or end of input.
async fn run_console(driver: DriverHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", console::HELP);
    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| "Cannot read console input")?
    {
        match console::parse(&line) {
            Ok(ConsoleCommand::Driver(command)) => {
                if !driver.send(command).await {
                    warn!("Driver is gone, leaving console");
                    break;
                }
            }
            Ok(ConsoleCommand::Quit) => break,
            Ok(ConsoleCommand::Help) => println!("{}", console::HELP),
            Ok(ConsoleCommand::Empty) => println!("{}", driver.report()),
            Err(err) => println!("Error: {err}"),
        }
    }
    driver.finish().await;
    Ok(())
}

async fn simulate(mut config: Config, args: SimulateArgs) -> Result<()> {
    config
        .apply_overrides(&args)
        .with_context(|| "Invalid simulate options")?;
    let driver_settings = DriverSettings::from(&config.driver);
    let simulator_settings = SimulatorSettings::from(&config.charger);
    let battery = Battery::new(config.battery.capacity_ah, config.battery.cells);

    info!("Simulating {battery}, driver {driver_settings:?}, charger {simulator_settings:?}");

    let bus = LoopbackBus::default();
    let simulator = ChargerSimulator::new(bus.endpoint(), battery, simulator_settings.clone());
    let mut reports = simulator.subscribe();
    let (driver, handle) = ChargerDriver::new(bus.endpoint(), driver_settings);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let simulator_task = tokio::spawn(simulator.run(shutdown_rx));
    let driver_task = tokio::spawn(driver.run());
    if args.start {
        handle.start().await;
    }

    let printer = tokio::spawn(async move {
        let mut interval = tokio::time::interval(simulator_settings.status_interval);
        loop {
            interval.tick().await;
            if reports.has_changed().is_err() {
                break;
            }
            let report = reports.borrow_and_update().clone();
            println!("[{}] {report}", chrono::Local::now().format("%X"));
        }
    });

    tokio::select! {
        result = run_console(handle.clone()) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            handle.finish().await;
        }
    }

    driver_task
        .await
        .with_context(|| "Driver task failed")?
        .with_context(|| "Driver stopped with error")?;
    println!("{}", handle.report());
    let _ = shutdown_tx.send(true);
    let session = simulator_task
        .await
        .with_context(|| "Simulator task failed")?
        .with_context(|| "Simulator stopped with error")?;
    printer.abort();
    println!(
        "Final battery: {} at {:.2}V",
        session.battery(),
        session.battery().voltage()
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let config = Config::load_or_default(args.config.as_deref())
        .with_context(|| "Cannot load configuration")?;

    match args.command {
        CliCommands::Encode {
            volts,
            amps,
            destination,
            source,
            enable,
        } => encode(destination, source, volts, amps, enable)?,
        CliCommands::Decode {
            id,
            payload,
            our_address,
            json,
        } => decode(id, &payload.0, our_address, json)?,
        CliCommands::Battery {
            capacity,
            cells,
            charge,
            discharge,
        } => battery(&config.battery, capacity, cells, &charge, &discharge)?,
        CliCommands::Simulate(simulate_args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .with_context(|| "Cannot start async runtime")?;
            runtime.block_on(simulate(config, simulate_args))?
        }
    }

    Ok(())
}
