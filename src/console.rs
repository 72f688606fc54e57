//! Line oriented control of a running driver.

use elcon_lib::driver::DriverCommand;

pub const HELP: &str = "\
Commands:
  start        start sending commands to the charger
  stop         stop sending commands
  volts <V>    set the output voltage
  amps <A>     set the output current
  watts <W>    set the input power limit
  quit         stop the driver and exit
  help         show this text";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Driver(DriverCommand),
    Quit,
    Help,
    Empty,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsoleError {
    #[error("Unknown command '{0}', try 'help'")]
    Unknown(String),
    #[error("'{0}' needs a number")]
    MissingValue(&'static str),
    #[error("Cannot parse '{value}' as a number for '{verb}'")]
    InvalidNumber { verb: &'static str, value: String },
}

fn number(verb: &'static str, value: Option<&str>) -> Result<f64, ConsoleError> {
    let value = value.ok_or(ConsoleError::MissingValue(verb))?;
    value.parse().map_err(|_| ConsoleError::InvalidNumber {
        verb,
        value: value.to_string(),
    })
}

/// Parses one console line.
///
/// A failed number parse is an error, so the driver keeps its prior value.
pub fn parse(line: &str) -> Result<ConsoleCommand, ConsoleError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(ConsoleCommand::Empty);
    };
    let command = match verb.to_ascii_lowercase().as_str() {
        "start" => ConsoleCommand::Driver(DriverCommand::Start),
        "stop" => ConsoleCommand::Driver(DriverCommand::Stop),
        "volts" => ConsoleCommand::Driver(DriverCommand::SetVolts(number("volts", words.next())?)),
        "amps" => ConsoleCommand::Driver(DriverCommand::SetAmps(number("amps", words.next())?)),
        "watts" => {
            ConsoleCommand::Driver(DriverCommand::SetMaxWatts(number("watts", words.next())?))
        }
        "quit" | "exit" => ConsoleCommand::Quit,
        "help" | "?" => ConsoleCommand::Help,
        _ => return Err(ConsoleError::Unknown(line.trim().to_string())),
    };
    Ok(command)
}
