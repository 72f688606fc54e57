/// Errors produced by the Elcon frame codec and the bus endpoints.
///
/// None of these are fatal: a malformed frame is discarded, a refused
/// command means nothing is sent this tick and a closed bus ends the peer
/// loop that owns it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The payload is not exactly five bytes long.
    #[error("Malformed frame: payload has {length} bytes, expected 5")]
    MalformedFrame { length: usize },
    /// A CAN frame cannot carry more than eight data bytes.
    #[error("Frame data too long: {length} bytes, maximum is 8")]
    FrameTooLong { length: usize },
    /// Encoding refused, there is nothing meaningful to transmit.
    #[error("Refused command: {voltage}V {current}A is not transmittable")]
    RefusedCommand { voltage: f64, current: f64 },
    /// A peer loop cannot run on a zero period.
    #[error("Interval {name} must be longer than zero")]
    ZeroInterval { name: &'static str },
    /// Every other endpoint of the bus has gone away.
    #[error("Bus closed")]
    BusClosed,
}
