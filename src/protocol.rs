use crate::Error;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Node addresses used on the charger bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Address {
    Charger = 0xE5,
    Manager = 0xF4,
    Broadcast = 0x50,
    /// Reserved for an inverter, nothing in this crate talks to it.
    Inverter = 0xEF,
}

impl From<Address> for u8 {
    fn from(address: Address) -> u8 {
        address as u8
    }
}

// Identifier fields that are constant for this protocol
pub const PRIORITY: u8 = 6;
pub const RESERVED: u8 = 0;
pub const DATA_PAGE: u8 = 0;
pub const PDU_FORMAT: u8 = 6;

pub const PAYLOAD_LENGTH: usize = 5;
pub const MAX_DATA_LENGTH: usize = 8;
const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;
// Voltage and current travel as tenths of a unit
const SCALE: f64 = 10.0;

macro_rules! read_bit {
    ($byte:expr,$position:expr) => {
        ($byte >> $position) & 1 != 0
    };
}

/// Packs the 29-bit extended identifier.
///
/// The identifier is assembled big-endian from four bytes:
/// `(priority << 2) | (reserved << 1) | data_page`, the PDU format, the
/// destination and the source. Every field is masked to its bit width, so
/// out of range values are silently truncated rather than rejected.
pub fn pack_id(
    priority: u8,
    reserved: u8,
    data_page: u8,
    pdu_format: u8,
    destination: u8,
    source: u8,
) -> u32 {
    let top_byte = ((priority & 0x07) << 2) | ((reserved & 0x01) << 1) | (data_page & 0x01);
    u32::from_be_bytes([top_byte, pdu_format, destination, source])
}

/// Extracts `(destination, source)` from an identifier.
///
/// Priority, reserved, data page and PDU format are fixed for this protocol
/// and are dropped.
pub fn unpack_id(id: u32) -> (u8, u8) {
    let [_, _, destination, source] = id.to_be_bytes();
    (destination, source)
}

/// Identifier for a frame sent from `source` to `destination`.
pub fn frame_id(destination: u8, source: u8) -> u32 {
    pack_id(PRIORITY, RESERVED, DATA_PAGE, PDU_FORMAT, destination, source)
}

/// Packs voltage, current and flags into the five byte payload.
///
/// Voltage and current are multiplied by ten and truncated toward zero
/// (fixed point, not rounded). The float to integer cast saturates, so
/// negative values encode as 0 and values above 6553.5 as 0xFFFF.
pub fn pack_payload(voltage: f64, current: f64, flags: u8) -> [u8; PAYLOAD_LENGTH] {
    let v = ((voltage * SCALE) as u16).to_be_bytes();
    let i = ((current * SCALE) as u16).to_be_bytes();
    [v[0], v[1], i[0], i[1], flags]
}

fn validate_len(buffer: &[u8]) -> std::result::Result<(), Error> {
    if buffer.len() != PAYLOAD_LENGTH {
        log::warn!(
            "Invalid payload size - required={} received={}",
            PAYLOAD_LENGTH,
            buffer.len()
        );
        return Err(Error::MalformedFrame {
            length: buffer.len(),
        });
    }
    Ok(())
}

/// Unpacks `(voltage, current, flags)` from a five byte payload.
pub fn unpack_payload(rx_buffer: &[u8]) -> std::result::Result<(f64, f64, u8), Error> {
    validate_len(rx_buffer)?;
    Ok((
        u16::from_be_bytes([rx_buffer[0], rx_buffer[1]]) as f64 / SCALE,
        u16::from_be_bytes([rx_buffer[2], rx_buffer[3]]) as f64 / SCALE,
        rx_buffer[4],
    ))
}

/// An extended-format CAN frame.
///
/// Frames are immutable once built; the identifier is masked to 29 bits.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    arbitration_id: u32,
    data: [u8; MAX_DATA_LENGTH],
    len: usize,
}

impl Frame {
    /// Builds a frame from raw bus data, as received by a transport.
    pub fn new(arbitration_id: u32, data: &[u8]) -> std::result::Result<Self, Error> {
        if data.len() > MAX_DATA_LENGTH {
            return Err(Error::FrameTooLong { length: data.len() });
        }
        let mut buffer = [0; MAX_DATA_LENGTH];
        buffer[..data.len()].copy_from_slice(data);
        Ok(Self {
            arbitration_id: arbitration_id & EXTENDED_ID_MASK,
            data: buffer,
            len: data.len(),
        })
    }

    fn from_payload(arbitration_id: u32, payload: [u8; PAYLOAD_LENGTH]) -> Self {
        let mut data = [0; MAX_DATA_LENGTH];
        data[..PAYLOAD_LENGTH].copy_from_slice(&payload);
        Self {
            arbitration_id: arbitration_id & EXTENDED_ID_MASK,
            data,
            len: PAYLOAD_LENGTH,
        }
    }

    pub fn arbitration_id(&self) -> u32 {
        self.arbitration_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn destination(&self) -> u8 {
        unpack_id(self.arbitration_id).0
    }

    pub fn source(&self) -> u8 {
        unpack_id(self.arbitration_id).1
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}#{:02X?}", self.arbitration_id, self.data())
    }
}

/// Fault bits reported by the charger.
///
/// On frames sent to the charger bit 0 means "enable" instead of
/// `hardware_failure`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StatusFlags {
    pub hardware_failure: bool,
    pub over_temperature: bool,
    pub input_voltage_fault: bool,
    pub no_battery: bool,
    pub timeout: bool,
}

impl From<u8> for StatusFlags {
    fn from(flags: u8) -> Self {
        Self {
            hardware_failure: read_bit!(flags, 0),
            over_temperature: read_bit!(flags, 1),
            input_voltage_fault: read_bit!(flags, 2),
            no_battery: read_bit!(flags, 3),
            timeout: read_bit!(flags, 4),
        }
    }
}

impl From<StatusFlags> for u8 {
    fn from(flags: StatusFlags) -> u8 {
        (flags.hardware_failure as u8)
            | (flags.over_temperature as u8) << 1
            | (flags.input_voltage_fault as u8) << 2
            | (flags.no_battery as u8) << 3
            | (flags.timeout as u8) << 4
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ok = |fault: bool| if fault { "XX" } else { "OK" };
        write!(
            f,
            "HW={} Temp={} Vin={} Bat={} T/O={}",
            ok(self.hardware_failure),
            ok(self.over_temperature),
            ok(self.input_voltage_fault),
            if self.no_battery { "No" } else { "OK" },
            ok(self.timeout)
        )
    }
}

/// A decoded frame addressed to us or to broadcast.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Status {
    pub source: u8,
    pub destination: u8,
    pub voltage: f64,
    pub current: f64,
    pub flags: StatusFlags,
}

impl Status {
    /// Decodes `frame` on behalf of the node at `our_address`.
    ///
    /// Returns `Ok(None)` when the frame is addressed to some other node:
    /// that is "no update", not an error. A payload of the wrong length is
    /// `Error::MalformedFrame` and the frame must be discarded.
    pub fn decode(frame: &Frame, our_address: u8) -> std::result::Result<Option<Self>, Error> {
        let (destination, source) = unpack_id(frame.arbitration_id());
        if destination != our_address && destination != Address::Broadcast as u8 {
            log::debug!("Ignoring frame from {source:02X} to {destination:02X}");
            return Ok(None);
        }
        let (voltage, current, flags) = unpack_payload(frame.data())?;
        Ok(Some(Self {
            source,
            destination,
            voltage,
            current,
            flags: StatusFlags::from(flags),
        }))
    }

    /// The enable bit, meaningful on frames addressed to the charger.
    pub fn enable(&self) -> bool {
        self.flags.hardware_failure
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:.2}V {:.2}A {}",
            self.voltage, self.current, self.flags
        )
    }
}

fn pack_frame(
    source: u8,
    destination: u8,
    voltage: f64,
    current: f64,
    flags: u8,
) -> std::result::Result<Frame, Error> {
    if voltage <= 0.0 {
        log::debug!("Not packing a frame - voltage must be positive, got {voltage}");
        return Err(Error::RefusedCommand { voltage, current });
    }
    Ok(Frame::from_payload(
        frame_id(destination, source),
        pack_payload(voltage, current, flags),
    ))
}

/// Packs a setpoint command. Only the enable bit is carried in the flags.
///
/// Refuses with `Error::RefusedCommand` when `voltage <= 0`; the caller
/// sends nothing this tick.
pub fn pack_command(
    source: u8,
    destination: u8,
    voltage: f64,
    current: f64,
    enable: bool,
) -> std::result::Result<Frame, Error> {
    pack_frame(source, destination, voltage, current, enable as u8)
}

/// Packs a charger status report carrying the charger's fault flags.
pub fn pack_status(
    source: u8,
    destination: u8,
    voltage: f64,
    current: f64,
    flags: StatusFlags,
) -> std::result::Result<Frame, Error> {
    pack_frame(source, destination, voltage, current, flags.into())
}
