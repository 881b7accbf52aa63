//! Wire-level constants and byte-packing helpers for the Waveshare USB-CAN-A
//! protocol: the fixed enum values, little/big-endian integer packing, and
//! the checksum used by the two fixed-length frame types.

use crate::error::Error;

/// Fixed protocol byte values shared by every frame on the wire.
pub mod constants {
    pub const START_BYTE: u8 = 0xAA;
    pub const HEADER: u8 = 0x55;
    pub const END_BYTE: u8 = 0x55;
    pub const RESERVED: u8 = 0x00;
}

/// Frame class tag, as written into byte 2 of a fixed-length frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Type {
    DataFixed,
    DataVariable,
    ConfFixed,
    ConfVariable,
}

impl Type {
    pub fn to_byte(self) -> u8 {
        match self {
            Type::DataFixed => 0x01,
            Type::DataVariable => 0xC0,
            Type::ConfFixed => 0x02,
            Type::ConfVariable => 0x12,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, Error> {
        match byte {
            0x01 => Ok(Type::DataFixed),
            0xC0 => Ok(Type::DataVariable),
            0x02 => Ok(Type::ConfFixed),
            0x12 => Ok(Type::ConfVariable),
            _ => Err(Error::BadType(byte)),
        }
    }
}

/// Identifier width / frame-class selector, as written into byte 3 (fixed
/// frames) or byte 4 (config frames), or folded into the TYPE byte of a
/// variable frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CANVersion {
    StdFixed,
    ExtFixed,
    StdVariable,
    ExtVariable,
}

impl CANVersion {
    pub fn to_byte(self) -> u8 {
        match self {
            CANVersion::StdFixed => 0x01,
            CANVersion::ExtFixed => 0x02,
            CANVersion::StdVariable => 0x00,
            CANVersion::ExtVariable => 0x01,
        }
    }

    pub fn from_fixed_byte(byte: u8) -> Result<Self, Error> {
        match byte {
            0x01 => Ok(CANVersion::StdFixed),
            0x02 => Ok(CANVersion::ExtFixed),
            _ => Err(Error::BadFrameType(byte)),
        }
    }

    pub fn is_extended(self) -> bool {
        matches!(self, CANVersion::ExtFixed | CANVersion::ExtVariable)
    }
}

/// Data-vs-remote selector for `FixedFrame`. Numerically distinct from
/// `VariableFormat` even though both frame classes speak of "format" --
/// the two wire conventions do not share a discriminant space.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FixedFormat {
    Data,
    Remote,
}

impl FixedFormat {
    pub fn to_byte(self) -> u8 {
        match self {
            FixedFormat::Data => 0x01,
            FixedFormat::Remote => 0x02,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, Error> {
        match byte {
            0x01 => Ok(FixedFormat::Data),
            0x02 => Ok(FixedFormat::Remote),
            _ => Err(Error::BadFormat(byte)),
        }
    }
}

/// Data-vs-remote selector packed into bit 4 of a `VariableFrame`'s TYPE
/// byte. See [`FixedFormat`] for why this is not shared with fixed frames.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VariableFormat {
    Data,
    Remote,
}

impl VariableFormat {
    pub fn bit(self) -> u8 {
        match self {
            VariableFormat::Data => 0,
            VariableFormat::Remote => 1,
        }
    }

    pub fn from_bit(bit: u8) -> Self {
        if bit == 0 {
            VariableFormat::Data
        } else {
            VariableFormat::Remote
        }
    }
}

/// Adapter-side CAN bus bit rate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CANBaud {
    Baud1M,
    Baud800K,
    Baud500K,
    Baud400K,
    Baud250K,
    Baud200K,
    Baud125K,
    Baud100K,
    Baud80K,
    Baud50K,
    Baud20K,
    Baud5K,
}

impl CANBaud {
    pub fn to_byte(self) -> u8 {
        use CANBaud::*;
        match self {
            Baud1M => 0x01,
            Baud800K => 0x02,
            Baud500K => 0x03,
            Baud400K => 0x04,
            Baud250K => 0x05,
            Baud200K => 0x06,
            Baud125K => 0x07,
            Baud100K => 0x08,
            Baud80K => 0x09,
            Baud50K => 0x0A,
            Baud20K => 0x0B,
            Baud5K => 0x0C,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, Error> {
        use CANBaud::*;
        Ok(match byte {
            0x01 => Baud1M,
            0x02 => Baud800K,
            0x03 => Baud500K,
            0x04 => Baud400K,
            0x05 => Baud250K,
            0x06 => Baud200K,
            0x07 => Baud125K,
            0x08 => Baud100K,
            0x09 => Baud80K,
            0x0A => Baud50K,
            0x0B => Baud20K,
            0x0C => Baud5K,
            _ => return Err(Error::BadCanBaud(byte)),
        })
    }

    /// Parse from the integer code used in JSON config and environment
    /// variables (same numeric values as [`CANBaud::to_byte`]).
    pub fn from_int(value: u32) -> Result<Self, Error> {
        if value > u8::MAX as u32 {
            return Err(Error::BadCanBaud(0xFF));
        }
        Self::from_byte(value as u8)
    }
}

/// Adapter operating mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CANMode {
    Normal,
    Loopback,
    Silent,
    LoopbackSilent,
}

impl CANMode {
    pub fn to_byte(self) -> u8 {
        match self {
            CANMode::Normal => 0x00,
            CANMode::Loopback => 0x01,
            CANMode::Silent => 0x02,
            CANMode::LoopbackSilent => 0x03,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, Error> {
        match byte {
            0x00 => Ok(CANMode::Normal),
            0x01 => Ok(CANMode::Loopback),
            0x02 => Ok(CANMode::Silent),
            0x03 => Ok(CANMode::LoopbackSilent),
            _ => Err(Error::BadCanMode(byte)),
        }
    }

    /// Parse the case-insensitive, dash/underscore-equivalent string form
    /// used in JSON config and environment variables.
    pub fn from_str_normalized(s: &str) -> Result<Self, Error> {
        let normalized = s.to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "normal" => Ok(CANMode::Normal),
            "loopback" => Ok(CANMode::Loopback),
            "silent" => Ok(CANMode::Silent),
            "loopback_silent" => Ok(CANMode::LoopbackSilent),
            _ => Err(Error::ConfigError(format!("invalid CAN mode: {}", s))),
        }
    }
}

/// Automatic retransmission on arbitration loss / bus error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RTX {
    Auto,
    Off,
}

impl RTX {
    pub fn to_byte(self) -> u8 {
        match self {
            RTX::Auto => 0x00,
            RTX::Off => 0x01,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, Error> {
        match byte {
            0x00 => Ok(RTX::Auto),
            0x01 => Ok(RTX::Off),
            _ => Err(Error::BadRtx(byte)),
        }
    }
}

/// Host-side serial port bit rate. Unlike the other protocol enums this is
/// not a small closed wire encoding -- the adapter firmware accepts a plain
/// bps figure -- so it is kept as a constrained newtype rather than an enum
/// with byte discriminants.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SerialBaud(u32);

impl SerialBaud {
    const SUPPORTED: [u32; 7] = [9600, 19200, 38400, 57600, 115200, 153600, 2_000_000];

    pub fn new(bps: u32) -> Result<Self, Error> {
        if Self::SUPPORTED.contains(&bps) {
            Ok(SerialBaud(bps))
        } else {
            Err(Error::ConfigError(format!(
                "unsupported serial baud rate: {}",
                bps
            )))
        }
    }

    pub fn bps(self) -> u32 {
        self.0
    }
}

impl Default for SerialBaud {
    fn default() -> Self {
        SerialBaud(2_000_000)
    }
}

pub fn int_to_bytes_le_4(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

pub fn int_to_bytes_be_4(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

pub fn bytes_to_int_le(bytes: &[u8]) -> Result<u32, Error> {
    match bytes.len() {
        2 => {
            let mut buf = [0u8; 4];
            buf[..2].copy_from_slice(bytes);
            Ok(u32::from_le_bytes(buf))
        }
        4 => Ok(u32::from_le_bytes(bytes.try_into().unwrap())),
        _ => Err(Error::BadLength(bytes.len())),
    }
}

pub fn bytes_to_int_be_4(bytes: &[u8]) -> Result<u32, Error> {
    if bytes.len() != 4 {
        return Err(Error::BadLength(bytes.len()));
    }
    Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
}

/// Sum of `buffer[start..=end]`, low byte only -- the Waveshare checksum.
pub fn checksum(buffer: &[u8], start: usize, end: usize) -> u8 {
    let sum: u32 = buffer[start..=end].iter().map(|&b| b as u32).sum();
    (sum & 0xFF) as u8
}

pub fn write_checksum(buffer: &mut [u8], checksum_offset: usize, start: usize, end: usize) {
    buffer[checksum_offset] = checksum(buffer, start, end);
}

pub fn validate_checksum(buffer: &[u8], checksum_offset: usize, start: usize, end: usize) -> bool {
    buffer[checksum_offset] == checksum(buffer, start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_byte_round_trips() {
        for t in [Type::DataFixed, Type::DataVariable, Type::ConfFixed, Type::ConfVariable] {
            assert_eq!(Type::from_byte(t.to_byte()).unwrap(), t);
        }
    }

    #[test]
    fn unknown_type_byte_is_bad_type() {
        assert!(matches!(Type::from_byte(0xFF), Err(Error::BadType(0xFF))));
    }

    #[test]
    fn can_version_fixed_round_trips() {
        assert_eq!(
            CANVersion::from_fixed_byte(CANVersion::StdFixed.to_byte()).unwrap(),
            CANVersion::StdFixed
        );
        assert_eq!(
            CANVersion::from_fixed_byte(CANVersion::ExtFixed.to_byte()).unwrap(),
            CANVersion::ExtFixed
        );
    }

    #[test]
    fn can_baud_all_twelve_values_round_trip() {
        use CANBaud::*;
        for baud in [
            Baud1M, Baud800K, Baud500K, Baud400K, Baud250K, Baud200K, Baud125K, Baud100K, Baud80K,
            Baud50K, Baud20K, Baud5K,
        ] {
            assert_eq!(CANBaud::from_byte(baud.to_byte()).unwrap(), baud);
        }
    }

    #[test]
    fn can_mode_string_form_is_case_and_separator_insensitive() {
        assert_eq!(
            CANMode::from_str_normalized("Loopback-Silent").unwrap(),
            CANMode::LoopbackSilent
        );
        assert_eq!(
            CANMode::from_str_normalized("SILENT").unwrap(),
            CANMode::Silent
        );
        assert!(CANMode::from_str_normalized("bogus").is_err());
    }

    #[test]
    fn serial_baud_rejects_unsupported_rate() {
        assert!(SerialBaud::new(4800).is_err());
        assert_eq!(SerialBaud::new(115200).unwrap().bps(), 115200);
        assert_eq!(SerialBaud::default().bps(), 2_000_000);
    }

    #[test]
    fn bytes_to_int_le_rejects_wrong_length() {
        assert!(matches!(bytes_to_int_le(&[1, 2, 3]), Err(Error::BadLength(3))));
    }

    #[test]
    fn le_be_4_byte_packing_round_trips() {
        let value = 0x1234_5678u32;
        assert_eq!(bytes_to_int_le(&int_to_bytes_le_4(value)).unwrap(), value);
        assert_eq!(bytes_to_int_be_4(&int_to_bytes_be_4(value)).unwrap(), value);
    }

    /// S5's literal checksum: `sum(bytes[2..=18]) & 0xFF == 0x14`.
    #[test]
    fn checksum_matches_s5_scenario() {
        let mut buf = [0u8; 20];
        buf[2] = 0x12;
        buf[3] = 0x01;
        buf[4] = 0x01;
        write_checksum(&mut buf, 19, 2, 18);
        assert_eq!(buf[19], 0x14);
        assert!(validate_checksum(&buf, 19, 2, 18));
    }

    #[test]
    fn checksum_wraps_at_256() {
        let buf = [0xFFu8; 20];
        assert_eq!(checksum(&buf, 2, 18), (0xFF * 17) as u8);
    }
}
