//! Crate-wide error taxonomy.
//!
//! A single tagged enum rather than one per module: callers crossing the
//! frame / adapter / bridge / CANopen boundary need one `match`-able type,
//! and every layer here ultimately bottoms out in a handful of shared
//! failure modes (bad wire bytes, device I/O, SDO protocol violations).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid START byte")]
    BadStart,
    #[error("invalid HEADER byte")]
    BadHeader,
    #[error("invalid END byte")]
    BadEnd,
    #[error("unrecognized TYPE byte: {0:#04x}")]
    BadType(u8),
    #[error("unrecognized frame-class byte: {0:#04x}")]
    BadFrameType(u8),
    #[error("unrecognized FORMAT byte: {0:#04x}")]
    BadFormat(u8),
    #[error("buffer has wrong length: {0}")]
    BadLength(usize),
    #[error("data length code out of range (0..=8): {0}")]
    BadDLC(usize),
    #[error("CAN ID {0:#x} out of range for the selected version")]
    BadID(u32),
    #[error("filter value {0:#x} out of range")]
    BadFilter(u32),
    #[error("mask value {0:#x} out of range")]
    BadMask(u32),
    #[error("checksum mismatch")]
    BadChecksum,
    #[error("unrecognized CAN mode byte: {0:#04x}")]
    BadCanMode(u8),
    #[error("unrecognized CAN baud byte: {0:#04x}")]
    BadCanBaud(u8),
    #[error("unrecognized auto-retransmit byte: {0:#04x}")]
    BadRtx(u8),

    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device not open")]
    DeviceNotOpen,
    #[error("device already open")]
    DeviceAlreadyOpen,
    #[error("device read error: {0}")]
    DeviceReadError(std::io::Error),
    #[error("device write error: {0}")]
    DeviceWriteError(std::io::Error),
    #[error("device configuration failed: {0}")]
    DeviceConfigError(String),

    #[error("operation timed out")]
    Timeout,

    #[error("SDO transaction timed out")]
    SdoTimeout,
    #[error("SDO abort, code {code:#010x}")]
    SdoAbort { code: u32 },
    #[error("SDO protocol violation: {0}")]
    CanSdoProtocol(String),

    #[error("PDO error: {0}")]
    CanPdoError(String),
    #[error("drive fault: {0}")]
    CanNmtError(String),

    #[error("builder missing required field: {0}")]
    MissingField(&'static str),

    #[error("object dictionary entry not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, Error>;
