//! Port traits: the seams between the adapter/bridge logic and the outside
//! world (a serial device, a SocketCAN interface).
//!
//! Splitting I/O behind `SerialPort`/`CanSocket` traits -- rather than
//! letting [`crate::adapter::UsbAdapter`] and [`crate::bridge::SocketCanBridge`]
//! open file descriptors directly -- is what lets [`fake`] stand in for
//! hardware in tests.

mod fake;
mod real;

pub use fake::{FakeCanSocket, FakeSerialPort};
pub use real::{RealCanSocket, RealSerialPort};

use crate::error::Error;

/// Kernel `struct can_frame` layout (`linux/can.h`), reused verbatim so a
/// `CanSocket` impl can read/write it with a raw `libc::read`/`write` call.
#[derive(Debug, Copy, Clone)]
#[repr(C, align(8))]
pub struct CanFrame {
    id: u32,
    data_len: u8,
    pad: u8,
    res0: u8,
    res1: u8,
    data: [u8; 8],
}

/// if set, indicate 29 bit extended format
pub const EFF_FLAG: u32 = 0x8000_0000;
/// remote transmission request flag
pub const RTR_FLAG: u32 = 0x4000_0000;
/// error flag
pub const ERR_FLAG: u32 = 0x2000_0000;
/// valid bits in standard frame id
pub const SFF_MASK: u32 = 0x0000_07ff;
/// valid bits in extended frame id
pub const EFF_MASK: u32 = 0x1fff_ffff;

impl Default for CanFrame {
    fn default() -> Self {
        CanFrame {
            id: 0,
            data_len: 0,
            pad: 0,
            res0: 0,
            res1: 0,
            data: [0; 8],
        }
    }
}

impl CanFrame {
    /// Infers the EFF flag from `id`'s magnitude: extended iff `id > SFF_MASK`.
    /// Callers that already know the intended frame class (e.g. converting
    /// from a Waveshare frame whose `can_version` says EXT even though the id
    /// happens to fit in 11 bits) should use [`CanFrame::with_flags`] instead.
    pub fn new(id: u32, data: &[u8], rtr: bool) -> Result<CanFrame, Error> {
        let extended = id > SFF_MASK;
        Self::with_flags(id, data, extended, rtr)
    }

    /// Builds a frame with the EFF/RTR flags set explicitly rather than
    /// inferred from `id`'s magnitude.
    pub fn with_flags(mut id: u32, data: &[u8], extended: bool, rtr: bool) -> Result<CanFrame, Error> {
        if data.len() > 8 {
            return Err(Error::BadDLC(data.len()));
        }
        if id > EFF_MASK {
            return Err(Error::BadID(id));
        }
        if !extended && id > SFF_MASK {
            return Err(Error::BadID(id));
        }
        if extended {
            id |= EFF_FLAG;
        }
        if rtr {
            id |= RTR_FLAG;
        }

        let mut full_data = [0u8; 8];
        full_data[..data.len()].copy_from_slice(data);

        Ok(CanFrame {
            id,
            data_len: data.len() as u8,
            pad: 0,
            res0: 0,
            res1: 0,
            data: full_data,
        })
    }

    /// The CAN identifier, with the EFF/RTR flag bits masked off.
    pub fn id(&self) -> u32 {
        if self.is_extended() {
            self.id & EFF_MASK
        } else {
            self.id & SFF_MASK
        }
    }

    pub fn is_extended(&self) -> bool {
        self.id & EFF_FLAG != 0
    }

    pub fn is_rtr(&self) -> bool {
        self.id & RTR_FLAG != 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_len as usize]
    }

    pub fn dlc(&self) -> usize {
        self.data_len as usize
    }
}

/// Abstracts the host serial device the Waveshare adapter speaks over.
///
/// Implementations: [`RealSerialPort`] (termios over a `/dev/ttyUSB*` node),
/// [`FakeSerialPort`] (queue-backed, for tests).
pub trait SerialPort: Send {
    /// Write `data`. Returns bytes written, or an error on failure.
    fn write(&self, data: &[u8]) -> Result<usize, Error>;

    /// Read up to `buf.len()` bytes with the given timeout. A timeout with
    /// no data available returns `Ok(0)`, not an error.
    fn read(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, Error>;

    fn is_open(&self) -> bool;

    fn close(&self);

    fn device_path(&self) -> &str;
}

/// Abstracts a SocketCAN `CAN_RAW` socket.
///
/// Implementations: [`RealCanSocket`] (a bound `AF_CAN`/`SOCK_RAW` fd),
/// [`FakeCanSocket`] (queue-backed, for tests).
pub trait CanSocket: Send + Sync {
    fn send(&self, frame: &CanFrame) -> Result<(), Error>;

    /// Receive one frame. A timeout with nothing pending returns
    /// `Err(Error::Timeout)`.
    fn receive(&self) -> Result<CanFrame, Error>;

    fn is_open(&self) -> bool;

    fn close(&self);

    fn interface_name(&self) -> &str;
}
