//! CANopen client (CiA 301 SDO/PDO/SYNC, CiA 402 drive profile) bridged to
//! Linux SocketCAN over a Waveshare USB-CAN-A serial adapter.
//!
//! # Layers
//!
//! - [`protocol`] / [`frame`]: bit-exact Waveshare wire framing (three
//!   frame classes, checksums, a validated builder).
//! - [`port`]: the `SerialPort`/`CanSocket` seams, with real (`libc`/termios2
//!   /SocketCAN) and in-memory fake implementations.
//! - [`adapter`]: frame-level I/O over a `SerialPort`, with independent
//!   read/write locking.
//! - [`codec`] / [`bridge`]: the USB <-> SocketCAN forwarding bridge, two
//!   threads wide, with per-direction statistics.
//! - [`canopen`]: the CiA 301 SDO client, the PDO manager, and the CiA 402
//!   drive state machine, all built on the [`port::CanSocket`] trait so they
//!   work against a real interface or a bridge-fed one interchangeably.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use waveshare_canopen::adapter::UsbAdapter;
//! use waveshare_canopen::bridge::SocketCanBridge;
//! use waveshare_canopen::config::BridgeConfig;
//! use waveshare_canopen::port::{RealCanSocket, RealSerialPort};
//! use waveshare_canopen::protocol::SerialBaud;
//!
//! # fn main() -> Result<(), waveshare_canopen::error::Error> {
//! let config = BridgeConfig::load(None)?;
//! let baud = SerialBaud::new(config.serial_baud_rate)?;
//! let serial = Arc::new(RealSerialPort::new(&config.usb_device_path, baud)?);
//! let adapter = Arc::new(UsbAdapter::new(serial));
//! let can_socket = Arc::new(RealCanSocket::new(
//!     &config.socketcan_interface,
//!     std::time::Duration::from_millis(config.socketcan_read_timeout_ms as u64),
//! )?);
//!
//! let bridge = SocketCanBridge::new(can_socket, adapter, &config)?;
//! bridge.start()?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod bridge;
pub mod canopen;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod port;
pub mod protocol;
pub mod retry;
mod util;

pub use error::{Error, Result};
