//! The USB-CAN-A adapter: frame-level send/receive over a [`SerialPort`],
//! with read and write serialized independently so one direction never
//! blocks the other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::frame::{ConfigFrame, FixedFrame, VariableFrame, WireFrame};
use crate::port::SerialPort;
use crate::protocol::constants;

static SHOULD_STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_signum: libc::c_int) {
    SHOULD_STOP.store(true, Ordering::SeqCst);
}

/// Installs a process-wide SIGINT handler that flips [`should_stop`] to
/// true. No type in this crate calls this on its own -- applications that
/// want Ctrl-C to unwind a long-running read/forward loop opt in explicitly.
/// Safe to call more than once.
pub fn install_sigint_handler() {
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
    }
}

/// Whether [`install_sigint_handler`] has observed a SIGINT. Setting this
/// flag never touches a [`UsbAdapter`]'s locks; it is plain process state.
pub fn should_stop() -> bool {
    SHOULD_STOP.load(Ordering::SeqCst)
}

/// Frame-level API over a [`SerialPort`].
///
/// Holds two independent mutexes, one for writes and one for reads, rather
/// than a single lock around the port: a blocked read (waiting on bus
/// traffic) must not stall an unrelated write, and vice versa.
pub struct UsbAdapter {
    port: Arc<dyn SerialPort>,
    write_lock: Mutex<()>,
    read_lock: Mutex<()>,
}

impl UsbAdapter {
    pub fn new(port: Arc<dyn SerialPort>) -> Self {
        UsbAdapter {
            port,
            write_lock: Mutex::new(()),
            read_lock: Mutex::new(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_open()
    }

    pub fn device_path(&self) -> &str {
        self.port.device_path()
    }

    fn send_bytes(&self, bytes: &[u8]) -> Result<(), Error> {
        let _guard = self.write_lock.lock().unwrap();
        let written = self.port.write(bytes)?;
        if written != bytes.len() {
            return Err(Error::DeviceWriteError(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "short write to serial port",
            )));
        }
        Ok(())
    }

    /// Serialize and send any of the three frame classes.
    pub fn send_frame<F: WireFrame>(&self, frame: &F) -> Result<(), Error> {
        self.send_bytes(&frame.serialize())
    }

    fn read_some(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let _guard = self.read_lock.lock().unwrap();
        self.port.read(buf, -1)
    }

    fn read_exact_timeout(&self, buf: &mut [u8], timeout_ms: u64) -> Result<(), Error> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut total = 0;
        while total < buf.len() {
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            let n = self.read_some(&mut buf[total..])?;
            total += n;
        }
        Ok(())
    }

    /// Read a 20-byte fixed-length data frame, blocking up to `timeout_ms`.
    pub fn receive_fixed_frame(&self, timeout_ms: u64) -> Result<FixedFrame, Error> {
        let mut buf = [0u8; 20];
        self.read_exact_timeout(&mut buf, timeout_ms)?;
        FixedFrame::deserialize(&buf)
    }

    /// Read a 20-byte configuration-ack frame, blocking up to `timeout_ms`.
    pub fn receive_config_frame(&self, timeout_ms: u64) -> Result<ConfigFrame, Error> {
        let mut buf = [0u8; 20];
        self.read_exact_timeout(&mut buf, timeout_ms)?;
        ConfigFrame::deserialize(&buf)
    }

    /// Scan byte-by-byte for a variable-length frame: discard everything
    /// before a START byte, then accumulate until END or the 15-byte cap.
    ///
    /// Like the adapter firmware's own framing, this does not distinguish
    /// a payload byte that happens to equal the END marker from a real
    /// frame terminator -- the same ambiguity the wire protocol itself
    /// accepts.
    pub fn receive_variable_frame(&self, timeout_ms: u64) -> Result<VariableFrame, Error> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut buf = Vec::with_capacity(15);
        let mut found_start = false;

        loop {
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }

            let mut byte = [0u8; 1];
            if self.read_some(&mut byte)? == 0 {
                continue;
            }

            if !found_start {
                if byte[0] == constants::START_BYTE {
                    found_start = true;
                    buf.push(byte[0]);
                }
                continue;
            }

            buf.push(byte[0]);
            if byte[0] == constants::END_BYTE {
                return VariableFrame::deserialize(&buf);
            }
            if buf.len() > 15 {
                return Err(Error::BadLength(buf.len()));
            }
        }
    }

    /// Drain any input currently buffered on the port. Takes both locks, so
    /// it never races an in-progress read or write.
    pub fn flush(&self) -> Result<(), Error> {
        let _write_guard = self.write_lock.lock().unwrap();
        let _read_guard = self.read_lock.lock().unwrap();
        let mut scratch = [0u8; 64];
        while self.port.read(&mut scratch, 0)? > 0 {}
        Ok(())
    }
}
