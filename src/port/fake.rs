//! Queue-backed [`SerialPort`]/[`CanSocket`] stand-ins for hardware-free
//! tests: inject bytes/frames into an RX queue, then assert against what
//! ends up in the TX history.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::{CanFrame, CanSocket, SerialPort};
use crate::error::Error;

#[derive(Default)]
struct FakeSerialPortState {
    rx_queue: VecDeque<u8>,
    tx_history: Vec<Vec<u8>>,
    is_open: bool,
    simulate_write_error: bool,
}

pub struct FakeSerialPort {
    device_path: String,
    state: Mutex<FakeSerialPortState>,
}

impl FakeSerialPort {
    pub fn new(device_path: &str) -> Self {
        FakeSerialPort {
            device_path: device_path.to_string(),
            state: Mutex::new(FakeSerialPortState {
                rx_queue: VecDeque::new(),
                tx_history: Vec::new(),
                is_open: true,
                simulate_write_error: false,
            }),
        }
    }

    /// Appends to the flat RX byte stream -- a single injected chunk may be
    /// drained across several short reads, same as a real serial port.
    pub fn inject_rx(&self, data: Vec<u8>) {
        self.state.lock().unwrap().rx_queue.extend(data);
    }

    pub fn tx_history(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().tx_history.clone()
    }

    pub fn clear_tx_history(&self) {
        self.state.lock().unwrap().tx_history.clear();
    }

    pub fn set_simulate_write_error(&self, enable: bool) {
        self.state.lock().unwrap().simulate_write_error = enable;
    }

    pub fn rx_queue_len(&self) -> usize {
        self.state.lock().unwrap().rx_queue.len()
    }
}

impl SerialPort for FakeSerialPort {
    fn write(&self, data: &[u8]) -> Result<usize, Error> {
        let mut state = self.state.lock().unwrap();
        if !state.is_open {
            return Err(Error::DeviceNotOpen);
        }
        if state.simulate_write_error {
            return Err(Error::DeviceWriteError(std::io::Error::from_raw_os_error(
                libc::EIO,
            )));
        }
        state.tx_history.push(data.to_vec());
        Ok(data.len())
    }

    fn read(&self, buf: &mut [u8], _timeout_ms: i32) -> Result<usize, Error> {
        let mut state = self.state.lock().unwrap();
        if !state.is_open {
            return Err(Error::DeviceNotOpen);
        }
        let n = buf.len().min(state.rx_queue.len());
        for slot in buf.iter_mut().take(n) {
            *slot = state.rx_queue.pop_front().unwrap();
        }
        Ok(n)
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().is_open
    }

    fn close(&self) {
        self.state.lock().unwrap().is_open = false;
    }

    fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[derive(Default)]
struct FakeCanSocketState {
    rx_queue: VecDeque<CanFrame>,
    tx_history: Vec<CanFrame>,
    is_open: bool,
    simulate_timeout: bool,
}

pub struct FakeCanSocket {
    interface_name: String,
    state: Mutex<FakeCanSocketState>,
}

impl FakeCanSocket {
    pub fn new(interface_name: &str) -> Self {
        FakeCanSocket {
            interface_name: interface_name.to_string(),
            state: Mutex::new(FakeCanSocketState {
                rx_queue: VecDeque::new(),
                tx_history: Vec::new(),
                is_open: true,
                simulate_timeout: false,
            }),
        }
    }

    pub fn inject_rx(&self, frame: CanFrame) {
        self.state.lock().unwrap().rx_queue.push_back(frame);
    }

    pub fn tx_history(&self) -> Vec<CanFrame> {
        self.state.lock().unwrap().tx_history.clone()
    }

    pub fn set_simulate_timeout(&self, enable: bool) {
        self.state.lock().unwrap().simulate_timeout = enable;
    }

    pub fn rx_queue_len(&self) -> usize {
        self.state.lock().unwrap().rx_queue.len()
    }
}

impl CanSocket for FakeCanSocket {
    fn send(&self, frame: &CanFrame) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if !state.is_open {
            return Err(Error::DeviceNotOpen);
        }
        state.tx_history.push(*frame);
        Ok(())
    }

    fn receive(&self) -> Result<CanFrame, Error> {
        let mut state = self.state.lock().unwrap();
        if !state.is_open {
            return Err(Error::DeviceNotOpen);
        }
        if state.simulate_timeout {
            return Err(Error::Timeout);
        }
        state.rx_queue.pop_front().ok_or(Error::Timeout)
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().is_open
    }

    fn close(&self) {
        self.state.lock().unwrap().is_open = false;
    }

    fn interface_name(&self) -> &str {
        &self.interface_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_round_trip() {
        let port = FakeSerialPort::new("/dev/fake0");
        port.inject_rx(vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        let n = port.read(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);

        port.write(&[9, 9]).unwrap();
        assert_eq!(port.tx_history(), vec![vec![9, 9]]);
    }

    #[test]
    fn serial_read_with_empty_queue_is_zero() {
        let port = FakeSerialPort::new("/dev/fake0");
        let mut buf = [0u8; 8];
        assert_eq!(port.read(&mut buf, 5).unwrap(), 0);
    }

    #[test]
    fn can_socket_round_trip() {
        let socket = FakeCanSocket::new("vcan0");
        let frame = CanFrame::new(0x123, &[1, 2, 3], false).unwrap();
        socket.inject_rx(frame);
        let received = socket.receive().unwrap();
        assert_eq!(received.id(), 0x123);

        socket.send(&frame).unwrap();
        assert_eq!(socket.tx_history().len(), 1);
    }

    #[test]
    fn can_socket_timeout_on_empty_queue() {
        let socket = FakeCanSocket::new("vcan0");
        assert!(matches!(socket.receive(), Err(Error::Timeout)));
    }
}
