//! Bidirectional forwarding between a SocketCAN interface and the Waveshare
//! adapter: one thread per direction, independent of each other and of the
//! USB adapter's internal read/write locks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::adapter::UsbAdapter;
use crate::codec;
use crate::config::BridgeConfig;
use crate::error::Error;
use crate::frame::{ConfigFrame, FrameBuilder};
use crate::port::CanSocket;
use crate::protocol::{CANVersion, RTX};

/// Highest identifier that fits an 11-bit standard CAN ID. A filter or mask
/// above this forces `CANVersion::ExtFixed` so the adapter doesn't truncate it.
const STD_ID_MAX: u32 = 0x7FF;

type UsbToCanCallback = dyn Fn(&crate::frame::VariableFrame, &crate::port::CanFrame) + Send + Sync;
type CanToUsbCallback = dyn Fn(&crate::port::CanFrame, &crate::frame::VariableFrame) + Send + Sync;

/// Atomic frame/error counters, incremented from either forwarding thread.
#[derive(Default)]
pub struct Statistics {
    pub usb_rx_frames: AtomicU64,
    pub usb_tx_frames: AtomicU64,
    pub socketcan_rx_frames: AtomicU64,
    pub socketcan_tx_frames: AtomicU64,
    pub usb_rx_errors: AtomicU64,
    pub usb_tx_errors: AtomicU64,
    pub socketcan_rx_errors: AtomicU64,
    pub socketcan_tx_errors: AtomicU64,
    pub conversion_errors: AtomicU64,
}

impl Statistics {
    pub fn reset(&self) {
        self.usb_rx_frames.store(0, Ordering::Relaxed);
        self.usb_tx_frames.store(0, Ordering::Relaxed);
        self.socketcan_rx_frames.store(0, Ordering::Relaxed);
        self.socketcan_tx_frames.store(0, Ordering::Relaxed);
        self.usb_rx_errors.store(0, Ordering::Relaxed);
        self.usb_tx_errors.store(0, Ordering::Relaxed);
        self.socketcan_rx_errors.store(0, Ordering::Relaxed);
        self.socketcan_tx_errors.store(0, Ordering::Relaxed);
        self.conversion_errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            usb_rx_frames: self.usb_rx_frames.load(Ordering::Relaxed),
            usb_tx_frames: self.usb_tx_frames.load(Ordering::Relaxed),
            socketcan_rx_frames: self.socketcan_rx_frames.load(Ordering::Relaxed),
            socketcan_tx_frames: self.socketcan_tx_frames.load(Ordering::Relaxed),
            usb_rx_errors: self.usb_rx_errors.load(Ordering::Relaxed),
            usb_tx_errors: self.usb_tx_errors.load(Ordering::Relaxed),
            socketcan_rx_errors: self.socketcan_rx_errors.load(Ordering::Relaxed),
            socketcan_tx_errors: self.socketcan_tx_errors.load(Ordering::Relaxed),
            conversion_errors: self.conversion_errors.load(Ordering::Relaxed),
        }
    }
}

/// Non-atomic copy of [`Statistics`], for callers that just want to read it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub usb_rx_frames: u64,
    pub usb_tx_frames: u64,
    pub socketcan_rx_frames: u64,
    pub socketcan_tx_frames: u64,
    pub usb_rx_errors: u64,
    pub usb_tx_errors: u64,
    pub socketcan_rx_errors: u64,
    pub socketcan_tx_errors: u64,
    pub conversion_errors: u64,
}

/// Bridges a [`CanSocket`] and a [`UsbAdapter`]: `start()` spawns one thread
/// per direction, both polling with the read timeouts configured on the
/// underlying port/socket so they notice `stop()` promptly without a
/// separate wakeup mechanism.
pub struct SocketCanBridge {
    can_socket: Arc<dyn CanSocket>,
    adapter: Arc<UsbAdapter>,
    usb_read_timeout_ms: u64,
    stats: Arc<Statistics>,
    running: Arc<AtomicBool>,
    usb_to_can_thread: Mutex<Option<JoinHandle<()>>>,
    can_to_usb_thread: Mutex<Option<JoinHandle<()>>>,
    usb_to_can_callback: Mutex<Option<Arc<UsbToCanCallback>>>,
    can_to_usb_callback: Mutex<Option<Arc<CanToUsbCallback>>>,
}

impl SocketCanBridge {
    /// Builds the bridge and configures the adapter: sends a `ConfigFrame`
    /// derived from `config`'s baud/mode/auto-retransmit/filter/mask before
    /// either forwarding thread exists. A filter or mask that doesn't fit in
    /// 11 bits selects `CANVersion::ExtFixed`; otherwise `StdFixed`. Failure
    /// to send or acknowledge that frame aborts construction with
    /// `Error::DeviceConfigError` -- the bridge never runs unconfigured.
    pub fn new(
        can_socket: Arc<dyn CanSocket>,
        adapter: Arc<UsbAdapter>,
        config: &BridgeConfig,
    ) -> Result<Self, Error> {
        let can_version = if config.filter_id > STD_ID_MAX || config.filter_mask > STD_ID_MAX {
            CANVersion::ExtFixed
        } else {
            CANVersion::StdFixed
        };
        let auto_rtx = if config.auto_retransmit { RTX::Auto } else { RTX::Off };

        let config_frame: ConfigFrame = FrameBuilder::<ConfigFrame>::new()
            .with_can_version(can_version)
            .with_baud_rate(config.can_baud_rate)
            .with_can_mode(config.can_mode)
            .with_auto_rtx(auto_rtx)
            .with_filter(config.filter_id)
            .with_mask(config.filter_mask)
            .build()
            .map_err(|e| Error::DeviceConfigError(e.to_string()))?;

        adapter
            .send_frame(&config_frame)
            .map_err(|e| Error::DeviceConfigError(e.to_string()))?;

        Ok(SocketCanBridge {
            can_socket,
            adapter,
            usb_read_timeout_ms: config.usb_read_timeout_ms as u64,
            stats: Arc::new(Statistics::default()),
            running: Arc::new(AtomicBool::new(false)),
            usb_to_can_thread: Mutex::new(None),
            can_to_usb_thread: Mutex::new(None),
            usb_to_can_callback: Mutex::new(None),
            can_to_usb_callback: Mutex::new(None),
        })
    }

    pub fn is_usb_open(&self) -> bool {
        self.adapter.is_open()
    }

    pub fn is_socketcan_open(&self) -> bool {
        self.can_socket.is_open()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.stats.reset();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn set_usb_to_socketcan_callback<F>(&self, callback: F)
    where
        F: Fn(&crate::frame::VariableFrame, &crate::port::CanFrame) + Send + Sync + 'static,
    {
        *self.usb_to_can_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    pub fn set_socketcan_to_usb_callback<F>(&self, callback: F)
    where
        F: Fn(&crate::port::CanFrame, &crate::frame::VariableFrame) + Send + Sync + 'static,
    {
        *self.can_to_usb_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Spawn the two forwarding threads. Errors if the bridge is already running.
    pub fn start(&self) -> Result<(), Error> {
        if self
            .running
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return Err(Error::ConfigError("bridge is already running".to_string()));
        }

        let adapter = self.adapter.clone();
        let can_socket = self.can_socket.clone();
        let stats = self.stats.clone();
        let running = self.running.clone();
        let timeout_ms = self.usb_read_timeout_ms;
        let callback = self.usb_to_can_callback.lock().unwrap().clone();
        *self.usb_to_can_thread.lock().unwrap() = Some(std::thread::spawn(move || {
            usb_to_socketcan_loop(&adapter, can_socket.as_ref(), &stats, &running, timeout_ms, callback);
        }));

        let adapter = self.adapter.clone();
        let can_socket = self.can_socket.clone();
        let stats = self.stats.clone();
        let running = self.running.clone();
        let callback = self.can_to_usb_callback.lock().unwrap().clone();
        *self.can_to_usb_thread.lock().unwrap() = Some(std::thread::spawn(move || {
            socketcan_to_usb_loop(can_socket.as_ref(), &adapter, &stats, &running, callback);
        }));

        Ok(())
    }

    /// Signal both forwarding threads to stop and block until they join.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        if let Some(handle) = self.usb_to_can_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.can_to_usb_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SocketCanBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

fn usb_to_socketcan_loop(
    adapter: &UsbAdapter,
    can_socket: &dyn CanSocket,
    stats: &Statistics,
    running: &AtomicBool,
    timeout_ms: u64,
    callback: Option<Arc<UsbToCanCallback>>,
) {
    while running.load(Ordering::Relaxed) {
        let frame = match adapter.receive_variable_frame(timeout_ms) {
            Ok(frame) => frame,
            Err(Error::Timeout) => continue,
            Err(e) => {
                stats.usb_rx_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("[USB->CAN] USB rx error: {}", e);
                continue;
            }
        };
        stats.usb_rx_frames.fetch_add(1, Ordering::Relaxed);

        let cf = match codec::to_can_frame(&frame) {
            Ok(cf) => cf,
            Err(e) => {
                stats.conversion_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("[USB->CAN] conversion error: {}", e);
                continue;
            }
        };

        match can_socket.send(&cf) {
            Ok(()) => {
                stats.socketcan_tx_frames.fetch_add(1, Ordering::Relaxed);
                if let Some(cb) = &callback {
                    cb(&frame, &cf);
                }
            }
            Err(e) => {
                stats.socketcan_tx_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("[USB->CAN] socket write error: {}", e);
            }
        }
    }
}

fn socketcan_to_usb_loop(
    can_socket: &dyn CanSocket,
    adapter: &UsbAdapter,
    stats: &Statistics,
    running: &AtomicBool,
    callback: Option<Arc<CanToUsbCallback>>,
) {
    while running.load(Ordering::Relaxed) {
        let cf = match can_socket.receive() {
            Ok(cf) => cf,
            Err(Error::Timeout) => continue,
            Err(e) => {
                stats.socketcan_rx_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("[CAN->USB] socket read error: {}", e);
                continue;
            }
        };
        stats.socketcan_rx_frames.fetch_add(1, Ordering::Relaxed);

        let frame = match codec::from_can_frame(&cf) {
            Ok(frame) => frame,
            Err(e) => {
                stats.conversion_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("[CAN->USB] conversion error: {}", e);
                continue;
            }
        };

        match adapter.send_frame(&frame) {
            Ok(()) => {
                stats.usb_tx_frames.fetch_add(1, Ordering::Relaxed);
                if let Some(cb) = &callback {
                    cb(&cf, &frame);
                }
            }
            Err(e) => {
                stats.usb_tx_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("[CAN->USB] USB tx error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameBuilder, VariableFrame, WireFrame};
    use crate::port::{FakeCanSocket, FakeSerialPort};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn test_config() -> BridgeConfig {
        BridgeConfig {
            usb_read_timeout_ms: 20,
            socketcan_read_timeout_ms: 20,
            ..BridgeConfig::default()
        }
    }

    #[test]
    fn forwards_usb_frame_to_socketcan() {
        let serial = Arc::new(FakeSerialPort::new("/dev/fake0"));
        let adapter = Arc::new(UsbAdapter::new(serial.clone()));
        let can_socket: Arc<dyn CanSocket> = Arc::new(FakeCanSocket::new("vcan0"));

        let frame = FrameBuilder::<VariableFrame>::new()
            .with_id(0x100)
            .with_data(vec![1, 2, 3])
            .build()
            .unwrap();
        serial.inject_rx(frame.serialize());

        let config = test_config();
        let bridge = SocketCanBridge::new(can_socket.clone(), adapter, &config).unwrap();
        bridge.start().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        bridge.stop();

        let stats = bridge.statistics();
        assert_eq!(stats.usb_rx_frames, 1);
        assert_eq!(stats.socketcan_tx_frames, 1);

        // first write on the serial port is the construction-time ConfigFrame
        assert_eq!(serial.tx_history()[0].len(), 20);
    }

    #[test]
    fn invokes_callback_on_forward() {
        let serial = Arc::new(FakeSerialPort::new("/dev/fake0"));
        let adapter = Arc::new(UsbAdapter::new(serial.clone()));
        let can_socket: Arc<dyn CanSocket> = Arc::new(FakeCanSocket::new("vcan0"));

        let frame = FrameBuilder::<VariableFrame>::new()
            .with_id(0x200)
            .with_data(vec![9])
            .build()
            .unwrap();
        serial.inject_rx(frame.serialize());

        let config = test_config();
        let bridge = SocketCanBridge::new(can_socket, adapter, &config).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        bridge.set_usb_to_socketcan_callback(move |_, _| {
            calls_clone.fetch_add(1, Ordering::Relaxed);
        });

        bridge.start().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        bridge.stop();

        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn start_twice_is_an_error() {
        let serial = Arc::new(FakeSerialPort::new("/dev/fake0"));
        let adapter = Arc::new(UsbAdapter::new(serial));
        let can_socket: Arc<dyn CanSocket> = Arc::new(FakeCanSocket::new("vcan0"));
        let config = test_config();
        let bridge = SocketCanBridge::new(can_socket, adapter, &config).unwrap();
        bridge.start().unwrap();
        assert!(bridge.start().is_err());
        bridge.stop();
    }
}
