//! CANopen PDO manager: one background receive thread demultiplexing TPDO
//! traffic to per-node callbacks, plus a send path for RPDOs on the same
//! shared [`CanSocket`].
//!
//! Mirrors the shape of [`crate::bridge::SocketCanBridge`] -- a `running`
//! atomic, a joined background thread, and atomic counters -- but with one
//! thread instead of two, since PDO traffic is receive-demux on one side and
//! caller-driven send on the other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::port::{CanFrame, CanSocket};

const RPDO1_BASE: u32 = 0x200;
const RPDO2_BASE: u32 = 0x300;
const TPDO1_BASE: u32 = 0x180;
const TPDO2_BASE: u32 = 0x280;
const SYNC_COB_ID: u32 = 0x080;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum TpdoSlot {
    Tpdo1,
    Tpdo2,
}

type TpdoCallback = dyn Fn(&CanFrame) + Send + Sync;

#[derive(Default)]
struct NodeStatistics {
    rpdo1_sent: AtomicU64,
    rpdo2_sent: AtomicU64,
    errors: AtomicU64,
    total_latency_us: AtomicU64,
    last_tpdo1_time: Mutex<Option<Instant>>,
    last_tpdo2_time: Mutex<Option<Instant>>,
}

impl NodeStatistics {
    fn reset(&self) {
        self.rpdo1_sent.store(0, Ordering::Relaxed);
        self.rpdo2_sent.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.total_latency_us.store(0, Ordering::Relaxed);
        *self.last_tpdo1_time.lock().unwrap() = None;
        *self.last_tpdo2_time.lock().unwrap() = None;
    }

    fn snapshot(&self) -> PdoStatisticsSnapshot {
        PdoStatisticsSnapshot {
            rpdo1_sent: self.rpdo1_sent.load(Ordering::Relaxed),
            rpdo2_sent: self.rpdo2_sent.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_latency_us: self.total_latency_us.load(Ordering::Relaxed),
            last_tpdo1_time: *self.last_tpdo1_time.lock().unwrap(),
            last_tpdo2_time: *self.last_tpdo2_time.lock().unwrap(),
        }
    }
}

/// Non-atomic copy of a node's PDO counters, safe to hold and compare.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdoStatisticsSnapshot {
    pub rpdo1_sent: u64,
    pub rpdo2_sent: u64,
    pub errors: u64,
    pub total_latency_us: u64,
    pub last_tpdo1_time: Option<Instant>,
    pub last_tpdo2_time: Option<Instant>,
}

struct Registry {
    callbacks: HashMap<(TpdoSlot, u8), Arc<TpdoCallback>>,
    node_stats: HashMap<u8, Arc<NodeStatistics>>,
}

impl Registry {
    fn new() -> Self {
        Registry {
            callbacks: HashMap::new(),
            node_stats: HashMap::new(),
        }
    }

    fn stats_for(&mut self, node_id: u8) -> Arc<NodeStatistics> {
        self.node_stats
            .entry(node_id)
            .or_insert_with(|| Arc::new(NodeStatistics::default()))
            .clone()
    }
}

/// Owns a single CAN socket and one background receive thread. Demultiplexes
/// incoming TPDO1/TPDO2 frames to per-node callbacks; serializes RPDO1/RPDO2
/// sends through the caller's thread onto the same socket.
pub struct PdoManager {
    socket: Arc<dyn CanSocket>,
    running: Arc<AtomicBool>,
    receive_thread: Mutex<Option<JoinHandle<()>>>,
    registry: Arc<Mutex<Registry>>,
    generic_errors: Arc<AtomicU64>,
}

impl PdoManager {
    pub fn new(socket: Arc<dyn CanSocket>) -> Self {
        PdoManager {
            socket,
            running: Arc::new(AtomicBool::new(false)),
            receive_thread: Mutex::new(None),
            registry: Arc::new(Mutex::new(Registry::new())),
            generic_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Spawns the receive thread. Returns `false` (not an error) if already running.
    pub fn start(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        let socket = self.socket.clone();
        let running = self.running.clone();
        let registry = self.registry.clone();
        let generic_errors = self.generic_errors.clone();
        *self.receive_thread.lock().unwrap() = Some(std::thread::spawn(move || {
            receive_loop(socket.as_ref(), &running, &registry, &generic_errors);
        }));
        true
    }

    /// Clears the running flag, joins the receive thread, and closes the socket.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        if let Some(handle) = self.receive_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.socket.close();
    }

    pub fn register_tpdo1_callback<F>(&self, node_id: u8, callback: F)
    where
        F: Fn(&CanFrame) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap();
        registry.stats_for(node_id);
        registry
            .callbacks
            .insert((TpdoSlot::Tpdo1, node_id), Arc::new(callback));
    }

    pub fn register_tpdo2_callback<F>(&self, node_id: u8, callback: F)
    where
        F: Fn(&CanFrame) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap();
        registry.stats_for(node_id);
        registry
            .callbacks
            .insert((TpdoSlot::Tpdo2, node_id), Arc::new(callback));
    }

    pub fn unregister_callbacks(&self, node_id: u8) {
        let mut registry = self.registry.lock().unwrap();
        registry.callbacks.remove(&(TpdoSlot::Tpdo1, node_id));
        registry.callbacks.remove(&(TpdoSlot::Tpdo2, node_id));
    }

    fn send_rpdo(&self, node_id: u8, base: u32, bytes: &[u8], slot: TpdoSlot) -> Result<(), Error> {
        if bytes.len() > 8 {
            return Err(Error::BadDLC(bytes.len()));
        }
        let frame = CanFrame::new(base + node_id as u32, bytes, false)?;

        let stats = self.registry.lock().unwrap().stats_for(node_id);
        let started = Instant::now();
        match self.socket.send(&frame) {
            Ok(()) => {
                let elapsed_us = started.elapsed().as_micros() as u64;
                match slot {
                    TpdoSlot::Tpdo1 => stats.rpdo1_sent.fetch_add(1, Ordering::Relaxed),
                    TpdoSlot::Tpdo2 => stats.rpdo2_sent.fetch_add(1, Ordering::Relaxed),
                };
                stats.total_latency_us.fetch_add(elapsed_us, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub fn send_rpdo1(&self, node_id: u8, bytes: &[u8]) -> Result<(), Error> {
        self.send_rpdo(node_id, RPDO1_BASE, bytes, TpdoSlot::Tpdo1)
    }

    pub fn send_rpdo2(&self, node_id: u8, bytes: &[u8]) -> Result<(), Error> {
        self.send_rpdo(node_id, RPDO2_BASE, bytes, TpdoSlot::Tpdo2)
    }

    pub fn get_statistics(&self, node_id: u8) -> PdoStatisticsSnapshot {
        self.registry.lock().unwrap().stats_for(node_id).snapshot()
    }

    pub fn reset_statistics(&self, node_id: u8) {
        self.registry.lock().unwrap().stats_for(node_id).reset();
    }

    pub fn generic_errors(&self) -> u64 {
        self.generic_errors.load(Ordering::Relaxed)
    }
}

impl Drop for PdoManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    socket: &dyn CanSocket,
    running: &AtomicBool,
    registry: &Mutex<Registry>,
    generic_errors: &AtomicU64,
) {
    while running.load(Ordering::Relaxed) {
        let frame = match socket.receive() {
            Ok(frame) => frame,
            Err(Error::Timeout) => continue,
            Err(e) => {
                generic_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("[PDO] receive error: {}", e);
                continue;
            }
        };

        let id = frame.id();
        if id == SYNC_COB_ID {
            continue;
        }

        let (slot, node_id) = if id >= TPDO1_BASE && id < TPDO1_BASE + 0x80 {
            (TpdoSlot::Tpdo1, (id - TPDO1_BASE) as u8)
        } else if id >= TPDO2_BASE && id < TPDO2_BASE + 0x80 {
            (TpdoSlot::Tpdo2, (id - TPDO2_BASE) as u8)
        } else {
            continue;
        };

        let (callback, stats) = {
            let mut reg = registry.lock().unwrap();
            let stats = reg.stats_for(node_id);
            (reg.callbacks.get(&(slot, node_id)).cloned(), stats)
        };

        let now = Instant::now();
        match slot {
            TpdoSlot::Tpdo1 => *stats.last_tpdo1_time.lock().unwrap() = Some(now),
            TpdoSlot::Tpdo2 => *stats.last_tpdo2_time.lock().unwrap() = Some(now),
        }

        if let Some(cb) = callback {
            cb(&frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::FakeCanSocket;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    #[test]
    fn dispatches_tpdo1_to_registered_node_callback() {
        let socket = Arc::new(FakeCanSocket::new("vcan0"));
        let frame = CanFrame::new(TPDO1_BASE + 5, &[1, 2, 3], false).unwrap();
        socket.inject_rx(frame);

        let manager = PdoManager::new(socket);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        manager.register_tpdo1_callback(5, move |_frame| {
            hits_clone.fetch_add(1, Ordering::Relaxed);
        });

        assert!(manager.start());
        std::thread::sleep(StdDuration::from_millis(100));
        manager.stop();

        assert_eq!(hits.load(Ordering::Relaxed), 1);
        let stats = manager.get_statistics(5);
        assert!(stats.last_tpdo1_time.is_some());
    }

    #[test]
    fn send_rpdo1_builds_expected_frame_and_counts() {
        let socket = Arc::new(FakeCanSocket::new("vcan0"));
        let manager = PdoManager::new(socket.clone());
        manager.send_rpdo1(7, &[9, 9]).unwrap();

        let sent = socket.tx_history();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id(), RPDO1_BASE + 7);
        assert_eq!(sent[0].data(), &[9, 9]);

        let stats = manager.get_statistics(7);
        assert_eq!(stats.rpdo1_sent, 1);
    }

    #[test]
    fn unregister_removes_both_tpdo_slots() {
        let socket = Arc::new(FakeCanSocket::new("vcan0"));
        let manager = PdoManager::new(socket);
        manager.register_tpdo1_callback(3, |_| {});
        manager.register_tpdo2_callback(3, |_| {});
        manager.unregister_callbacks(3);

        let registry = manager.registry.lock().unwrap();
        assert!(!registry.callbacks.contains_key(&(TpdoSlot::Tpdo1, 3)));
        assert!(!registry.callbacks.contains_key(&(TpdoSlot::Tpdo2, 3)));
    }

    #[test]
    fn sync_frame_is_ignored() {
        let socket = Arc::new(FakeCanSocket::new("vcan0"));
        socket.inject_rx(CanFrame::new(SYNC_COB_ID, &[], false).unwrap());
        let manager = PdoManager::new(socket);
        assert!(manager.start());
        std::thread::sleep(StdDuration::from_millis(60));
        manager.stop();
        assert_eq!(manager.generic_errors(), 0);
    }

    #[test]
    fn start_twice_returns_false() {
        let socket = Arc::new(FakeCanSocket::new("vcan0"));
        let manager = PdoManager::new(socket);
        assert!(manager.start());
        assert!(!manager.start());
        manager.stop();
    }

    #[test]
    fn reset_statistics_zeroes_counters() {
        let socket = Arc::new(FakeCanSocket::new("vcan0"));
        let manager = PdoManager::new(socket);
        manager.send_rpdo2(1, &[1]).unwrap();
        assert_eq!(manager.get_statistics(1).rpdo2_sent, 1);
        manager.reset_statistics(1);
        assert_eq!(manager.get_statistics(1).rpdo2_sent, 0);
    }
}
