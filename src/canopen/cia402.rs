//! CiA 402 drive state machine: statusword decode, controlword commands, and
//! a shortest-path transition planner driving a servo through
//! Switch-On-Disabled -> Operation-Enabled and back.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::canopen::object_dictionary::ObjectDictionary;
use crate::canopen::sdo::SdoClient;
use crate::error::Error;

/// Bits 0-3, 5 and 6 of the statusword low byte -- the subset the CiA 402
/// state table is defined over. Bit 7 (warning) and bit 10 (target reached)
/// carry independent meaning and are read separately.
const STATE_MASK: u16 = 0b0110_1111;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DriveState {
    NotReadyToSwitchOn,
    SwitchOnDisabled,
    ReadyToSwitchOn,
    SwitchedOn,
    OperationEnabled,
    QuickStopActive,
    FaultReactionActive,
    Fault,
    Unknown,
}

pub mod controlword {
    pub const SHUTDOWN: u16 = 0x0006;
    pub const SWITCH_ON: u16 = 0x0007;
    pub const ENABLE_OPERATION: u16 = 0x000F;
    pub const DISABLE_VOLTAGE: u16 = 0x0000;
    pub const QUICK_STOP: u16 = 0x0002;
    pub const DISABLE_OPERATION: u16 = 0x0007;
    /// Bit 7 must transition low-to-high on the wire; callers writing this
    /// constant directly only get the high half of that edge (see
    /// [`super::Cia402StateMachine::reset_fault`]).
    pub const FAULT_RESET: u16 = 0x0080;
}

/// Maps a raw 16-bit statusword to a [`DriveState`] via the CiA 402 table.
/// Never panics -- an unrecognized pattern maps to `Unknown`.
pub fn decode_state(statusword: u16) -> DriveState {
    match (statusword as u8) & (STATE_MASK as u8) {
        0b0000_0000 => DriveState::NotReadyToSwitchOn,
        0b0100_0000 => DriveState::SwitchOnDisabled,
        0b0010_0001 => DriveState::ReadyToSwitchOn,
        0b0010_0011 => DriveState::SwitchedOn,
        0b0010_0111 => DriveState::OperationEnabled,
        0b0000_0111 => DriveState::QuickStopActive,
        0b0000_1111 => DriveState::FaultReactionActive,
        0b0000_1000 => DriveState::Fault,
        _ => DriveState::Unknown,
    }
}

fn adjacency() -> &'static [(DriveState, DriveState, u16)] {
    use DriveState::*;
    &[
        (SwitchOnDisabled, ReadyToSwitchOn, controlword::SHUTDOWN),
        (ReadyToSwitchOn, SwitchedOn, controlword::SWITCH_ON),
        (SwitchedOn, OperationEnabled, controlword::ENABLE_OPERATION),
        (OperationEnabled, ReadyToSwitchOn, controlword::SHUTDOWN),
        (NotReadyToSwitchOn, SwitchOnDisabled, controlword::DISABLE_VOLTAGE),
        (ReadyToSwitchOn, SwitchOnDisabled, controlword::DISABLE_VOLTAGE),
        (SwitchedOn, SwitchOnDisabled, controlword::DISABLE_VOLTAGE),
        (OperationEnabled, SwitchOnDisabled, controlword::DISABLE_VOLTAGE),
        (QuickStopActive, SwitchOnDisabled, controlword::DISABLE_VOLTAGE),
        (Fault, SwitchOnDisabled, controlword::FAULT_RESET),
    ]
}

/// Breadth-first shortest path from `from` to `target` over the CiA 402
/// adjacency graph. Returns the ordered list of `(next_state, controlword)`
/// steps, or `None` if `target` is unreachable from `from`.
fn shortest_path(from: DriveState, target: DriveState) -> Option<Vec<(DriveState, u16)>> {
    if from == target {
        return Some(Vec::new());
    }

    let mut queue = VecDeque::new();
    let mut came_from: Vec<(DriveState, DriveState, u16)> = Vec::new();
    let mut visited = vec![from];
    queue.push_back(from);

    while let Some(state) = queue.pop_front() {
        for &(src, dst, cw) in adjacency() {
            if src != state || visited.contains(&dst) {
                continue;
            }
            visited.push(dst);
            came_from.push((dst, state, cw));
            if dst == target {
                return Some(reconstruct(&came_from, from, target));
            }
            queue.push_back(dst);
        }
    }
    None
}

fn reconstruct(
    came_from: &[(DriveState, DriveState, u16)],
    from: DriveState,
    target: DriveState,
) -> Vec<(DriveState, u16)> {
    let mut path = Vec::new();
    let mut current = target;
    while current != from {
        let (dst, src, cw) = came_from
            .iter()
            .rev()
            .find(|(dst, _, _)| *dst == current)
            .copied()
            .expect("reconstruct: path must exist for states discovered by BFS");
        path.push((dst, cw));
        current = src;
    }
    path.reverse();
    path
}

const DEFAULT_STATE_TIMEOUT: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
const POLL_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Drives a single CANopen node through the CiA 402 state machine over SDO.
pub struct Cia402StateMachine {
    sdo: Arc<SdoClient>,
    dictionary: Arc<ObjectDictionary>,
    cached_statusword: Mutex<Option<u16>>,
    state_timeout: Mutex<Duration>,
}

impl Cia402StateMachine {
    pub fn new(sdo: Arc<SdoClient>, dictionary: Arc<ObjectDictionary>) -> Self {
        Cia402StateMachine {
            sdo,
            dictionary,
            cached_statusword: Mutex::new(None),
            state_timeout: Mutex::new(DEFAULT_STATE_TIMEOUT),
        }
    }

    pub fn set_state_timeout(&self, timeout: Duration) {
        *self.state_timeout.lock().unwrap() = timeout;
    }

    pub fn get_state_timeout(&self) -> Duration {
        *self.state_timeout.lock().unwrap()
    }

    /// Reads `statusword`'s index/subindex from the dictionary and fetches
    /// it over SDO with `timeout`, caching the result.
    fn read_statusword(&self, timeout: Duration) -> Result<u16, Error> {
        let entry = self.dictionary.get_object("statusword")?;
        let raw = self
            .sdo
            .read_object(entry.index, entry.subindex, entry.size_bytes(), timeout)?;
        let sw: u16 = self.dictionary.from_raw(&raw)?;
        *self.cached_statusword.lock().unwrap() = Some(sw);
        Ok(sw)
    }

    /// Reads the statusword, bypassing the cache unless `force_update` is
    /// `false` and a cached value is present.
    pub fn get_statusword(&self, force_update: bool) -> Result<u16, Error> {
        if !force_update {
            if let Some(sw) = *self.cached_statusword.lock().unwrap() {
                return Ok(sw);
            }
        }
        self.read_statusword(DEFAULT_READ_TIMEOUT)
    }

    pub fn get_current_state(&self, force_update: bool) -> Result<DriveState, Error> {
        Ok(decode_state(self.get_statusword(force_update)?))
    }

    pub fn has_fault(&self) -> Result<bool, Error> {
        Ok(self.get_statusword(true)? & (1 << 3) != 0)
    }

    pub fn has_warning(&self) -> Result<bool, Error> {
        Ok(self.get_statusword(true)? & (1 << 7) != 0)
    }

    pub fn target_reached(&self) -> Result<bool, Error> {
        Ok(self.get_statusword(true)? & (1 << 10) != 0)
    }

    pub fn voltage_enabled(&self) -> Result<bool, Error> {
        Ok(self.get_statusword(true)? & (1 << 4) != 0)
    }

    pub fn is_operational(&self) -> Result<bool, Error> {
        Ok(self.get_current_state(true)? == DriveState::OperationEnabled)
    }

    fn write_controlword(&self, value: u16) -> Result<(), Error> {
        self.sdo.write::<u16>(&self.dictionary, "controlword", value)
    }

    /// Writes `controlword`, then polls the statusword every 10 ms until it
    /// decodes to `target` or `state_timeout` elapses. Aborts early with
    /// [`Error::CanNmtError`] if the drive reports a fault, unless
    /// `tolerate_fault` is set (used while clearing a fault via
    /// `FAULT_RESET`, where `Fault` is the expected starting state).
    fn execute_step(
        &self,
        controlword_value: u16,
        target: DriveState,
        tolerate_fault: bool,
    ) -> Result<(), Error> {
        self.write_controlword(controlword_value)?;

        let deadline = Instant::now() + self.get_state_timeout();
        loop {
            match self.read_statusword(POLL_READ_TIMEOUT) {
                Ok(sw) => {
                    let state = decode_state(sw);
                    if state == target {
                        return Ok(());
                    }
                    if !tolerate_fault && state == DriveState::Fault {
                        return Err(Error::CanNmtError(
                            "drive reported fault during state transition".to_string(),
                        ));
                    }
                }
                Err(Error::SdoTimeout) | Err(Error::Timeout) => {}
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(Error::CanNmtError(format!(
                    "timed out waiting for state {:?}",
                    target
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Computes the shortest path from the current state to `target` and
    /// executes each edge in turn.
    fn transition_to(&self, target: DriveState) -> Result<(), Error> {
        let current = self.get_current_state(true)?;
        let path = shortest_path(current, target).ok_or_else(|| {
            Error::CanNmtError(format!("no known transition from {:?} to {:?}", current, target))
        })?;

        for (next_state, cw) in path {
            let tolerate_fault = cw == controlword::FAULT_RESET;
            self.execute_step(cw, next_state, tolerate_fault)?;
        }
        Ok(())
    }

    pub fn shutdown(&self) -> Result<(), Error> {
        self.execute_step(controlword::SHUTDOWN, DriveState::ReadyToSwitchOn, false)
    }

    pub fn switch_on(&self) -> Result<(), Error> {
        self.execute_step(controlword::SWITCH_ON, DriveState::SwitchedOn, false)
    }

    pub fn disable_operation(&self) -> Result<(), Error> {
        self.execute_step(
            controlword::DISABLE_OPERATION,
            DriveState::ReadyToSwitchOn,
            false,
        )
    }

    pub fn quick_stop(&self) -> Result<(), Error> {
        self.execute_step(controlword::QUICK_STOP, DriveState::QuickStopActive, false)
    }

    /// Fault reset is edge-triggered: the controlword must go low, then
    /// high, for the drive to latch the reset.
    pub fn reset_fault(&self) -> Result<(), Error> {
        self.write_controlword(0x0000)?;
        self.execute_step(
            controlword::FAULT_RESET,
            DriveState::SwitchOnDisabled,
            true,
        )
    }

    /// Drives the node from its current state to `OPERATION_ENABLED` via
    /// the shortest valid CiA 402 transition path.
    pub fn enable_operation(&self) -> Result<(), Error> {
        self.transition_to(DriveState::OperationEnabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{CanFrame, FakeCanSocket};
    use std::thread;

    fn node_dictionary() -> Arc<ObjectDictionary> {
        const JSON: &str = r#"{
            "node_id": 5,
            "objects": {
                "controlword": { "index": "0x6040", "subindex": 0, "datatype": "uint16_t", "access": "rw" },
                "statusword": { "index": "0x6041", "subindex": 0, "datatype": "uint16_t", "access": "ro" }
            }
        }"#;
        Arc::new(ObjectDictionary::from_json_str(JSON).unwrap())
    }

    fn write_ack(index: u16, subindex: u8) -> CanFrame {
        let mut data = [0u8; 8];
        data[0] = 0x60;
        data[1] = (index & 0xFF) as u8;
        data[2] = (index >> 8) as u8;
        data[3] = subindex;
        CanFrame::new(0x580 + 5, &data, false).unwrap()
    }

    fn statusword_response(sw: u16) -> CanFrame {
        let mut data = [0u8; 8];
        data[0] = 0x43;
        data[1] = 0x41;
        data[2] = 0x60;
        data[3] = 0;
        data[4..6].copy_from_slice(&sw.to_le_bytes());
        CanFrame::new(0x580 + 5, &data, false).unwrap()
    }

    #[test]
    fn decode_state_matches_canonical_table() {
        assert_eq!(decode_state(0x0000), DriveState::NotReadyToSwitchOn);
        assert_eq!(decode_state(0x0040), DriveState::SwitchOnDisabled);
        assert_eq!(decode_state(0x0021), DriveState::ReadyToSwitchOn);
        assert_eq!(decode_state(0x0023), DriveState::SwitchedOn);
        assert_eq!(decode_state(0x0637), DriveState::OperationEnabled);
        assert_eq!(decode_state(0x0007), DriveState::QuickStopActive);
        assert_eq!(decode_state(0x000F), DriveState::FaultReactionActive);
        assert_eq!(decode_state(0x0008), DriveState::Fault);
        assert_eq!(decode_state(0x0637 | (1 << 3)), DriveState::Fault);
        assert_eq!(decode_state(0xFFFF & !0x004F), DriveState::Unknown);
    }

    #[test]
    fn has_fault_reads_bit_three_independent_of_state_mask() {
        let socket = Arc::new(FakeCanSocket::new("vcan0"));
        socket.inject_rx(statusword_response(0x0008));
        let sdo = Arc::new(SdoClient::new(socket, 5));
        let fsm = Cia402StateMachine::new(sdo, node_dictionary());
        assert!(fsm.has_fault().unwrap());
    }

    #[test]
    fn get_statusword_caches_until_force_update() {
        let socket = Arc::new(FakeCanSocket::new("vcan0"));
        socket.inject_rx(statusword_response(0x0637));
        let sdo = Arc::new(SdoClient::new(socket.clone(), 5));
        let fsm = Cia402StateMachine::new(sdo, node_dictionary());

        assert_eq!(fsm.get_statusword(true).unwrap(), 0x0637);
        // second call without force_update must not issue another SDO request
        assert_eq!(fsm.get_statusword(false).unwrap(), 0x0637);
        assert_eq!(socket.tx_history().len(), 1);
    }

    #[test]
    fn shutdown_writes_controlword_and_waits_for_ready_to_switch_on() {
        let socket = Arc::new(FakeCanSocket::new("vcan0"));
        socket.inject_rx(write_ack(0x6040, 0));
        socket.inject_rx(statusword_response(0x0021));
        let sdo = Arc::new(SdoClient::new(socket.clone(), 5));
        let fsm = Cia402StateMachine::new(sdo, node_dictionary());

        fsm.shutdown().unwrap();
        let sent = socket.tx_history();
        assert_eq!(sent[0].data()[4..6], 0x0006u16.to_le_bytes());
    }

    #[test]
    fn shutdown_times_out_if_state_never_arrives() {
        let socket = Arc::new(FakeCanSocket::new("vcan0"));
        socket.inject_rx(write_ack(0x6040, 0));
        let sdo = Arc::new(SdoClient::new(socket, 5));
        let fsm = Cia402StateMachine::new(sdo, node_dictionary());
        fsm.set_state_timeout(Duration::from_millis(30));

        let err = fsm.shutdown().unwrap_err();
        assert!(matches!(err, Error::CanNmtError(_)));
    }

    #[test]
    fn enable_operation_plans_three_hop_path_from_switch_on_disabled() {
        let path =
            shortest_path(DriveState::SwitchOnDisabled, DriveState::OperationEnabled).unwrap();
        assert_eq!(
            path,
            vec![
                (DriveState::ReadyToSwitchOn, controlword::SHUTDOWN),
                (DriveState::SwitchedOn, controlword::SWITCH_ON),
                (DriveState::OperationEnabled, controlword::ENABLE_OPERATION),
            ]
        );
    }

    #[test]
    fn fault_reaches_switch_on_disabled_via_fault_reset() {
        let path = shortest_path(DriveState::Fault, DriveState::SwitchOnDisabled).unwrap();
        assert_eq!(path, vec![(DriveState::SwitchOnDisabled, controlword::FAULT_RESET)]);
    }

    #[test]
    fn unreachable_target_returns_none() {
        assert!(shortest_path(DriveState::FaultReactionActive, DriveState::OperationEnabled)
            .is_none());
    }

    #[test]
    fn shutdown_aborts_if_drive_reports_fault_instead_of_target_state() {
        let socket = Arc::new(FakeCanSocket::new("vcan0"));
        socket.inject_rx(write_ack(0x6040, 0));
        socket.inject_rx(statusword_response(0x0008));
        let sdo = Arc::new(SdoClient::new(socket, 5));
        let fsm = Cia402StateMachine::new(sdo, node_dictionary());
        fsm.set_state_timeout(Duration::from_millis(200));

        let err = fsm.shutdown().unwrap_err();
        assert!(matches!(err, Error::CanNmtError(_)));
        thread::yield_now();
    }
}
