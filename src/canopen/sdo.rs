//! CANopen SDO client (CiA 301 expedited transfer only -- no multi-segment
//! download/upload, no block transfer).
//!
//! Frames are exchanged through a [`CanSocket`], the same trait the bridge
//! uses for its SocketCAN side. The client has no opinion on whether that
//! socket talks to a real interface or one fed by a [`crate::bridge::SocketCanBridge`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::canopen::object_dictionary::{ObjectDictionary, RawInt};
use crate::error::Error;
use crate::port::{CanFrame, CanSocket};

mod command {
    pub const INITIATE_DOWNLOAD_REQUEST: u8 = 0x23;
    pub const INITIATE_DOWNLOAD_RESPONSE: u8 = 0x60;
    pub const INITIATE_UPLOAD_REQUEST: u8 = 0x40;
    pub const ABORT: u8 = 0x80;
    pub const UPLOAD_RESPONSE_MASK: u8 = 0x40;
}

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Blocking SDO client addressing a single CANopen node.
pub struct SdoClient {
    socket: Arc<dyn CanSocket>,
    node_id: u8,
}

impl SdoClient {
    pub fn new(socket: Arc<dyn CanSocket>, node_id: u8) -> Self {
        SdoClient { socket, node_id }
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_open()
    }

    fn tx_cob_id(&self) -> u32 {
        0x600 + self.node_id as u32
    }

    fn rx_cob_id(&self) -> u32 {
        0x580 + self.node_id as u32
    }

    /// Write raw bytes to `index`/`subindex` via expedited SDO download.
    pub fn write_object(
        &self,
        index: u16,
        subindex: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), Error> {
        if data.is_empty() || data.len() > 4 {
            return Err(Error::BadDLC(data.len()));
        }

        let n = 4 - data.len() as u8;
        let mut payload = [0u8; 8];
        payload[0] = command::INITIATE_DOWNLOAD_REQUEST | (n << 2);
        payload[1] = (index & 0xFF) as u8;
        payload[2] = (index >> 8) as u8;
        payload[3] = subindex;
        payload[4..4 + data.len()].copy_from_slice(data);

        let frame = CanFrame::new(self.tx_cob_id(), &payload, false)?;
        self.socket.send(&frame)?;

        let response = self.receive_matching(index, subindex, timeout)?;
        if response.data()[0] != command::INITIATE_DOWNLOAD_RESPONSE {
            return Err(Error::CanSdoProtocol(format!(
                "unexpected write response command byte {:#04x}",
                response.data()[0]
            )));
        }
        Ok(())
    }

    /// Read `size` raw bytes from `index`/`subindex` via expedited SDO upload.
    pub fn read_object(
        &self,
        index: u16,
        subindex: u8,
        size: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, Error> {
        let mut payload = [0u8; 8];
        payload[0] = command::INITIATE_UPLOAD_REQUEST;
        payload[1] = (index & 0xFF) as u8;
        payload[2] = (index >> 8) as u8;
        payload[3] = subindex;

        let frame = CanFrame::new(self.tx_cob_id(), &payload, false)?;
        self.socket.send(&frame)?;

        let response = self.receive_matching(index, subindex, timeout)?;
        let cmd = response.data()[0];
        if cmd != command::INITIATE_DOWNLOAD_RESPONSE && (cmd & command::UPLOAD_RESPONSE_MASK) == 0
        {
            return Err(Error::CanSdoProtocol(format!(
                "unexpected read response command byte {:#04x}",
                cmd
            )));
        }

        let data = response.data();
        if data.len() < 4 + size {
            return Err(Error::BadLength(data.len()));
        }
        Ok(data[4..4 + size].to_vec())
    }

    /// Type-safe write: looks `object_name` up in `dictionary` and encodes
    /// `value` per its declared datatype width.
    pub fn write<T: RawInt>(
        &self,
        dictionary: &ObjectDictionary,
        object_name: &str,
        value: T,
    ) -> Result<(), Error> {
        let entry = dictionary.get_object(object_name)?;
        let data = dictionary.to_raw(value);
        self.write_object(entry.index, entry.subindex, &data, DEFAULT_TIMEOUT)
    }

    /// Type-safe read: looks `object_name` up in `dictionary` and decodes
    /// the response per its declared datatype width.
    pub fn read<T: RawInt>(&self, dictionary: &ObjectDictionary, object_name: &str) -> Result<T, Error> {
        let entry = dictionary.get_object(object_name)?;
        let raw = self.read_object(entry.index, entry.subindex, entry.size_bytes(), DEFAULT_TIMEOUT)?;
        dictionary.from_raw(&raw)
    }

    /// Receive frames until one addresses `expected_index`/`expected_subindex`
    /// on our server-to-client COB-ID, or until `timeout` elapses. Frames with
    /// a mismatching COB-ID or index/subindex are silently discarded -- they
    /// belong to some other in-flight exchange or PDO traffic sharing the bus.
    fn receive_matching(
        &self,
        expected_index: u16,
        expected_subindex: u8,
        timeout: Duration,
    ) -> Result<CanFrame, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(Error::SdoTimeout);
            }

            let frame = match self.socket.receive() {
                Ok(frame) => frame,
                Err(Error::Timeout) => continue,
                Err(e) => return Err(e),
            };

            if frame.id() != self.rx_cob_id() {
                continue;
            }

            let data = frame.data();
            if data.is_empty() {
                continue;
            }
            if data[0] == command::ABORT {
                let code = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
                return Err(Error::SdoAbort { code });
            }

            let response_index = u16::from_le_bytes([data[1], data[2]]);
            let response_subindex = data[3];
            if response_index != expected_index || response_subindex != expected_subindex {
                continue;
            }

            return Ok(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::FakeCanSocket;

    fn client_with(socket: FakeCanSocket, node_id: u8) -> (SdoClient, Arc<FakeCanSocket>) {
        let socket = Arc::new(socket);
        (SdoClient::new(socket.clone(), node_id), socket)
    }

    fn write_ack(index: u16, subindex: u8) -> CanFrame {
        let mut data = [0u8; 8];
        data[0] = command::INITIATE_DOWNLOAD_RESPONSE;
        data[1] = (index & 0xFF) as u8;
        data[2] = (index >> 8) as u8;
        data[3] = subindex;
        CanFrame::new(0x580 + 5, &data, false).unwrap()
    }

    fn upload_response(index: u16, subindex: u8, payload: &[u8]) -> CanFrame {
        let mut data = [0u8; 8];
        data[0] = 0x43;
        data[1] = (index & 0xFF) as u8;
        data[2] = (index >> 8) as u8;
        data[3] = subindex;
        data[4..4 + payload.len()].copy_from_slice(payload);
        CanFrame::new(0x580 + 5, &data, false).unwrap()
    }

    #[test]
    fn write_object_sends_expected_frame_and_succeeds_on_ack() {
        let (client, socket) = client_with(FakeCanSocket::new("vcan0"), 5);
        socket.inject_rx(write_ack(0x6040, 0));

        client
            .write_object(0x6040, 0, &[0x0F, 0x00], Duration::from_millis(100))
            .unwrap();

        let sent = socket.tx_history();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id(), 0x605);
        assert_eq!(sent[0].data()[0], 0x23 | (2 << 2));
        assert_eq!(sent[0].data()[1], 0x40);
        assert_eq!(sent[0].data()[2], 0x60);
    }

    #[test]
    fn read_object_extracts_payload() {
        let (client, socket) = client_with(FakeCanSocket::new("vcan0"), 5);
        socket.inject_rx(upload_response(0x6041, 0, &[0xAB, 0x12]));

        let data = client
            .read_object(0x6041, 0, 2, Duration::from_millis(100))
            .unwrap();
        assert_eq!(data, vec![0xAB, 0x12]);
    }

    #[test]
    fn abort_frame_surfaces_as_sdo_abort_error() {
        let (client, socket) = client_with(FakeCanSocket::new("vcan0"), 5);
        let mut data = [0u8; 8];
        data[0] = command::ABORT;
        data[1] = 0x40;
        data[2] = 0x60;
        data[4..8].copy_from_slice(&0x0602_0000u32.to_le_bytes());
        socket.inject_rx(CanFrame::new(0x585, &data, false).unwrap());

        let err = client
            .write_object(0x6040, 0, &[1], Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, Error::SdoAbort { code: 0x0602_0000 }));
    }

    #[test]
    fn mismatched_index_is_ignored_until_timeout() {
        let (client, socket) = client_with(FakeCanSocket::new("vcan0"), 5);
        socket.inject_rx(write_ack(0x1234, 0));

        let err = client
            .write_object(0x6040, 0, &[1], Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, Error::SdoTimeout));
    }

    #[test]
    fn typed_write_and_read_round_trip_through_dictionary() {
        const JSON: &str = r#"{
            "node_id": 5,
            "objects": {
                "controlword": { "index": "0x6040", "subindex": 0, "datatype": "uint16_t", "access": "rw" }
            }
        }"#;
        let dict = crate::canopen::object_dictionary::ObjectDictionary::from_json_str(JSON).unwrap();
        let (client, socket) = client_with(FakeCanSocket::new("vcan0"), 5);
        socket.inject_rx(write_ack(0x6040, 0));
        client.write::<u16>(&dict, "controlword", 0x0Fu16).unwrap();

        socket.inject_rx(upload_response(0x6040, 0, &6u16.to_le_bytes()));
        let value: u16 = client.read(&dict, "controlword").unwrap();
        assert_eq!(value, 6);
    }
}
