use super::{validate_can_id, CoreState, DataState, WireFrame};
use crate::error::Error;
use crate::protocol::{self, constants, CANVersion, Type, VariableFormat};

mod layout {
    pub const START: usize = 0;
    pub const TYPE: usize = 1;
    pub const ID: usize = 2;
}

/// Parses and computes the TYPE byte of a `VariableFrame`:
/// bits 7-6 = `11` marker, bit 5 = extended, bit 4 = remote, bits 3-0 = DLC.
mod type_byte {
    use super::*;

    const BASE_MARKER: u8 = 0b1100_0000;
    const EXTENDED_BIT: u8 = 0b0010_0000;
    const REMOTE_BIT: u8 = 0b0001_0000;
    const DLC_MASK: u8 = 0b0000_1111;

    pub fn compute(can_version: CANVersion, format: VariableFormat, dlc: usize) -> u8 {
        let mut byte = BASE_MARKER;
        if can_version.is_extended() {
            byte |= EXTENDED_BIT;
        }
        debug_assert!(format.bit() == 0 || format.bit() == 1);
        byte |= format.bit() << 4;
        byte |= (dlc as u8) & DLC_MASK;
        byte
    }

    pub fn parse(byte: u8) -> (CANVersion, VariableFormat, usize) {
        let is_extended = byte & EXTENDED_BIT != 0;
        let format = VariableFormat::from_bit((byte & REMOTE_BIT != 0) as u8);
        let dlc = (byte & DLC_MASK) as usize;
        let can_version = if is_extended {
            CANVersion::ExtVariable
        } else {
            CANVersion::StdVariable
        };
        (can_version, format, dlc)
    }

    pub fn is_extended(byte: u8) -> bool {
        byte & EXTENDED_BIT != 0
    }
}

/// 5-to-15-byte frame, no checksum: `START TYPE ID(2|4) DATA(0..=8) END`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableFrame {
    core: CoreState,
    data: DataState<VariableFormat>,
}

impl VariableFrame {
    pub(crate) fn from_parts(core: CoreState, data: DataState<VariableFormat>) -> Self {
        VariableFrame { core, data }
    }

    pub fn can_version(&self) -> CANVersion {
        self.core.can_version
    }

    pub fn format(&self) -> VariableFormat {
        self.data.format
    }

    pub fn can_id(&self) -> u32 {
        self.data.can_id
    }

    pub fn dlc(&self) -> usize {
        self.data.dlc()
    }

    pub fn data(&self) -> &[u8] {
        &self.data.data
    }

    fn id_size(&self) -> usize {
        if self.is_extended() {
            4
        } else {
            2
        }
    }
}

impl WireFrame for VariableFrame {
    fn serialize(&self) -> Vec<u8> {
        let id_size = self.id_size();
        let dlc = self.data.dlc();
        let frame_size = 1 + 1 + id_size + dlc + 1;
        let mut buf = vec![0u8; frame_size];

        buf[layout::START] = constants::START_BYTE;
        buf[layout::TYPE] = type_byte::compute(self.core.can_version, self.data.format, dlc);

        if id_size == 4 {
            buf[layout::ID..layout::ID + 4]
                .copy_from_slice(&protocol::int_to_bytes_le_4(self.data.can_id));
        } else {
            let bytes = protocol::int_to_bytes_le_4(self.data.can_id);
            buf[layout::ID..layout::ID + 2].copy_from_slice(&bytes[..2]);
        }

        let data_offset = layout::ID + id_size;
        buf[data_offset..data_offset + dlc].copy_from_slice(&self.data.data);
        buf[frame_size - 1] = constants::END_BYTE;
        buf
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, Error> {
        if buffer.len() < 5 {
            return Err(Error::BadLength(buffer.len()));
        }
        if buffer.len() > 15 {
            return Err(Error::BadLength(buffer.len()));
        }
        if buffer[0] != constants::START_BYTE {
            return Err(Error::BadStart);
        }
        if buffer[buffer.len() - 1] != constants::END_BYTE {
            return Err(Error::BadEnd);
        }

        let type_byte = buffer[layout::TYPE];
        let (can_version, format, dlc) = type_byte::parse(type_byte);
        if dlc > 8 {
            return Err(Error::BadDLC(dlc));
        }

        let id_size = if type_byte::is_extended(type_byte) { 4 } else { 2 };
        let data_offset = layout::ID + id_size;
        let expected_size = 1 + 1 + id_size + dlc + 1;
        if buffer.len() != expected_size {
            return Err(Error::BadLength(buffer.len()));
        }

        let can_id = protocol::bytes_to_int_le(&buffer[layout::ID..layout::ID + id_size])?;
        validate_can_id(can_id, can_version.is_extended())?;

        let data = buffer[data_offset..data_offset + dlc].to_vec();

        Ok(VariableFrame {
            core: CoreState {
                can_version,
                frame_type: Type::DataVariable,
            },
            data: DataState {
                format,
                can_id,
                data,
            },
        })
    }

    fn serialized_size(&self) -> usize {
        1 + 1 + self.id_size() + self.data.dlc() + 1
    }

    fn is_extended(&self) -> bool {
        self.core.can_version.is_extended()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameBuilder;

    #[test]
    fn s3_standard_8_bytes() {
        let frame = FrameBuilder::<VariableFrame>::new()
            .with_can_version(CANVersion::StdVariable)
            .with_format(VariableFormat::Data)
            .with_id(0x0123)
            .with_data(vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88])
            .build()
            .unwrap();

        let bytes = frame.serialize();
        assert_eq!(
            bytes,
            vec![0xAA, 0xC8, 0x23, 0x01, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x55]
        );
        assert_eq!(bytes.len(), 13);
    }

    #[test]
    fn s4_extended_8_bytes() {
        let frame = FrameBuilder::<VariableFrame>::new()
            .with_can_version(CANVersion::ExtVariable)
            .with_format(VariableFormat::Data)
            .with_id(0x01234567)
            .with_data(vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88])
            .build()
            .unwrap();

        let bytes = frame.serialize();
        assert_eq!(
            bytes,
            vec![
                0xAA, 0xE8, 0x67, 0x45, 0x23, 0x01, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77,
                0x88, 0x55
            ]
        );
        assert_eq!(bytes.len(), 15);
    }

    #[test]
    fn round_trip() {
        let frame = FrameBuilder::<VariableFrame>::new()
            .with_id(0x77)
            .with_data(vec![1, 2, 3, 4])
            .build()
            .unwrap();
        let bytes = frame.serialize();
        let back = VariableFrame::deserialize(&bytes).unwrap();
        assert_eq!(frame, back);
    }

    #[test]
    fn length_bounds() {
        let frame = FrameBuilder::<VariableFrame>::new().with_id(1).build().unwrap();
        let len = frame.serialize().len();
        assert!((5..=15).contains(&len));
    }

    #[test]
    fn overflow_before_end_is_bad_length() {
        let mut bytes = vec![0xAAu8];
        bytes.extend(std::iter::repeat(0x00).take(20));
        assert!(matches!(
            VariableFrame::deserialize(&bytes),
            Err(Error::BadLength(_))
        ));
    }
}
