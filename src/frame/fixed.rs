use super::{validate_can_id, CoreState, DataState, WireFrame};
use crate::error::Error;
use crate::protocol::{self, constants, CANVersion, FixedFormat, Type};

mod layout {
    pub const START: usize = 0;
    pub const HEADER: usize = 1;
    pub const TYPE: usize = 2;
    pub const CAN_VERS: usize = 3;
    pub const FORMAT: usize = 4;
    pub const ID: usize = 5;
    pub const DLC: usize = 9;
    pub const DATA: usize = 10;
    pub const RESERVED: usize = 18;
    pub const CHECKSUM: usize = 19;
    pub const SIZE: usize = 20;
}

/// Always-20-byte data frame: `START HEADER TYPE CAN_VERS FORMAT ID(4) DLC DATA(8) RESERVED CHECKSUM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedFrame {
    core: CoreState,
    data: DataState<FixedFormat>,
}

impl FixedFrame {
    pub(crate) fn from_parts(core: CoreState, data: DataState<FixedFormat>) -> Self {
        FixedFrame { core, data }
    }

    pub fn can_version(&self) -> CANVersion {
        self.core.can_version
    }

    pub fn format(&self) -> FixedFormat {
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
}

impl WireFrame for FixedFrame {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; layout::SIZE];
        buf[layout::START] = constants::START_BYTE;
        buf[layout::HEADER] = constants::HEADER;
        buf[layout::TYPE] = self.core.frame_type.to_byte();
        buf[layout::CAN_VERS] = self.core.can_version.to_byte();
        buf[layout::FORMAT] = self.data.format.to_byte();

        let id_bytes = protocol::int_to_bytes_le_4(self.data.can_id);
        buf[layout::ID..layout::ID + 4].copy_from_slice(&id_bytes);

        buf[layout::DLC] = self.data.dlc() as u8;
        buf[layout::DATA..layout::DATA + self.data.dlc()].copy_from_slice(&self.data.data);
        buf[layout::RESERVED] = constants::RESERVED;

        protocol::write_checksum(&mut buf, layout::CHECKSUM, layout::TYPE, layout::RESERVED);
        buf
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, Error> {
        if buffer.len() != layout::SIZE {
            return Err(Error::BadLength(buffer.len()));
        }
        if buffer[layout::START] != constants::START_BYTE {
            return Err(Error::BadStart);
        }
        if buffer[layout::HEADER] != constants::HEADER {
            return Err(Error::BadHeader);
        }
        if !protocol::validate_checksum(buffer, layout::CHECKSUM, layout::TYPE, layout::RESERVED) {
            return Err(Error::BadChecksum);
        }

        let frame_type = Type::from_byte(buffer[layout::TYPE])?;
        let can_version = CANVersion::from_fixed_byte(buffer[layout::CAN_VERS])?;
        let format = FixedFormat::from_byte(buffer[layout::FORMAT])?;
        let can_id = protocol::bytes_to_int_le(&buffer[layout::ID..layout::ID + 4])?;
        validate_can_id(can_id, can_version.is_extended())?;

        let dlc = buffer[layout::DLC] as usize;
        if dlc > 8 {
            return Err(Error::BadDLC(dlc));
        }
        let data = buffer[layout::DATA..layout::DATA + dlc].to_vec();

        Ok(FixedFrame {
            core: CoreState {
                can_version,
                frame_type,
            },
            data: DataState {
                format,
                can_id,
                data,
            },
        })
    }

    fn serialized_size(&self) -> usize {
        layout::SIZE
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
    fn s1_standard_id_full_data() {
        let frame = FrameBuilder::<FixedFrame>::new()
            .with_can_version(CANVersion::StdFixed)
            .with_format(FixedFormat::Data)
            .with_id(0x0123)
            .with_data(vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88])
            .build()
            .unwrap();

        let bytes = frame.serialize();
        assert_eq!(
            bytes,
            vec![
                0xAA, 0x55, 0x01, 0x01, 0x01, 0x23, 0x01, 0x00, 0x00, 0x08, 0x11, 0x22, 0x33,
                0x44, 0x55, 0x66, 0x77, 0x88, 0x00, 0x93
            ]
        );
    }

    #[test]
    fn s2_extended_id() {
        let frame = FrameBuilder::<FixedFrame>::new()
            .with_can_version(CANVersion::ExtFixed)
            .with_format(FixedFormat::Data)
            .with_id(0x12345678)
            .with_data(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08])
            .build()
            .unwrap();

        let bytes = frame.serialize();
        assert_eq!(
            bytes,
            vec![
                0xAA, 0x55, 0x01, 0x02, 0x01, 0x78, 0x56, 0x34, 0x12, 0x08, 0x01, 0x02, 0x03,
                0x04, 0x05, 0x06, 0x07, 0x08, 0x00, 0x44
            ]
        );
    }

    #[test]
    fn round_trip() {
        let frame = FrameBuilder::<FixedFrame>::new()
            .with_id(0x42)
            .with_data(vec![1, 2, 3])
            .build()
            .unwrap();
        let bytes = frame.serialize();
        let back = FixedFrame::deserialize(&bytes).unwrap();
        assert_eq!(frame, back);
    }

    #[test]
    fn serialize_always_20_bytes() {
        let frame = FrameBuilder::<FixedFrame>::new().with_id(1).build().unwrap();
        assert_eq!(frame.serialize().len(), 20);
    }

    #[test]
    fn bad_checksum_rejected() {
        let frame = FrameBuilder::<FixedFrame>::new()
            .with_id(1)
            .with_data(vec![9])
            .build()
            .unwrap();
        let mut bytes = frame.serialize();
        bytes[19] ^= 0xFF;
        assert!(matches!(
            FixedFrame::deserialize(&bytes),
            Err(Error::BadChecksum)
        ));
    }

    #[test]
    fn bad_start_rejected() {
        let frame = FrameBuilder::<FixedFrame>::new().with_id(1).build().unwrap();
        let mut bytes = frame.serialize();
        bytes[0] = 0x00;
        assert!(matches!(FixedFrame::deserialize(&bytes), Err(Error::BadStart)));
    }

    #[test]
    fn deserialize_overwrites_prior_state() {
        let a = FrameBuilder::<FixedFrame>::new()
            .with_id(1)
            .with_data(vec![1])
            .build()
            .unwrap();
        let b = FrameBuilder::<FixedFrame>::new()
            .with_id(2)
            .with_data(vec![2, 2])
            .build()
            .unwrap();
        let mut target = a;
        let deserialized = FixedFrame::deserialize(&b.serialize()).unwrap();
        target = deserialized;
        assert_eq!(target.can_id(), 2);
        assert_eq!(target.data(), &[2, 2]);
    }
}
