use super::{validate_mask, ConfigState, CoreState, WireFrame};
use crate::error::Error;
use crate::protocol::{self, constants, CANBaud, CANMode, CANVersion, Type, RTX};

mod layout {
    pub const START: usize = 0;
    pub const HEADER: usize = 1;
    pub const TYPE: usize = 2;
    pub const BAUD: usize = 3;
    pub const FRAME_TYPE: usize = 4;
    pub const FILTER: usize = 5;
    pub const MASK: usize = 9;
    pub const MODE: usize = 13;
    pub const AUTO_RTX: usize = 14;
    pub const RESERVED: usize = 15;
    pub const RESERVED_END: usize = 18;
    pub const CHECKSUM: usize = 19;
    pub const SIZE: usize = 20;
}

/// Always-20-byte adapter configuration frame: `START HEADER TYPE BAUD
/// FRAME_TYPE FILTER(4) MASK(4,BE) MODE AUTO_RTX RESERVED(4) CHECKSUM`.
///
/// Filter and mask are big-endian on the wire, unlike every identifier
/// field in [`super::FixedFrame`]/[`super::VariableFrame`], which are
/// little-endian -- this follows the adapter firmware's own convention, not
/// a general rule of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFrame {
    core: CoreState,
    config: ConfigState,
}

impl ConfigFrame {
    pub(crate) fn from_parts(core: CoreState, config: ConfigState) -> Self {
        ConfigFrame { core, config }
    }

    pub fn can_version(&self) -> CANVersion {
        self.core.can_version
    }

    pub fn baud_rate(&self) -> CANBaud {
        self.config.baud_rate
    }

    pub fn can_mode(&self) -> CANMode {
        self.config.can_mode
    }

    pub fn auto_rtx(&self) -> RTX {
        self.config.auto_rtx
    }

    pub fn filter(&self) -> u32 {
        self.config.filter
    }

    pub fn mask(&self) -> u32 {
        self.config.mask
    }
}

impl WireFrame for ConfigFrame {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; layout::SIZE];
        buf[layout::START] = constants::START_BYTE;
        buf[layout::HEADER] = constants::HEADER;
        buf[layout::TYPE] = self.core.frame_type.to_byte();
        buf[layout::BAUD] = self.config.baud_rate.to_byte();
        buf[layout::FRAME_TYPE] = self.core.can_version.to_byte();

        buf[layout::FILTER..layout::FILTER + 4]
            .copy_from_slice(&protocol::int_to_bytes_be_4(self.config.filter));
        buf[layout::MASK..layout::MASK + 4]
            .copy_from_slice(&protocol::int_to_bytes_be_4(self.config.mask));

        buf[layout::MODE] = self.config.can_mode.to_byte();
        buf[layout::AUTO_RTX] = self.config.auto_rtx.to_byte();
        for b in &mut buf[layout::RESERVED..=layout::RESERVED_END] {
            *b = constants::RESERVED;
        }

        protocol::write_checksum(&mut buf, layout::CHECKSUM, layout::TYPE, layout::RESERVED_END);
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
        if !protocol::validate_checksum(buffer, layout::CHECKSUM, layout::TYPE, layout::RESERVED_END)
        {
            return Err(Error::BadChecksum);
        }

        let frame_type = Type::from_byte(buffer[layout::TYPE])?;
        let baud_rate = CANBaud::from_byte(buffer[layout::BAUD])?;
        let can_version = CANVersion::from_fixed_byte(buffer[layout::FRAME_TYPE])?;

        let filter = protocol::bytes_to_int_be_4(&buffer[layout::FILTER..layout::FILTER + 4])?;
        let mask = protocol::bytes_to_int_be_4(&buffer[layout::MASK..layout::MASK + 4])?;
        validate_mask(mask, can_version.is_extended())?;
        super::validate_filter(filter, can_version.is_extended())?;

        let can_mode = CANMode::from_byte(buffer[layout::MODE])?;
        let auto_rtx = RTX::from_byte(buffer[layout::AUTO_RTX])?;

        Ok(ConfigFrame {
            core: CoreState {
                can_version,
                frame_type,
            },
            config: ConfigState {
                baud_rate,
                can_mode,
                auto_rtx,
                filter,
                mask,
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
