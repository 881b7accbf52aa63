//! Fluent construction for the three frame classes.
//!
//! `FrameBuilder<T>` is one generic type, but the fields each frame class
//! accepts differ (a `ConfigFrame` has no format or data payload, a
//! `VariableFrame` has no baud rate), so the setter methods live in
//! per-target `impl` blocks rather than on the generic type itself.
//! `build()` takes `&self`, so a builder can be reused or adjusted and
//! built again without giving up ownership of what's already set.

use std::marker::PhantomData;

use super::{validate_can_id, ConfigState, CoreState};
use crate::error::Error;
use crate::frame::{ConfigFrame, FixedFrame, VariableFrame};
use crate::protocol::{CANBaud, CANMode, CANVersion, FixedFormat, Type, VariableFormat, RTX};

#[derive(Debug, Clone)]
pub struct FrameBuilder<T> {
    can_version: Option<CANVersion>,
    fixed_format: Option<FixedFormat>,
    variable_format: Option<VariableFormat>,
    config_type: Option<Type>,
    id: Option<u32>,
    data: Option<Vec<u8>>,
    baud_rate: Option<CANBaud>,
    can_mode: Option<CANMode>,
    auto_rtx: Option<RTX>,
    filter: Option<u32>,
    mask: Option<u32>,
    _target: PhantomData<T>,
}

impl<T> FrameBuilder<T> {
    pub fn new() -> Self {
        FrameBuilder {
            can_version: None,
            fixed_format: None,
            variable_format: None,
            config_type: None,
            id: None,
            data: None,
            baud_rate: None,
            can_mode: None,
            auto_rtx: None,
            filter: None,
            mask: None,
            _target: PhantomData,
        }
    }
}

impl FrameBuilder<FixedFrame> {
    pub fn with_can_version(mut self, can_version: CANVersion) -> Self {
        self.can_version = Some(can_version);
        self
    }

    pub fn with_format(mut self, format: FixedFormat) -> Self {
        self.fixed_format = Some(format);
        self
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn build(&self) -> Result<FixedFrame, Error> {
        let can_version = self.can_version.unwrap_or(CANVersion::StdFixed);
        let format = self.fixed_format.unwrap_or(FixedFormat::Data);
        let id = self.id.ok_or(Error::MissingField("id"))?;
        validate_can_id(id, can_version.is_extended())?;
        let data = self.data.clone().unwrap_or_default();
        if data.len() > 8 {
            return Err(Error::BadDLC(data.len()));
        }

        Ok(FixedFrame::from_parts(
            CoreState {
                can_version,
                frame_type: Type::DataFixed,
            },
            super::DataState {
                format,
                can_id: id,
                data,
            },
        ))
    }
}

impl FrameBuilder<VariableFrame> {
    pub fn with_can_version(mut self, can_version: CANVersion) -> Self {
        self.can_version = Some(can_version);
        self
    }

    pub fn with_format(mut self, format: VariableFormat) -> Self {
        self.variable_format = Some(format);
        self
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn build(&self) -> Result<VariableFrame, Error> {
        let can_version = self.can_version.unwrap_or(CANVersion::StdVariable);
        let format = self.variable_format.unwrap_or(VariableFormat::Data);
        let id = self.id.ok_or(Error::MissingField("id"))?;
        validate_can_id(id, can_version.is_extended())?;
        let data = self.data.clone().unwrap_or_default();
        if data.len() > 8 {
            return Err(Error::BadDLC(data.len()));
        }

        Ok(VariableFrame::from_parts(
            CoreState {
                can_version,
                frame_type: Type::DataVariable,
            },
            super::DataState {
                format,
                can_id: id,
                data,
            },
        ))
    }
}

impl FrameBuilder<ConfigFrame> {
    pub fn with_can_version(mut self, can_version: CANVersion) -> Self {
        self.can_version = Some(can_version);
        self
    }

    /// Selects `CONF_FIXED` vs `CONF_VARIABLE` for the TYPE byte. Defaults
    /// to `CONF_FIXED` -- both tags describe the same 20-byte layout, so
    /// this only matters to a peer that branches on the TYPE byte itself.
    pub fn with_type(mut self, frame_type: Type) -> Self {
        self.config_type = Some(frame_type);
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: CANBaud) -> Self {
        self.baud_rate = Some(baud_rate);
        self
    }

    pub fn with_can_mode(mut self, can_mode: CANMode) -> Self {
        self.can_mode = Some(can_mode);
        self
    }

    pub fn with_auto_rtx(mut self, auto_rtx: RTX) -> Self {
        self.auto_rtx = Some(auto_rtx);
        self
    }

    pub fn with_filter(mut self, filter: u32) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_mask(mut self, mask: u32) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn build(&self) -> Result<ConfigFrame, Error> {
        let can_version = self.can_version.unwrap_or(CANVersion::StdFixed);
        let frame_type = self.config_type.unwrap_or(Type::ConfFixed);
        let baud_rate = self.baud_rate.ok_or(Error::MissingField("baud_rate"))?;
        let can_mode = self.can_mode.ok_or(Error::MissingField("can_mode"))?;
        let auto_rtx = self.auto_rtx.unwrap_or(RTX::Auto);
        let filter = self.filter.unwrap_or(0);
        let mask = self.mask.unwrap_or(0);

        super::validate_filter(filter, can_version.is_extended())?;
        super::validate_mask(mask, can_version.is_extended())?;

        Ok(ConfigFrame::from_parts(
            CoreState {
                can_version,
                frame_type,
            },
            ConfigState {
                baud_rate,
                can_mode,
                auto_rtx,
                filter,
                mask,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_id_is_missing_field() {
        let err = FrameBuilder::<FixedFrame>::new().build().unwrap_err();
        assert!(matches!(err, Error::MissingField("id")));
    }

    #[test]
    fn oversized_data_is_bad_dlc() {
        let err = FrameBuilder::<FixedFrame>::new()
            .with_id(1)
            .with_data(vec![0; 9])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::BadDLC(9)));
    }

    #[test]
    fn reusable_after_build() {
        let builder = FrameBuilder::<FixedFrame>::new().with_id(5);
        let first = builder.build().unwrap();
        let second = builder.with_data(vec![1, 2]).build().unwrap();
        assert_eq!(first.can_id(), 5);
        assert_eq!(second.data(), &[1, 2]);
    }

    #[test]
    fn config_missing_baud_is_missing_field() {
        let err = FrameBuilder::<ConfigFrame>::new()
            .with_can_mode(CANMode::Normal)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::MissingField("baud_rate")));
    }

    #[test]
    fn config_missing_mode_is_missing_field() {
        let err = FrameBuilder::<ConfigFrame>::new()
            .with_baud_rate(CANBaud::Baud500K)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::MissingField("can_mode")));
    }

    #[test]
    fn config_defaults_once_mandatory_fields_are_set() {
        let frame = FrameBuilder::<ConfigFrame>::new()
            .with_baud_rate(CANBaud::Baud500K)
            .with_can_mode(CANMode::Normal)
            .build()
            .unwrap();
        assert_eq!(frame.auto_rtx(), RTX::Auto);
        assert_eq!(frame.filter(), 0);
        assert_eq!(frame.mask(), 0);
    }
}
