//! Conversion between [`crate::port::CanFrame`] (the kernel `can_frame`
//! layout) and [`VariableFrame`] (the Waveshare wire frame the bridge
//! forwards to/from the adapter).

use crate::frame::{FrameBuilder, VariableFrame, WireFrame};
use crate::port::CanFrame;
use crate::protocol::{CANVersion, VariableFormat};

/// `VariableFrame` -> kernel `can_frame`.
pub fn to_can_frame(frame: &VariableFrame) -> Result<CanFrame, crate::error::Error> {
    let is_remote = frame.format() == VariableFormat::Remote;
    CanFrame::with_flags(frame.can_id(), frame.data(), frame.is_extended(), is_remote)
}

/// Kernel `can_frame` -> `VariableFrame`.
///
/// A remote frame's requested length (`can_dlc`) is not carried over:
/// `VariableFrame` has no payload for remote frames, so the result always
/// has DLC 0 regardless of what the kernel frame requested. This mirrors
/// the adapter firmware's own wire format, which has no field for a remote
/// frame's requested length either.
pub fn from_can_frame(cf: &CanFrame) -> Result<VariableFrame, crate::error::Error> {
    let is_extended = cf.is_extended();
    let is_remote = cf.is_rtr();

    let can_version = if is_extended {
        CANVersion::ExtVariable
    } else {
        CANVersion::StdVariable
    };
    let format = if is_remote {
        VariableFormat::Remote
    } else {
        VariableFormat::Data
    };

    let mut builder = FrameBuilder::<VariableFrame>::new()
        .with_can_version(can_version)
        .with_format(format)
        .with_id(cf.id());

    if !is_remote {
        builder = builder.with_data(cf.data().to_vec());
    }

    builder.build()
}
