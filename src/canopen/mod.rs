//! CANopen (CiA 301/CiA 402) client built on top of the [`crate::port::CanSocket`]
//! abstraction, independent of whether that socket is real SocketCAN or a
//! [`crate::bridge::SocketCanBridge`]-backed one.

pub mod cia402;
pub mod object_dictionary;
pub mod pdo;
pub mod sdo;

pub use cia402::{controlword, decode_state, Cia402StateMachine, DriveState};
pub use object_dictionary::{DataType, ObjectDictionary, ObjectEntry, RawInt};
pub use pdo::{PdoManager, PdoStatisticsSnapshot};
pub use sdo::SdoClient;
