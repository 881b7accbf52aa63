//! Object Dictionary: a name-keyed table of CANopen object entries loaded
//! from a JSON description, plus typed little-endian raw-value conversion.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::Error;

/// CANopen datatypes this dictionary recognizes. `U64`/`I64` are accepted
/// here even though the JSON schema's originating tooling never emitted
/// them -- the enum defines all eight integer widths the SDO/PDO layer can
/// encode, so the string parser (`DataType::parse`) honors all eight too.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
}

impl DataType {
    pub fn parse(type_str: &str) -> Result<Self, Error> {
        match type_str {
            "uint8_t" => Ok(DataType::U8),
            "int8_t" => Ok(DataType::I8),
            "uint16_t" => Ok(DataType::U16),
            "int16_t" => Ok(DataType::I16),
            "uint32_t" => Ok(DataType::U32),
            "int32_t" => Ok(DataType::I32),
            "uint64_t" => Ok(DataType::U64),
            "int64_t" => Ok(DataType::I64),
            other => Err(Error::ConfigError(format!("unknown datatype: {}", other))),
        }
    }

    pub fn size_bytes(self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 => 4,
            DataType::U64 | DataType::I64 => 8,
        }
    }
}

/// A single entry in the dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry {
    pub index: u16,
    pub subindex: u8,
    pub datatype: DataType,
    pub access: String,
    pub pdo_mapping: String,
    pub scaling_factor: f64,
    pub unit: String,
}

impl ObjectEntry {
    pub fn size_bytes(&self) -> usize {
        self.datatype.size_bytes()
    }
}

#[derive(Debug, Deserialize)]
struct RawObjectEntry {
    index: String,
    subindex: u8,
    datatype: String,
    access: String,
    #[serde(default)]
    pdo_mapping: String,
    #[serde(default = "default_scaling_factor")]
    scaling_factor: f64,
    #[serde(default)]
    unit: String,
}

fn default_scaling_factor() -> f64 {
    1.0
}

fn default_device_name() -> String {
    "unknown".to_string()
}

fn default_can_interface() -> String {
    "vcan0".to_string()
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    node_id: u8,
    #[serde(default = "default_device_name")]
    device_name: String,
    #[serde(default = "default_can_interface")]
    can_interface: String,
    #[serde(default)]
    objects: HashMap<String, RawObjectEntry>,
    #[serde(default)]
    motor_parameters: HashMap<String, f64>,
}

/// Converts a primitive integer to/from its little-endian raw-byte form.
/// Implemented for every width the CANopen SDO layer speaks: `u8`..`i64`.
pub trait RawInt: Sized + Copy {
    fn to_raw(self) -> Vec<u8>;
    fn from_raw(bytes: &[u8]) -> Result<Self, Error>;
}

macro_rules! impl_raw_int {
    ($($t:ty),* $(,)?) => {
        $(
            impl RawInt for $t {
                fn to_raw(self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }

                fn from_raw(bytes: &[u8]) -> Result<Self, Error> {
                    const SIZE: usize = std::mem::size_of::<$t>();
                    if bytes.len() < SIZE {
                        return Err(Error::BadLength(bytes.len()));
                    }
                    let mut buf = [0u8; SIZE];
                    buf.copy_from_slice(&bytes[..SIZE]);
                    Ok(<$t>::from_le_bytes(buf))
                }
            }
        )*
    };
}

impl_raw_int!(u8, i8, u16, i16, u32, i32, u64, i64);

/// Name-keyed table of CANopen object entries, parsed from a JSON file.
///
/// No validation of CANopen compliance is performed -- entries are taken at
/// face value from the JSON, the same way the original tooling's config
/// loader treats them.
pub struct ObjectDictionary {
    objects: HashMap<String, ObjectEntry>,
    motor_parameters: HashMap<String, f64>,
    node_id: u8,
    device_name: String,
    can_interface: String,
}

impl ObjectDictionary {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let raw: RawConfig = serde_json::from_str(json)?;

        let mut objects = HashMap::with_capacity(raw.objects.len());
        for (name, raw_entry) in raw.objects {
            let index_str = raw_entry.index.trim_start_matches("0x").trim_start_matches("0X");
            let index = u16::from_str_radix(index_str, 16).map_err(|_| {
                Error::ConfigError(format!("invalid object index: {}", raw_entry.index))
            })?;
            let datatype = DataType::parse(&raw_entry.datatype)?;

            objects.insert(
                name,
                ObjectEntry {
                    index,
                    subindex: raw_entry.subindex,
                    datatype,
                    access: raw_entry.access,
                    pdo_mapping: raw_entry.pdo_mapping,
                    scaling_factor: raw_entry.scaling_factor,
                    unit: raw_entry.unit,
                },
            );
        }

        Ok(ObjectDictionary {
            objects,
            motor_parameters: raw.motor_parameters,
            node_id: raw.node_id,
            device_name: raw.device_name,
            can_interface: raw.can_interface,
        })
    }

    pub fn get_object(&self, name: &str) -> Result<&ObjectEntry, Error> {
        self.objects
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn has_object(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn to_raw<T: RawInt>(&self, value: T) -> Vec<u8> {
        value.to_raw()
    }

    pub fn from_raw<T: RawInt>(&self, raw_data: &[u8]) -> Result<T, Error> {
        T::from_raw(raw_data)
    }

    /// Names of every object whose `pdo_mapping` matches `pdo_name` (e.g.
    /// `"rpdo1"`, `"tpdo2"`).
    pub fn objects_for_pdo(&self, pdo_name: &str) -> Vec<String> {
        self.objects
            .iter()
            .filter(|(_, entry)| entry.pdo_mapping == pdo_name)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn motor_param(&self, name: &str) -> Result<f64, Error> {
        self.motor_parameters
            .get(name)
            .copied()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn can_interface(&self) -> &str {
        &self.can_interface
    }
}
