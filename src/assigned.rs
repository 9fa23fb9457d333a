//! BLE assigned numbers
//!
//! The Bluetooth SIG assigns 16 bit UUIDs to well known services, characteristics, and
//! descriptors. A JSON table of them (`uuids.json` in the repository root) can be loaded at
//! startup; it shapes nothing but pretty printing.

use crate::UUID;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// The raw shape of the JSON table
///
/// Each entry is `[number, short_name, display_name]`.
#[derive(Deserialize)]
struct UuidTable {
    #[serde(rename = "service_UUIDs")]
    service_uuids: Vec<(u32, String, String)>,
    #[serde(rename = "characteristic_UUIDs")]
    characteristic_uuids: Vec<(u32, String, String)>,
    #[serde(rename = "descriptor_UUIDs")]
    descriptor_uuids: Vec<(u32, String, String)>,
}

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "cannot read the assigned numbers table: {}", e),
            Error::Json(e) => write!(f, "cannot parse the assigned numbers table: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

/// Names for the UUIDs with assigned numbers
pub struct AssignedNumbers {
    names: HashMap<UUID, String>,
}

impl AssignedNumbers {
    /// Load the table from a reader of the JSON form
    pub fn from_reader<R>(reader: R) -> Result<Self, Error>
    where
        R: std::io::Read,
    {
        let table: UuidTable = serde_json::from_reader(reader)?;

        let names = table
            .service_uuids
            .into_iter()
            .chain(table.characteristic_uuids)
            .chain(table.descriptor_uuids)
            .map(|(number, _, name)| (UUID::from_u32(number), name))
            .collect();

        Ok(AssignedNumbers { names })
    }

    /// Load the table from a file
    pub fn from_file<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        Self::from_reader(std::fs::File::open(path)?)
    }

    /// Get the assigned name of a UUID, if it has one
    pub fn get_name(&self, uuid: UUID) -> Option<&str> {
        self.names.get(&uuid).map(|name| name.as_str())
    }

    /// Get a printable label for any UUID
    ///
    /// Falls back to the hexadecimal assigned number for unnamed shortened UUIDs, and to the
    /// full hyphenated form otherwise.
    pub fn label(&self, uuid: UUID) -> String {
        use core::convert::TryInto;

        match self.get_name(uuid) {
            Some(name) => name.to_string(),
            None => match TryInto::<u16>::try_into(uuid) {
                Ok(short) => format!("{:#06x}", short),
                Err(_) => uuid.to_string(),
            },
        }
    }
}
