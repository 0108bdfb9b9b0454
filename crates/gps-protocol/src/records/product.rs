//! Product data record
//!
//! ```text
//! product_id:u16 software_version:i16 description\0 [extra\0 ...]
//! ```
//! The software version is scaled by 100 (`305` is version 3.05).

use std::fmt;

use crate::datatypes::{RecordReader, RecordWriter};
use crate::error::ParseError;

const DESCRIPTION_MAX: usize = 255;

/// Identity reported by the device in answer to a product request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProductData {
    pub product_id: u16,
    /// Software version times 100
    pub software_version: i16,
    /// Main description followed by any additional strings
    pub descriptions: Vec<String>,
}

impl ProductData {
    pub fn new(product_id: u16, software_version: i16, description: impl Into<String>) -> Self {
        Self {
            product_id,
            software_version,
            descriptions: vec![description.into()],
        }
    }

    /// Main product description
    pub fn description(&self) -> &str {
        self.descriptions.first().map(String::as_str).unwrap_or("")
    }

    /// Software version as a decimal number
    pub fn version(&self) -> f32 {
        f32::from(self.software_version) / 100.0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = RecordWriter::new();
        w.u16(self.product_id).i16(self.software_version);
        for description in &self.descriptions {
            w.zstring(description, DESCRIPTION_MAX);
        }
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, ParseError> {
        let mut r = RecordReader::new(data);
        r.require(4)?;
        let product_id = r.u16()?;
        let software_version = r.i16()?;
        let mut descriptions = Vec::new();
        while r.remaining() > 0 {
            descriptions.push(r.zstring(DESCRIPTION_MAX));
        }
        Ok(Self {
            product_id,
            software_version,
            descriptions,
        })
    }
}

impl fmt::Display for ProductData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (id {}, software {:.2})",
            self.description(),
            self.product_id,
            self.version()
        )
    }
}
