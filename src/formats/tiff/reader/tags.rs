//! Tag value decoding
//!
//! Entries keep their raw value bytes in file byte order; [`TagReader`]
//! turns them into typed values.

use crate::error::{Error, Result};
use crate::io::ByteOrder;
use crate::formats::tiff::IFDEntry;
use crate::formats::tiff::tags::{field_types, tag_name};

/// Decodes tag values in one byte order
#[derive(Debug, Clone, Copy)]
pub struct TagReader {
    byte_order: ByteOrder,
}

impl TagReader {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self { byte_order }
    }

    /// Unsigned integer values of BYTE, SHORT, LONG, LONG8 or IFD8 tags
    pub fn read_u64s(&self, entry: &IFDEntry) -> Result<Vec<u64>> {
        let size = match entry.field_type {
            field_types::BYTE | field_types::UNDEFINED => 1,
            field_types::SHORT => 2,
            field_types::LONG => 4,
            field_types::LONG8 | field_types::IFD8 => 8,
            other => return Err(type_error(entry, other, "an unsigned integer")),
        };
        Ok(entry
            .data
            .chunks_exact(size)
            .map(|chunk| self.byte_order.decode_uint(chunk))
            .collect())
    }

    /// SHORT values, as used by the GeoKey directory
    pub fn read_u16s(&self, entry: &IFDEntry) -> Result<Vec<u16>> {
        if entry.field_type != field_types::SHORT {
            return Err(type_error(entry, entry.field_type, "SHORT"));
        }
        Ok(self.read_u64s(entry)?.into_iter().map(|v| v as u16).collect())
    }

    /// Floating point values of DOUBLE or FLOAT tags
    pub fn read_doubles(&self, entry: &IFDEntry) -> Result<Vec<f64>> {
        match entry.field_type {
            field_types::DOUBLE => Ok(entry
                .data
                .chunks_exact(8)
                .map(|chunk| f64::from_bits(self.byte_order.decode_uint(chunk)))
                .collect()),
            field_types::FLOAT => Ok(entry
                .data
                .chunks_exact(4)
                .map(|chunk| f32::from_bits(self.byte_order.decode_uint(chunk) as u32) as f64)
                .collect()),
            other => Err(type_error(entry, other, "DOUBLE or FLOAT")),
        }
    }

    /// ASCII value with trailing NULs removed
    pub fn read_ascii(&self, entry: &IFDEntry) -> Result<String> {
        if entry.field_type != field_types::ASCII {
            return Err(type_error(entry, entry.field_type, "ASCII"));
        }
        Ok(String::from_utf8_lossy(&entry.data).trim_end_matches('\0').to_string())
    }
}

fn type_error(entry: &IFDEntry, field_type: u16, expected: &str) -> Error {
    Error::Codec(format!(
        "Tag {} ({}) has field type {}, expected {}",
        entry.tag,
        tag_name(entry.tag),
        field_type,
        expected
    ))
}
