//! Byte order (endianness) handling
//!
//! TIFF files declare their byte order in the first two bytes: `II` for
//! little-endian and `MM` for big-endian. Header fields are read through a
//! [`ByteOrderHandler`]; decoded sample buffers are converted to native
//! order in bulk with [`ByteOrder::to_native`].

use std::io::{self, Result};
use crate::io::SeekableReader;

/// Byte order of binary data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// Byte order of the running platform
    pub const fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }

    /// Detects byte order from TIFF magic bytes
    pub fn from_tiff_magic(magic: [u8; 2]) -> Option<Self> {
        match &magic {
            b"II" => Some(ByteOrder::LittleEndian),
            b"MM" => Some(ByteOrder::BigEndian),
            _ => None,
        }
    }

    /// Reads the first two bytes and identifies the byte order
    pub fn detect<R: SeekableReader>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 2];
        reader.read_exact(&mut magic)?;

        Self::from_tiff_magic(magic).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid byte order magic bytes: {:02X}{:02X}", magic[0], magic[1]),
            )
        })
    }

    /// Creates a handler for this byte order
    pub fn handler(&self) -> Box<dyn ByteOrderHandler> {
        match self {
            ByteOrder::LittleEndian => Box::new(LittleEndian),
            ByteOrder::BigEndian => Box::new(BigEndian),
        }
    }

    /// Converts packed values of `component_size` bytes to native order in place
    pub fn to_native(&self, data: &mut [u8], component_size: usize) {
        if *self == Self::native() || component_size <= 1 {
            return;
        }
        for value in data.chunks_exact_mut(component_size) {
            value.reverse();
        }
    }

    /// Decodes an unsigned integer of 1, 2, 4 or 8 bytes
    pub fn decode_uint(&self, bytes: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        match self {
            ByteOrder::LittleEndian => {
                buf[..bytes.len()].copy_from_slice(bytes);
                u64::from_le_bytes(buf)
            }
            ByteOrder::BigEndian => {
                buf[8 - bytes.len()..].copy_from_slice(bytes);
                u64::from_be_bytes(buf)
            }
        }
    }

    /// Writes the low `out.len()` bytes of `value` in this byte order
    pub fn encode_uint(&self, value: u64, out: &mut [u8]) {
        let n = out.len();
        match self {
            ByteOrder::LittleEndian => out.copy_from_slice(&value.to_le_bytes()[..n]),
            ByteOrder::BigEndian => out.copy_from_slice(&value.to_be_bytes()[8 - n..]),
        }
    }
}

/// Reads typed values in one byte order
pub trait ByteOrderHandler: Send + Sync {
    fn read_u16(&self, reader: &mut dyn SeekableReader) -> Result<u16>;
    fn read_u32(&self, reader: &mut dyn SeekableReader) -> Result<u32>;
    fn read_u64(&self, reader: &mut dyn SeekableReader) -> Result<u64>;
    fn read_i16(&self, reader: &mut dyn SeekableReader) -> Result<i16>;
    fn read_i32(&self, reader: &mut dyn SeekableReader) -> Result<i32>;
    fn read_i64(&self, reader: &mut dyn SeekableReader) -> Result<i64>;
    fn read_f32(&self, reader: &mut dyn SeekableReader) -> Result<f32>;
    fn read_f64(&self, reader: &mut dyn SeekableReader) -> Result<f64>;
}

macro_rules! read_as {
    ($name:ident, $ty:ty, $from:ident) => {
        fn $name(&self, reader: &mut dyn SeekableReader) -> Result<$ty> {
            let mut buf = [0u8; std::mem::size_of::<$ty>()];
            reader.read_exact(&mut buf)?;
            Ok(<$ty>::$from(buf))
        }
    };
}

macro_rules! byte_order_handler {
    ($handler:ident, $from:ident) => {
        struct $handler;

        impl ByteOrderHandler for $handler {
            read_as!(read_u16, u16, $from);
            read_as!(read_u32, u32, $from);
            read_as!(read_u64, u64, $from);
            read_as!(read_i16, i16, $from);
            read_as!(read_i32, i32, $from);
            read_as!(read_i64, i64, $from);
            read_as!(read_f32, f32, $from);
            read_as!(read_f64, f64, $from);
        }
    };
}

byte_order_handler!(LittleEndian, from_le_bytes);
byte_order_handler!(BigEndian, from_be_bytes);
