//! Block compression codecs

pub mod deflate;
pub mod lzw;
pub mod packbits;
pub mod jpeg;

use crate::error::{Error, Result};

const DEFLATE_LEVEL: u32 = 6;

/// TIFF compression schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Deflate,
    Lzw,
    PackBits,
    Jpeg,
}

impl Compression {
    /// Maps a TIFF `Compression` tag value
    pub fn from_tag(value: u64) -> Result<Self> {
        match value {
            1 => Ok(Compression::None),
            5 => Ok(Compression::Lzw),
            7 => Ok(Compression::Jpeg),
            8 | 32946 => Ok(Compression::Deflate),
            32773 => Ok(Compression::PackBits),
            _ => Err(Error::Codec(format!("Unsupported compression type {}", value))),
        }
    }

    /// Parses a `COMPRESS` creation option value
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(Compression::None),
            "DEFLATE" | "ZIP" => Ok(Compression::Deflate),
            "PACKBITS" => Ok(Compression::PackBits),
            "LZW" | "JPEG" => Err(Error::Unsupported(format!("writing {} compression", name))),
            _ => Err(Error::Unsupported(format!("compression '{}'", name))),
        }
    }

    pub fn tag(&self) -> u16 {
        match self {
            Compression::None => 1,
            Compression::Lzw => 5,
            Compression::Jpeg => 7,
            Compression::Deflate => 8,
            Compression::PackBits => 32773,
        }
    }

    /// Name as used in creation options and profiles
    pub fn name(&self) -> &'static str {
        match self {
            Compression::None => "NONE",
            Compression::Deflate => "DEFLATE",
            Compression::Lzw => "LZW",
            Compression::PackBits => "PACKBITS",
            Compression::Jpeg => "JPEG",
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Deflate => deflate::decompress(data),
            Compression::Lzw => lzw::decompress(data),
            Compression::PackBits => packbits::decompress(data),
            Compression::Jpeg => jpeg::decompress(data),
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Deflate => deflate::compress(data, DEFLATE_LEVEL),
            Compression::PackBits => Ok(packbits::compress(data)),
            Compression::Lzw | Compression::Jpeg => {
                Err(Error::Unsupported(format!("writing {} compression", self.name())))
            }
        }
    }
}
