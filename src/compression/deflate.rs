//! Deflate/ZIP compression

use std::io::{Read, Write};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use crate::error::{Error, Result};

/// Decompresses zlib-wrapped Deflate data
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| Error::Codec(format!("Deflate error: {}", e)))?;
    Ok(decompressed)
}

/// Compresses data with zlib-wrapped Deflate at the given level (0-9)
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deflate_round_trip() {
        let original = b"Hello, world! This is test data for compression.".repeat(8);
        let compressed = compress(&original, 6).unwrap();
        assert!(compressed.len() < original.len());
        assert_eq!(decompress(&compressed).unwrap(), original);
    }

    #[test]
    fn test_corrupt_stream() {
        let err = decompress(&[0x78, 0x9c, 0xff, 0xff, 0x00]).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }
}
