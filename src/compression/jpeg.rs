//! JPEG decompression for 8-bit TIFF blocks

use crate::error::{Error, Result};

/// Decodes a self-contained JPEG stream to interleaved 8-bit samples
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = jpeg_decoder::Decoder::new(data);
    decoder
        .decode()
        .map_err(|e| Error::Codec(format!("JPEG error: {}", e)))
}

/// Decodes an abbreviated JPEG stream using shared `JPEGTables`
///
/// The tables stream is spliced in front of the block stream, dropping the
/// tables' end marker and the block's start marker.
pub fn decompress_with_tables(data: &[u8], tables: &[u8]) -> Result<Vec<u8>> {
    if tables.len() < 4 || data.len() < 2 {
        return decompress(data);
    }
    let mut stream = Vec::with_capacity(tables.len() + data.len());
    stream.extend_from_slice(&tables[..tables.len() - 2]);
    stream.extend_from_slice(&data[2..]);
    decompress(&stream)
}
